use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::env;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "openloop".to_string());

    // === Request Metrics ===

    pub static ref REQUESTS_ISSUED_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_issued_total", "Requests that were actually sent to the target")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUESTS_SUCCEEDED_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_succeeded_total", "Requests classified as successful")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_FAILURES_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("request_failures_total", "Failed requests by error category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            HistogramOpts::new(
                "request_duration_seconds",
                "Time from sending a request to classifying its response"
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref INFLIGHT_REQUESTS: IntGauge =
        IntGauge::with_opts(
            Opts::new("inflight_requests", "Requests sent and still awaiting a response")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    // === Execution Unit Metrics ===

    pub static ref EXECUTION_UNITS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("execution_units_total", "Finished execution units by how they ended")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["result"]  // result: completed, terminated
        ).unwrap();

    pub static ref ACTIVE_UNITS: IntGauge =
        IntGauge::with_opts(
            Opts::new("active_units", "Execution units currently running")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
///
/// Registering twice returns an `AlreadyReg` error.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let registry = prometheus::default_registry();
    registry.register(Box::new(REQUESTS_ISSUED_TOTAL.clone()))?;
    registry.register(Box::new(REQUESTS_SUCCEEDED_TOTAL.clone()))?;
    registry.register(Box::new(REQUEST_FAILURES_TOTAL.clone()))?;
    registry.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    registry.register(Box::new(INFLIGHT_REQUESTS.clone()))?;
    registry.register(Box::new(EXECUTION_UNITS_TOTAL.clone()))?;
    registry.register(Box::new(ACTIVE_UNITS.clone()))?;

    Ok(())
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    _req: Request<Body>,
    registry: Arc<Mutex<Registry>>,
) -> Result<Response<Body>, hyper::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .gather();
    let mut buffer = Vec::new();

    let mut response = Response::new(Body::empty());
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            if let Ok(value) = encoder.format_type().parse() {
                response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
            }
            *response.body_mut() = Body::from(buffer);
        }
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        }
    }

    Ok(response)
}

/// Starts the Prometheus metrics HTTP server.
pub async fn start_metrics_server(port: u16, registry: Arc<Mutex<Registry>>) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry_clone = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry_clone_inner = registry_clone.clone();
                async move { metrics_handler(req, registry_clone_inner).await }
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(
        port = port,
        addr = %addr,
        "Metrics server listening"
    );

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}

/// Gathers and encodes metrics as a string for final output.
pub fn gather_metrics_string(registry: &Arc<Mutex<Registry>>) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# ERROR ENCODING METRICS");
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!(error = %e, "Metrics output was not UTF-8");
        String::from("# ERROR ENCODING METRICS TO UTF-8")
    })
}
