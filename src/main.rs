use std::env;
use std::sync::{Arc, Mutex};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use openloop::config::Config;
use openloop::metrics::{gather_metrics_string, register_metrics, start_metrics_server};
use openloop::payload::DirectoryPayloadSource;
use openloop::scheduler::WorkloadScheduler;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Required environment variables:");
    eprintln!(
        "  TARGET_URL              - Inference endpoint (must start with http:// or https://)"
    );
    eprintln!();
    eprintln!("Workload:");
    eprintln!("  WORKLOAD                - Requests per second for each second, e.g. 5,10,20 (default: 5,5,5)");
    eprintln!("  DRAIN_TIMEOUT           - Time allowed after the last slice: 500ms, 5s, 1m (default: 5s)");
    eprintln!("  DRAIN_ACCOUNTING        - count-sent or discard-terminated (default: count-sent)");
    eprintln!("  RANDOM_SEED             - Seed for arrival times and payload choice (default: 42)");
    eprintln!();
    eprintln!("Payloads and classification:");
    eprintln!("  PAYLOAD_DIR             - Directory of .jpg/.jpeg/.png files (default: ./test_images)");
    eprintln!("  PAYLOAD_CONTENT_TYPE    - Content type of the `image` part (default: image/jpeg)");
    eprintln!("  SUCCESS_PATH            - JSONPath to a boolean verdict (default: the `success` field)");
    eprintln!();
    eprintln!("Client configuration:");
    eprintln!("  REQUEST_TIMEOUT         - Per-request timeout (default: none)");
    eprintln!("  SKIP_TLS_VERIFY         - Skip TLS certificate verification (default: false)");
    eprintln!("  RESOLVE_TARGET_ADDR     - DNS override: hostname:ip:port");
    eprintln!("  CUSTOM_HEADERS          - Comma-separated headers (use \\, for literal commas)");
    eprintln!();
    eprintln!("Other:");
    eprintln!("  CONFIG_FILE             - YAML run file; environment variables override its values");
    eprintln!("  METRICS_PORT            - Serve Prometheus metrics on this port during the run");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: openloop)");
    eprintln!("  RUST_LOG                - Log filter (default: info)");
    eprintln!("  LOG_FORMAT              - Set to `json` for JSON log lines");
}

fn initialize_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    initialize_tracing();

    // Register Prometheus metrics
    register_metrics()?;

    // Load configuration from the environment (and CONFIG_FILE, if set)
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(1);
        }
    };
    config.print_summary();

    let registry_arc = Arc::new(Mutex::new(prometheus::default_registry().clone()));
    if let Some(port) = config.metrics_port {
        let registry = registry_arc.clone();
        tokio::spawn(async move {
            start_metrics_server(port, registry).await;
        });
    }

    let payloads = match DirectoryPayloadSource::from_dir_seeded(&config.payload_dir, config.seed) {
        Ok(source) => source,
        Err(e) => {
            error!(dir = %config.payload_dir.display(), error = %e, "Cannot load payloads");
            std::process::exit(1);
        }
    };
    let classifier = config.classifier()?;

    let mut scheduler =
        WorkloadScheduler::new(config.to_scheduler_config(), Arc::new(payloads), classifier)?;
    let aggregate = scheduler.run(&config.workload).await;

    info!(
        total_issued = aggregate.total_issued,
        total_succeeded = aggregate.total_succeeded,
        "Run complete"
    );

    println!("\n--- RESULTS ---");
    println!("{}", aggregate.format_summary());
    println!("(total issued, total succeeded) = {:?}", aggregate.totals());

    let final_metrics_output = gather_metrics_string(&registry_arc);
    println!("\n--- FINAL METRICS ---\n{}", final_metrics_output);
    println!("--- END OF FINAL METRICS ---");

    Ok(())
}
