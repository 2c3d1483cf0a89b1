//! A single scheduled request.
//!
//! A [`RequestTask`] waits for its fire time, asks the payload source for a
//! body, uploads it as the multipart field `image`, and hands the parsed
//! JSON response to the classifier. Every failure along the way is caught
//! here and becomes a failed outcome; nothing is retried.

use std::cell::RefCell;
use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, warn};

use crate::aggregate::UnitTally;
use crate::classifier::ResponseClassifier;
use crate::errors::{ErrorCategory, RequestFailure};
use crate::metrics::{
    INFLIGHT_REQUESTS, REQUESTS_ISSUED_TOTAL, REQUESTS_SUCCEEDED_TOTAL,
    REQUEST_DURATION_SECONDS, REQUEST_FAILURES_TOTAL,
};
use crate::payload::{Payload, PayloadSource};

/// Multipart field the target reads the upload from.
pub const UPLOAD_FIELD: &str = "image";

/// Everything the tasks of one execution unit share.
pub struct RequestContext {
    pub client: reqwest::Client,
    pub endpoint: String,
    pub content_type: String,
    pub payloads: Arc<dyn PayloadSource>,
    pub classifier: Arc<dyn ResponseClassifier>,
}

/// How a single request ended.
#[derive(Debug)]
pub enum RequestOutcome {
    /// The classifier accepted the response
    Succeeded,
    /// The response was well formed but the classifier rejected it
    Rejected,
    /// Something went wrong before a verdict could be reached
    Failed(RequestFailure),
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Succeeded)
    }

    /// Whether the request was actually sent.
    pub fn was_issued(&self) -> bool {
        match self {
            RequestOutcome::Succeeded | RequestOutcome::Rejected => true,
            RequestOutcome::Failed(failure) => failure.was_issued(),
        }
    }
}

/// Keeps the in-flight gauge honest when a task is aborted mid-request.
struct InflightGuard;

impl InflightGuard {
    fn enter() -> Self {
        INFLIGHT_REQUESTS.inc();
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        INFLIGHT_REQUESTS.dec();
    }
}

/// One request scheduled at a fixed offset into its slice.
#[derive(Debug, Clone, Copy)]
pub struct RequestTask {
    fire_at: Instant,
}

impl RequestTask {
    pub fn new(slice_start: Instant, offset: Duration) -> Self {
        Self {
            fire_at: slice_start + offset,
        }
    }

    pub fn fire_at(&self) -> Instant {
        self.fire_at
    }

    /// Run the task to completion, recording into the unit's tally.
    ///
    /// `issued` is bumped the moment the request is handed to the
    /// transport, so a task aborted while waiting for its response still
    /// counts as issued. The verdict is recorded only once it is known.
    pub async fn run(self, ctx: &RequestContext, tally: &RefCell<UnitTally>) -> RequestOutcome {
        time::sleep_until(self.fire_at).await;

        let payload = match ctx.payloads.next_payload() {
            Ok(payload) => payload,
            Err(e) => return record_unsent(tally, RequestFailure::from(e)),
        };
        let id = payload.id.clone();

        let request = match build_request(ctx, payload) {
            Ok(request) => request,
            Err(failure) => return record_unsent(tally, failure),
        };

        tally.borrow_mut().record_issued();
        REQUESTS_ISSUED_TOTAL.inc();

        let started = Instant::now();
        let verdict = {
            let _inflight = InflightGuard::enter();
            exchange(ctx, request, &id).await
        };
        let latency = started.elapsed();
        REQUEST_DURATION_SECONDS.observe(latency.as_secs_f64());

        match verdict {
            Ok(true) => {
                tally.borrow_mut().record_success(latency);
                REQUESTS_SUCCEEDED_TOTAL.inc();
                debug!(id = %id, latency_ms = latency.as_millis() as u64, "Request succeeded");
                RequestOutcome::Succeeded
            }
            Ok(false) => {
                let category = ErrorCategory::Rejected;
                tally.borrow_mut().record_failure(category, Some(latency));
                REQUEST_FAILURES_TOTAL
                    .with_label_values(&[category.label()])
                    .inc();
                debug!(id = %id, "Response classified unsuccessful");
                RequestOutcome::Rejected
            }
            Err(failure) => {
                let category = failure.category();
                tally.borrow_mut().record_failure(category, Some(latency));
                REQUEST_FAILURES_TOTAL
                    .with_label_values(&[category.label()])
                    .inc();
                warn!(
                    id = %id,
                    endpoint = %ctx.endpoint,
                    error = %failure,
                    error_category = %category.label(),
                    "Request failed"
                );
                RequestOutcome::Failed(failure)
            }
        }
    }
}

fn record_unsent(tally: &RefCell<UnitTally>, failure: RequestFailure) -> RequestOutcome {
    let category = failure.category();
    tally.borrow_mut().record_failure(category, None);
    REQUEST_FAILURES_TOTAL
        .with_label_values(&[category.label()])
        .inc();
    warn!(
        error = %failure,
        error_category = %category.label(),
        "Request not sent"
    );
    RequestOutcome::Failed(failure)
}

fn build_request(
    ctx: &RequestContext,
    payload: Payload,
) -> Result<reqwest::RequestBuilder, RequestFailure> {
    let part = Part::bytes(payload.bytes)
        .file_name(payload.id)
        .mime_str(&ctx.content_type)
        .map_err(|e| RequestFailure::Build(format!("invalid content type: {}", e)))?;

    let form = Form::new().part(UPLOAD_FIELD, part);
    Ok(ctx.client.post(&ctx.endpoint).multipart(form))
}

/// Send, check the status, parse the body and classify it.
async fn exchange(
    ctx: &RequestContext,
    request: reqwest::RequestBuilder,
    id: &str,
) -> Result<bool, RequestFailure> {
    let response = request.send().await.map_err(RequestFailure::Transport)?;

    let status = response.status();
    if !status.is_success() {
        return Err(RequestFailure::Status(status.as_u16()));
    }

    let body = response.bytes().await.map_err(RequestFailure::Body)?;
    let json: Value = serde_json::from_slice(&body)?;

    Ok(ctx.classifier.classify(id, &json)?)
}
