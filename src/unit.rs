//! Execution units: one per slice of the workload plan.
//!
//! A unit owns one slice's arrival schedule and fires every request of that
//! slice. Units are isolated from one another on their own OS thread with a
//! single-threaded tokio runtime, so CPU work in one slice's burst cannot
//! push back another slice's fire times. Inside a unit all requests share
//! that one thread and only yield while waiting for their fire time or for
//! the network.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::{JoinSet, LocalSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::aggregate::{TallyReporter, UnitTally};
use crate::arrival::ArrivalSchedule;
use crate::classifier::ResponseClassifier;
use crate::client::{build_client, ClientBuildError, ClientConfig};
use crate::metrics::{ACTIVE_UNITS, EXECUTION_UNITS_TOTAL};
use crate::payload::PayloadSource;
use crate::request::{RequestContext, RequestOutcome, RequestTask};

/// What a unit reports when the drain timeout cuts it short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrainAccounting {
    /// Report requests already sent and verdicts already reached.
    /// Unsent and unresolved requests are not counted.
    #[default]
    CountSent,
    /// Report nothing for a terminated unit.
    DiscardTerminated,
}

impl FromStr for DrainAccounting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "count-sent" => Ok(DrainAccounting::CountSent),
            "discard-terminated" => Ok(DrainAccounting::DiscardTerminated),
            other => Err(format!(
                "Unknown drain accounting '{}'. Use 'count-sent' or 'discard-terminated'.",
                other
            )),
        }
    }
}

impl fmt::Display for DrainAccounting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainAccounting::CountSent => write!(f, "count-sent"),
            DrainAccounting::DiscardTerminated => write!(f, "discard-terminated"),
        }
    }
}

/// Run-wide settings every unit needs to build its request context.
pub struct UnitEnvironment {
    pub client_config: ClientConfig,
    pub endpoint: String,
    pub content_type: String,
    pub payloads: Arc<dyn PayloadSource>,
    pub classifier: Arc<dyn ResponseClassifier>,
    pub accounting: DrainAccounting,
}

impl UnitEnvironment {
    /// Build a request context with a fresh client bound to the calling runtime.
    pub fn request_context(&self) -> Result<RequestContext, ClientBuildError> {
        let client = build_client(&self.client_config)?.client;
        Ok(RequestContext {
            client,
            endpoint: self.endpoint.clone(),
            content_type: self.content_type.clone(),
            payloads: Arc::clone(&self.payloads),
            classifier: Arc::clone(&self.classifier),
        })
    }
}

/// Receiving end of the run-wide termination signal.
pub type ShutdownSignal = watch::Receiver<bool>;

/// One slice's burst of requests.
#[derive(Debug)]
pub struct ExecutionUnit {
    slice: usize,
    schedule: ArrivalSchedule,
    slice_start: Instant,
}

impl ExecutionUnit {
    /// A unit whose offsets count from `slice_start`.
    pub fn new(slice: usize, schedule: ArrivalSchedule, slice_start: Instant) -> Self {
        Self {
            slice,
            schedule,
            slice_start,
        }
    }

    pub fn slice(&self) -> usize {
        self.slice
    }

    pub fn schedule(&self) -> &ArrivalSchedule {
        &self.schedule
    }

    /// Start the unit on its own OS thread.
    ///
    /// The thread reports to `reporter` exactly once (or discards, per the
    /// environment's [`DrainAccounting`]) and then exits.
    pub fn spawn(
        self,
        env: Arc<UnitEnvironment>,
        reporter: TallyReporter,
        shutdown: ShutdownSignal,
    ) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("unit-{}", self.slice))
            .spawn(move || self.run_isolated(&env, reporter, shutdown))
    }

    fn run_isolated(self, env: &UnitEnvironment, reporter: TallyReporter, shutdown: ShutdownSignal) {
        let slice = self.slice;

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(slice = slice, error = %e, "Failed to start unit runtime");
                reporter.report(UnitTally::new(slice));
                return;
            }
        };

        ACTIVE_UNITS.inc();
        let tally = runtime.block_on(async {
            match env.request_context() {
                Ok(ctx) => Some(self.run(Rc::new(ctx), shutdown).await),
                Err(e) => {
                    error!(slice = slice, error = %e, "Failed to build unit HTTP client");
                    None
                }
            }
        });
        // drops any aborted request futures still parked on this runtime
        drop(runtime);
        ACTIVE_UNITS.dec();

        let tally = tally.unwrap_or_else(|| UnitTally::new(slice));
        let result = if tally.terminated { "terminated" } else { "completed" };
        EXECUTION_UNITS_TOTAL.with_label_values(&[result]).inc();

        if tally.terminated && env.accounting == DrainAccounting::DiscardTerminated {
            reporter.discard(slice);
        } else {
            reporter.report(tally);
        }
    }

    /// Fire every request of the slice and wait for them to resolve, or for
    /// `shutdown` to flip to `true`, whichever comes first.
    ///
    /// Must be polled from a single-threaded context; the requests are
    /// spawned onto a [`LocalSet`] owned by this call.
    pub async fn run(self, ctx: Rc<RequestContext>, mut shutdown: ShutdownSignal) -> UnitTally {
        let ExecutionUnit {
            slice,
            schedule,
            slice_start,
        } = self;
        let planned = schedule.len();
        let tally = Rc::new(RefCell::new(UnitTally::new(slice)));

        info!(
            slice = slice,
            planned = planned,
            last_offset_ms = schedule.last().map(|d| d.as_millis() as u64),
            "Execution unit starting"
        );

        let local = LocalSet::new();
        let terminated = local
            .run_until(async {
                let mut tasks = JoinSet::new();
                for offset in schedule.into_offsets() {
                    let task = RequestTask::new(slice_start, offset);
                    let ctx = Rc::clone(&ctx);
                    let tally = Rc::clone(&tally);
                    tasks.spawn_local(async move { task.run(&ctx, &tally).await });
                }

                let terminated = tokio::select! {
                    biased;
                    _ = drain(&mut tasks, slice) => false,
                    _ = wait_for_shutdown(&mut shutdown) => true,
                };

                if terminated {
                    debug!(slice = slice, abandoned = tasks.len(), "Aborting unresolved requests");
                    tasks.abort_all();
                }
                terminated
            })
            .await;
        // abandoned request futures go away with the LocalSet
        drop(local);

        let mut tally = tally.borrow().clone();
        tally.terminated = terminated;

        if terminated {
            warn!(
                slice = slice,
                planned = planned,
                issued = tally.issued,
                succeeded = tally.succeeded,
                "Execution unit terminated by drain timeout"
            );
        } else {
            info!(
                slice = slice,
                issued = tally.issued,
                succeeded = tally.succeeded,
                "Execution unit finished"
            );
        }

        tally
    }
}

async fn drain(tasks: &mut JoinSet<RequestOutcome>, slice: usize) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                error!(slice = slice, error = %e, "Request task panicked");
            }
        }
    }
}

/// Resolves once the signal reads `true`. A dropped sender never fires.
async fn wait_for_shutdown(shutdown: &mut ShutdownSignal) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
