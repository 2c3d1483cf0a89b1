//! The open-loop workload driver.
//!
//! [`WorkloadScheduler::run`] starts one execution unit per plan entry at a
//! fixed one-second cadence, without waiting for earlier units to finish.
//! After the last slice it gives outstanding units up to the drain timeout
//! to finish, terminates whatever is still running, and returns the
//! aggregate.
//!
//! ```text
//! Idle -> Spawning -> Draining -> Finalizing -> Done
//! ```

use std::fmt;
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::aggregate::{ResultAggregate, ResultAggregator};
use crate::arrival::ArrivalSchedule;
use crate::classifier::ResponseClassifier;
use crate::client::{build_client, log_client_config, ClientBuildError, ClientConfig};
use crate::payload::PayloadSource;
use crate::plan::WorkloadPlan;
use crate::unit::{DrainAccounting, ExecutionUnit, UnitEnvironment};

/// Length of one time-slice.
pub const SLICE_INTERVAL: Duration = Duration::from_secs(1);

/// How long terminated units get to hand in their tallies.
pub const TERMINATION_GRACE: Duration = Duration::from_secs(5);

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// Driver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Spawning,
    Draining,
    Finalizing,
    Done,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Spawning => "spawning",
            SchedulerState::Draining => "draining",
            SchedulerState::Finalizing => "finalizing",
            SchedulerState::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// Settings for a [`WorkloadScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub endpoint: String,
    pub drain_timeout: Duration,
    pub seed: u64,
    pub content_type: String,
    pub accounting: DrainAccounting,
    pub client: ClientConfig,
}

impl SchedulerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            seed: DEFAULT_SEED,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            accounting: DrainAccounting::default(),
            client: ClientConfig::default(),
        }
    }

    pub fn drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn accounting(mut self, accounting: DrainAccounting) -> Self {
        self.accounting = accounting;
        self
    }
}

/// Drives a workload plan against the target.
pub struct WorkloadScheduler {
    env: Arc<UnitEnvironment>,
    drain_timeout: Duration,
    rng: StdRng,
    state: SchedulerState,
}

impl WorkloadScheduler {
    /// Seeds the arrival generator and checks that the client configuration
    /// builds. Units build their own clients from the same configuration.
    pub fn new(
        config: SchedulerConfig,
        payloads: Arc<dyn PayloadSource>,
        classifier: Arc<dyn ResponseClassifier>,
    ) -> Result<Self, ClientBuildError> {
        let probe = build_client(&config.client)?;
        log_client_config(&config.client, &probe.parsed_headers);

        let env = UnitEnvironment {
            client_config: config.client,
            endpoint: config.endpoint,
            content_type: config.content_type,
            payloads,
            classifier,
            accounting: config.accounting,
        };

        Ok(Self {
            env: Arc::new(env),
            drain_timeout: config.drain_timeout,
            rng: StdRng::seed_from_u64(config.seed),
            state: SchedulerState::Idle,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    fn transition(&mut self, next: SchedulerState) {
        info!(from = %self.state, to = %next, "Scheduler state change");
        self.state = next;
    }

    /// Run the whole plan and return what the units reported.
    ///
    /// Request failures never surface here; they only lower
    /// `total_succeeded` relative to `total_issued`.
    pub async fn run(&mut self, plan: &WorkloadPlan) -> ResultAggregate {
        if self.state != SchedulerState::Idle {
            self.state = SchedulerState::Idle;
        }

        info!(
            endpoint = %self.env.endpoint,
            slices = plan.len(),
            total_requests = plan.total_requests(),
            drain_timeout = ?self.drain_timeout,
            "Starting workload"
        );

        self.transition(SchedulerState::Spawning);
        let mut aggregator = ResultAggregator::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(plan.len());

        let mut next_slice = Instant::now();
        for (slice, &rate) in plan.rates().iter().enumerate() {
            time::sleep_until(next_slice).await;

            let schedule = ArrivalSchedule::generate(rate, &mut self.rng);
            debug!(slice = slice, rate = rate, "Spawning execution unit");

            let unit = ExecutionUnit::new(slice, schedule, next_slice);
            match unit.spawn(
                Arc::clone(&self.env),
                aggregator.reporter(),
                shutdown_rx.clone(),
            ) {
                Ok(handle) => handles.push(handle),
                Err(e) => error!(slice = slice, rate = rate, error = %e, "Failed to spawn execution unit"),
            }

            next_slice += SLICE_INTERVAL;
        }
        drop(shutdown_rx);

        if !plan.is_empty() {
            // the last slice gets its full second before the drain clock starts
            time::sleep_until(next_slice).await;
        }

        self.transition(SchedulerState::Draining);
        let drained = time::timeout(self.drain_timeout, aggregator.collect())
            .await
            .is_ok();

        self.transition(SchedulerState::Finalizing);
        if !drained {
            let outstanding = handles.len().saturating_sub(aggregator.units_reported());
            warn!(
                outstanding = outstanding,
                "Drain timeout expired, terminating outstanding units"
            );
            let _ = shutdown_tx.send(true);

            if time::timeout(TERMINATION_GRACE, aggregator.collect())
                .await
                .is_err()
            {
                warn!("Some terminated units did not report in time; their results are dropped");
            }
        }
        reap(handles);

        let aggregate = aggregator.finish();
        self.transition(SchedulerState::Done);
        aggregate
    }
}

/// Join unit threads that have exited and log any that panicked.
/// Threads still running are detached.
fn reap(handles: Vec<thread::JoinHandle<()>>) {
    for handle in handles {
        if !handle.is_finished() {
            continue;
        }
        let name = handle.thread().name().unwrap_or("unit").to_string();
        if handle.join().is_err() {
            error!(unit = %name, "Execution unit panicked");
        }
    }
}

/// Run `plan` against `endpoint` with default settings and return
/// `(total issued, total succeeded)`.
pub async fn run_workload(
    endpoint: impl Into<String>,
    plan: &WorkloadPlan,
    drain_timeout: Duration,
    payloads: Arc<dyn PayloadSource>,
    classifier: Arc<dyn ResponseClassifier>,
) -> Result<(u64, u64), ClientBuildError> {
    let config = SchedulerConfig::new(endpoint).drain_timeout(drain_timeout);
    let mut scheduler = WorkloadScheduler::new(config, payloads, classifier)?;
    Ok(scheduler.run(plan).await.totals())
}
