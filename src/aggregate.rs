//! Run-wide result aggregation.
//!
//! Execution units never share counters. Each unit fills a private
//! [`UnitTally`] and sends it once through its [`TallyReporter`]; the
//! [`ResultAggregator`] owns the only receiving end and sums what arrives.
//! Sums are order independent, so any interleaving of reports gives the
//! same totals.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::ErrorCategory;
use crate::percentiles::{LatencyHistogram, PercentileStats};

/// Counters a single execution unit accumulates for its slice.
#[derive(Debug, Clone, Default)]
pub struct UnitTally {
    /// Index of the slice within the workload plan
    pub slice: usize,

    /// Requests actually sent
    pub issued: u64,

    /// Requests classified as successful
    pub succeeded: u64,

    /// Failed requests by category, including ones that were never sent
    pub failures: BTreeMap<ErrorCategory, u64>,

    /// Send-to-classification latency of every resolved request
    pub latencies: LatencyHistogram,

    /// Set when the unit was cut short by the drain timeout
    pub terminated: bool,
}

impl UnitTally {
    pub fn new(slice: usize) -> Self {
        Self {
            slice,
            ..Self::default()
        }
    }

    /// A tally with bare counts, no failure breakdown or latencies.
    pub fn from_counts(slice: usize, issued: u64, succeeded: u64) -> Self {
        Self {
            slice,
            issued,
            succeeded,
            ..Self::default()
        }
    }

    pub fn record_issued(&mut self) {
        self.issued += 1;
    }

    pub fn record_success(&mut self, latency: Duration) {
        self.succeeded += 1;
        self.latencies.record(latency);
    }

    pub fn record_failure(&mut self, category: ErrorCategory, latency: Option<Duration>) {
        *self.failures.entry(category).or_insert(0) += 1;
        if let Some(latency) = latency {
            self.latencies.record(latency);
        }
    }
}

/// Sending half handed to one execution unit.
///
/// Both methods consume the reporter, so a unit reports at most once.
#[derive(Debug)]
pub struct TallyReporter {
    sender: Option<mpsc::UnboundedSender<UnitTally>>,
}

impl TallyReporter {
    /// Deliver this unit's tally to the aggregator.
    pub fn report(self, tally: UnitTally) {
        debug!(
            slice = tally.slice,
            issued = tally.issued,
            succeeded = tally.succeeded,
            terminated = tally.terminated,
            "Reporting unit tally"
        );
        match self.sender {
            // the receiver only goes away once the run has been finalized
            Some(sender) => {
                let _ = sender.send(tally);
            }
            None => warn!(slice = tally.slice, "Tally reported after aggregation closed"),
        }
    }

    /// Drop this unit's results without reporting them.
    pub fn discard(self, slice: usize) {
        debug!(slice = slice, "Discarding unit tally");
    }
}

/// Collects tallies from every unit of a run.
///
/// Hand out reporters with [`reporter`](Self::reporter), then call
/// [`collect`](Self::collect) to close intake and absorb reports until every
/// reporter is gone. `collect` is cancel safe: whatever arrived before a
/// timeout stays absorbed, and calling it again resumes where it left off.
#[derive(Debug)]
pub struct ResultAggregator {
    sender: Option<mpsc::UnboundedSender<UnitTally>>,
    receiver: mpsc::UnboundedReceiver<UnitTally>,
    totals: Accumulator,
}

impl ResultAggregator {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: Some(sender),
            receiver,
            totals: Accumulator::default(),
        }
    }

    /// A reporter for one unit. Reporters may live on any thread.
    pub fn reporter(&self) -> TallyReporter {
        TallyReporter {
            sender: self.sender.clone(),
        }
    }

    /// Close intake and absorb reports until every reporter has reported or
    /// been dropped.
    pub async fn collect(&mut self) {
        self.sender = None;
        while let Some(tally) = self.receiver.recv().await {
            self.totals.absorb(tally);
        }
    }

    /// Units whose tallies have been absorbed so far.
    pub fn units_reported(&self) -> usize {
        self.totals.units_reported
    }

    /// Results from the reports absorbed so far.
    pub fn snapshot(&self) -> ResultAggregate {
        self.totals.to_aggregate()
    }

    /// Wait for every outstanding reporter, then return the summed results.
    pub async fn finalize(mut self) -> ResultAggregate {
        self.collect().await;
        self.finish()
    }

    /// Return the results absorbed so far without waiting for stragglers.
    pub fn finish(self) -> ResultAggregate {
        let aggregate = self.totals.to_aggregate();
        info!(
            total_issued = aggregate.total_issued,
            total_succeeded = aggregate.total_succeeded,
            units_reported = aggregate.units_reported,
            units_terminated = aggregate.units_terminated,
            "Aggregation finalized"
        );
        aggregate
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    issued: u64,
    succeeded: u64,
    failures: BTreeMap<ErrorCategory, u64>,
    latencies: LatencyHistogram,
    units_reported: usize,
    units_terminated: usize,
}

impl Accumulator {
    fn absorb(&mut self, tally: UnitTally) {
        self.issued += tally.issued;
        self.succeeded += tally.succeeded;
        for (category, count) in tally.failures {
            *self.failures.entry(category).or_insert(0) += count;
        }
        self.latencies.merge(&tally.latencies);
        self.units_reported += 1;
        if tally.terminated {
            self.units_terminated += 1;
        }
    }

    fn to_aggregate(&self) -> ResultAggregate {
        ResultAggregate {
            total_issued: self.issued,
            total_succeeded: self.succeeded,
            failures: self.failures.clone(),
            units_reported: self.units_reported,
            units_terminated: self.units_terminated,
            latency: self.latencies.stats(),
        }
    }
}

/// Final results of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultAggregate {
    pub total_issued: u64,
    pub total_succeeded: u64,
    pub failures: BTreeMap<ErrorCategory, u64>,
    pub units_reported: usize,
    pub units_terminated: usize,
    pub latency: Option<PercentileStats>,
}

impl ResultAggregate {
    /// Issued requests that did not succeed.
    pub fn total_failed(&self) -> u64 {
        self.total_issued.saturating_sub(self.total_succeeded)
    }

    /// Fraction of issued requests that succeeded; 0 when nothing was issued.
    pub fn success_ratio(&self) -> f64 {
        if self.total_issued == 0 {
            0.0
        } else {
            self.total_succeeded as f64 / self.total_issued as f64
        }
    }

    /// `(total issued, total succeeded)`
    pub fn totals(&self) -> (u64, u64) {
        (self.total_issued, self.total_succeeded)
    }

    pub fn format_summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("  Requests issued:    {}\n", self.total_issued));
        out.push_str(&format!(
            "  Requests succeeded: {} ({:.1}%)\n",
            self.total_succeeded,
            self.success_ratio() * 100.0
        ));
        out.push_str(&format!("  Requests failed:    {}\n", self.total_failed()));
        out.push_str(&format!(
            "  Units reported:     {} ({} terminated by drain timeout)\n",
            self.units_reported, self.units_terminated
        ));
        if let Some(latency) = &self.latency {
            out.push_str(&format!("  Latency: {}\n", latency.format()));
        }
        for (category, count) in &self.failures {
            out.push_str(&format!("    {:<32} {}\n", category.description(), count));
        }
        out
    }
}
