//! Workload plans: one request rate per second.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while parsing a workload plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Workload plan is empty")]
    Empty,

    #[error("Invalid rate '{value}' at position {index}: must be a non-negative integer")]
    InvalidRate { index: usize, value: String },
}

/// Requests per second for each successive second of the run.
///
/// Order is temporal order. A zero entry is a valid idle second.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct WorkloadPlan(Vec<u32>);

impl WorkloadPlan {
    pub fn new(rates: Vec<u32>) -> Self {
        Self(rates)
    }

    pub fn rates(&self) -> &[u32] {
        &self.0
    }

    /// Number of one-second slices.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of requests the plan asks for.
    pub fn total_requests(&self) -> u64 {
        self.0.iter().map(|&rate| u64::from(rate)).sum()
    }

    /// Highest single-second rate.
    pub fn peak_rate(&self) -> u32 {
        self.0.iter().copied().max().unwrap_or(0)
    }
}

impl From<Vec<u32>> for WorkloadPlan {
    fn from(rates: Vec<u32>) -> Self {
        Self(rates)
    }
}

/// Parses rates separated by commas and/or whitespace, e.g. `"5,5,5"` or `"5 10 20"`.
impl FromStr for WorkloadPlan {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rates = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .enumerate()
            .map(|(index, token)| {
                token.parse::<u32>().map_err(|_| PlanError::InvalidRate {
                    index,
                    value: token.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if rates.is_empty() {
            return Err(PlanError::Empty);
        }

        Ok(Self(rates))
    }
}

impl fmt::Display for WorkloadPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rates: Vec<String> = self.0.iter().map(u32::to_string).collect();
        write!(f, "[{}]", rates.join(", "))
    }
}
