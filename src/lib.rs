//! Open-loop, Poisson-arrival load generation against an HTTP inference
//! endpoint.
//!
//! A [`WorkloadPlan`](plan::WorkloadPlan) lists one request rate per second.
//! For each second the [`WorkloadScheduler`](scheduler::WorkloadScheduler)
//! draws exponentially distributed arrival offsets and hands them to an
//! isolated [`ExecutionUnit`](unit::ExecutionUnit), which fires every request
//! at its scheduled instant regardless of how earlier requests are doing.
//! Units report their tallies to a [`ResultAggregator`](aggregate::ResultAggregator)
//! over a channel; the driver returns the summed totals.

pub mod aggregate;
pub mod arrival;
pub mod classifier;
pub mod client;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod payload;
pub mod percentiles;
pub mod plan;
pub mod request;
pub mod scheduler;
pub mod unit;
pub mod utils;
pub mod yaml_config;
