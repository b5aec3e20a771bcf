//! Load-test support
//!
//! Drives an engine over the simulated backend and summarises latency,
//! throughput and worker churn.

mod metrics;
mod report;
mod runner;

pub use metrics::BenchmarkMetrics;
pub use report::BenchmarkReport;
pub use runner::{BenchmarkRunner, ScenarioConfig};
