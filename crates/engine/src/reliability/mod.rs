//! Reliability primitives for conversion tasks
//!
//! This module provides:
//! - [`TaskContext`] - per-task state with a cooperative abandoned flag
//! - [`race`] / [`run_with_timeout`] - deadline race whose loser is discarded

mod timeout;

pub use timeout::{effective_timeout, race, run_with_timeout, RaceOutcome, TaskContext};
