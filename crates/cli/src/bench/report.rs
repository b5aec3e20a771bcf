//! Load-test report

use std::time::Duration;

use chrono::{DateTime, Utc};
use renderpool_engine::sim::SimCounters;
use renderpool_engine::EngineConfig;
use serde::Serialize;

use super::metrics::{BenchmarkMetrics, LatencySummary};
use crate::output::{print_field, print_section};

/// Latency figures in milliseconds
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyReport {
    pub mean_ms: f64,
    pub min_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl From<LatencySummary> for LatencyReport {
    fn from(s: LatencySummary) -> Self {
        Self {
            mean_ms: ms(s.mean),
            min_ms: ms(s.min),
            p50_ms: ms(s.p50),
            p95_ms: ms(s.p95),
            p99_ms: ms(s.p99),
            max_ms: ms(s.max),
        }
    }
}

/// What the engine did with the simulated workers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    pub processes_launched: u64,
    pub processes_closed: u64,
    pub pages_opened: u64,
    pub pages_closed: u64,
    pub crashes: u64,
    pub peak_active_renders: usize,
}

impl From<&SimCounters> for WorkerReport {
    fn from(c: &SimCounters) -> Self {
        Self {
            processes_launched: c.launches(),
            processes_closed: c.browsers_closed(),
            pages_opened: c.pages_opened(),
            pages_closed: c.pages_closed(),
            crashes: c.crashes(),
            peak_active_renders: c.peak_active_renders(),
        }
    }
}

/// Summary of one load-test run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkReport {
    pub name: String,
    pub generated_at: DateTime<Utc>,
    pub config: EngineConfig,
    pub concurrency: usize,
    pub tasks: u64,
    pub succeeded: u64,
    pub timed_out: u64,
    pub crashed: u64,
    pub failed: u64,
    pub interrupted: bool,
    pub duration_ms: f64,
    pub throughput_per_sec: f64,
    pub latency: LatencyReport,
    pub workers: WorkerReport,
}

impl BenchmarkReport {
    pub fn new(
        metrics: &BenchmarkMetrics,
        config: EngineConfig,
        concurrency: usize,
        counters: &SimCounters,
        interrupted: bool,
    ) -> Self {
        let outcomes = &metrics.outcomes;
        Self {
            name: metrics.name.clone(),
            generated_at: Utc::now(),
            config,
            concurrency,
            tasks: outcomes.total(),
            succeeded: outcomes.succeeded(),
            timed_out: outcomes.timed_out(),
            crashed: outcomes.crashed(),
            failed: outcomes.failed(),
            interrupted,
            duration_ms: ms(metrics.elapsed()),
            throughput_per_sec: metrics.throughput(),
            latency: metrics.end_to_end.summary().into(),
            workers: counters.into(),
        }
    }

    /// Print the report as human readable text
    pub fn print_text(&self) {
        println!("Benchmark: {}", self.name);
        if self.interrupted {
            println!("(interrupted; partial results)");
        }

        print_section("Engine");
        print_field("Strategy", &self.config.strategy.to_string());
        print_field("Workers", &self.config.number_of_workers.to_string());
        print_field("Timeout", &format!("{}ms", self.config.timeout.as_millis()));
        print_field("Concurrency", &self.concurrency.to_string());

        print_section("Outcomes");
        print_field("Tasks", &self.tasks.to_string());
        print_field("Succeeded", &self.succeeded.to_string());
        print_field("Timed out", &self.timed_out.to_string());
        print_field("Crashed", &self.crashed.to_string());
        print_field("Failed", &self.failed.to_string());
        print_field("Duration", &format!("{:.1}ms", self.duration_ms));
        print_field("Throughput", &format!("{:.1} tasks/sec", self.throughput_per_sec));

        print_section("Latency");
        print_field("Mean", &format!("{:.2}ms", self.latency.mean_ms));
        print_field("Min", &format!("{:.2}ms", self.latency.min_ms));
        print_field("P50", &format!("{:.2}ms", self.latency.p50_ms));
        print_field("P95", &format!("{:.2}ms", self.latency.p95_ms));
        print_field("P99", &format!("{:.2}ms", self.latency.p99_ms));
        print_field("Max", &format!("{:.2}ms", self.latency.max_ms));

        print_section("Workers");
        print_field("Processes launched", &self.workers.processes_launched.to_string());
        print_field("Processes closed", &self.workers.processes_closed.to_string());
        print_field("Pages opened", &self.workers.pages_opened.to_string());
        print_field("Pages closed", &self.workers.pages_closed.to_string());
        print_field("Crashes", &self.workers.crashes.to_string());
        print_field(
            "Peak active renders",
            &self.workers.peak_active_renders.to_string(),
        );
    }
}
