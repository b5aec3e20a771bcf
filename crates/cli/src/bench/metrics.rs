//! Metrics collection for load tests
//!
//! Collects latency distributions, throughput and outcome counts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use renderpool_engine::{ConversionError, FailureKind};

/// Histogram for latency measurements
#[derive(Debug)]
pub struct LatencyHistogram {
    /// Raw samples (for percentile calculation)
    samples: Mutex<Vec<Duration>>,
    /// Sum of all samples (for mean calculation)
    sum_micros: AtomicU64,
    /// Count of samples
    count: AtomicU64,
    /// Min latency observed
    min_micros: AtomicU64,
    /// Max latency observed
    max_micros: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            min_micros: AtomicU64::new(u64::MAX),
            max_micros: AtomicU64::new(0),
        }
    }

    /// Record a latency sample
    pub fn record(&self, duration: Duration) {
        let micros = duration.as_micros() as u64;

        self.samples.lock().push(duration);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.min_micros.fetch_min(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.sum_micros.load(Ordering::Relaxed) / count)
    }

    pub fn min(&self) -> Duration {
        let min = self.min_micros.load(Ordering::Relaxed);
        if min == u64::MAX {
            Duration::ZERO
        } else {
            Duration::from_micros(min)
        }
    }

    pub fn max(&self) -> Duration {
        Duration::from_micros(self.max_micros.load(Ordering::Relaxed))
    }

    /// Calculate percentile (0.0 to 1.0)
    pub fn percentile(&self, p: f64) -> Duration {
        let mut samples = self.samples.lock();
        if samples.is_empty() {
            return Duration::ZERO;
        }

        samples.sort();
        let idx = ((samples.len() as f64 * p) as usize).min(samples.len() - 1);
        samples[idx]
    }

    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            count: self.count(),
            mean: self.mean(),
            min: self.min(),
            max: self.max(),
            p50: self.percentile(0.50),
            p95: self.percentile(0.95),
            p99: self.percentile(0.99),
        }
    }
}

/// Summary statistics for latency
#[derive(Debug, Clone)]
pub struct LatencySummary {
    pub count: u64,
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

/// Outcome counts by failure class
#[derive(Debug, Default)]
pub struct OutcomeCounter {
    succeeded: AtomicU64,
    timed_out: AtomicU64,
    crashed: AtomicU64,
    failed: AtomicU64,
}

impl OutcomeCounter {
    pub fn record<T>(&self, result: &Result<T, ConversionError>) {
        let counter = match result {
            Ok(_) => &self.succeeded,
            Err(e) => match e.kind() {
                FailureKind::Timeout => &self.timed_out,
                FailureKind::Crash => &self.crashed,
                FailureKind::Application => &self.failed,
            },
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    pub fn crashed(&self) -> u64 {
        self.crashed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.succeeded() + self.timed_out() + self.crashed() + self.failed()
    }
}

/// Aggregated load-test metrics
pub struct BenchmarkMetrics {
    /// Name of the run
    pub name: String,
    /// Submit-to-answer latency per task
    pub end_to_end: LatencyHistogram,
    /// Outcome counts
    pub outcomes: OutcomeCounter,
    /// Start time
    pub start: Instant,
}

impl BenchmarkMetrics {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            end_to_end: LatencyHistogram::new(),
            outcomes: OutcomeCounter::default(),
            start: Instant::now(),
        }
    }

    /// Record one finished task
    pub fn record<T>(&self, result: &Result<T, ConversionError>, latency: Duration) {
        self.end_to_end.record(latency);
        self.outcomes.record(result);
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Finished tasks per second
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.outcomes.total() as f64 / elapsed
    }
}
