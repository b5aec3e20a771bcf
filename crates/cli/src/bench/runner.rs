//! Load-test runner
//!
//! Submits tasks to an [`Engine`] with bounded client concurrency and
//! records each answer.

use std::sync::Arc;
use std::time::Instant;

use renderpool_engine::{ConversionTask, Engine, OutputKind};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::metrics::BenchmarkMetrics;

/// Configuration for a load-test scenario
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Name of the scenario
    pub name: String,
    /// Total number of tasks to submit
    pub tasks: u64,
    /// Client-side concurrency (tasks in flight at once)
    pub concurrency: usize,
    /// Output kind of every task
    pub kind: OutputKind,
}

/// Runs a scenario and collects metrics
pub struct BenchmarkRunner {
    config: ScenarioConfig,
    metrics: Arc<BenchmarkMetrics>,
}

impl BenchmarkRunner {
    pub fn new(config: ScenarioConfig) -> Self {
        Self {
            metrics: Arc::new(BenchmarkMetrics::new(&config.name)),
            config,
        }
    }

    pub fn metrics(&self) -> &BenchmarkMetrics {
        &self.metrics
    }

    /// Submit every task and wait for all answers
    pub async fn run(&self, engine: Arc<Engine>) {
        info!(
            scenario = %self.config.name,
            tasks = self.config.tasks,
            concurrency = self.config.concurrency,
            "Starting benchmark"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for task_id in 0..self.config.tasks {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let engine = Arc::clone(&engine);
            let metrics = Arc::clone(&self.metrics);
            let task = ConversionTask::new(self.config.kind, format!("sim:///doc-{}.html", task_id));

            tasks.spawn(async move {
                let start = Instant::now();
                let result = engine.execute(task).await;
                metrics.record(&result, start.elapsed());
                drop(permit);
            });

            if task_id > 0 && task_id % 1000 == 0 {
                info!(
                    submitted = task_id,
                    finished = self.metrics.outcomes.total(),
                    throughput = self.metrics.throughput(),
                    "Benchmark progress"
                );
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Benchmark task panicked");
            }
        }

        info!(
            finished = self.metrics.outcomes.total(),
            elapsed_ms = self.metrics.elapsed().as_millis() as u64,
            "Benchmark complete"
        );
    }
}
