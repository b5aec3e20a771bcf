// Load test over the simulated backend

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use renderpool_engine::sim::{SimBehavior, SimLauncher};
use renderpool_engine::{Engine, OutputKind};
use tracing::warn;

use super::EngineArgs;
use crate::bench::{BenchmarkReport, BenchmarkRunner, ScenarioConfig};
use crate::output::OutputFormat;

#[derive(Debug, Clone, Args)]
pub struct BenchArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Number of tasks to submit
    #[arg(long, default_value = "1000")]
    pub tasks: u64,

    /// Tasks in flight at once
    #[arg(long, short, default_value = "16")]
    pub concurrency: usize,

    /// Simulated render time per task in milliseconds
    #[arg(long, default_value = "20")]
    pub latency_ms: u64,

    /// Random extra render time, up to this many milliseconds
    #[arg(long, default_value = "0")]
    pub jitter_ms: u64,

    /// Simulated process launch time in milliseconds
    #[arg(long, default_value = "0")]
    pub launch_ms: u64,

    /// Probability in [0, 1] that a render crashes its worker
    #[arg(long, default_value = "0")]
    pub crash_rate: f64,

    /// Capture images instead of printing PDFs
    #[arg(long)]
    pub image: bool,
}

impl BenchArgs {
    fn behavior(&self) -> Result<SimBehavior> {
        if !(0.0..=1.0).contains(&self.crash_rate) {
            anyhow::bail!("--crash-rate must be between 0 and 1, got {}", self.crash_rate);
        }
        Ok(SimBehavior {
            launch_latency: Duration::from_millis(self.launch_ms),
            render_latency: Duration::from_millis(self.latency_ms),
            render_jitter: Duration::from_millis(self.jitter_ms),
            crash_rate: self.crash_rate,
            ..SimBehavior::default()
        })
    }
}

pub async fn run(args: BenchArgs, output: OutputFormat) -> Result<()> {
    let config = args.engine.resolve()?;
    let launcher = SimLauncher::new(args.behavior()?);
    let counters = launcher.counters();

    let engine = Arc::new(
        Engine::new(config.clone(), Arc::new(launcher)).context("Failed to build engine")?,
    );

    let runner = BenchmarkRunner::new(ScenarioConfig {
        name: format!("{}-{}x{}", config.strategy, config.number_of_workers, args.tasks),
        tasks: args.tasks,
        concurrency: args.concurrency,
        kind: if args.image {
            OutputKind::Image
        } else {
            OutputKind::Pdf
        },
    });

    let interrupted = tokio::select! {
        _ = runner.run(Arc::clone(&engine)) => false,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received shutdown signal, stopping benchmark");
            true
        }
    };

    engine.shutdown().await;

    let report = BenchmarkReport::new(
        runner.metrics(),
        config,
        args.concurrency,
        &counters,
        interrupted,
    );
    if output.is_text() {
        report.print_text();
        Ok(())
    } else {
        output.print_value(&report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        bench: BenchArgs,
    }

    #[test]
    fn test_defaults() {
        let args = Harness::parse_from(["bench"]).bench;
        assert_eq!(args.tasks, 1000);
        assert_eq!(args.concurrency, 16);
        let behavior = args.behavior().unwrap();
        assert_eq!(behavior.render_latency, Duration::from_millis(20));
        assert_eq!(behavior.crash_rate, 0.0);
    }

    #[test]
    fn test_rejects_out_of_range_crash_rate() {
        let args = Harness::parse_from(["bench", "--crash-rate", "1.5"]).bench;
        assert!(args.behavior().is_err());
    }

    #[test]
    fn test_engine_flags() {
        let args = Harness::parse_from([
            "bench",
            "--strategy",
            "page-pool",
            "--workers",
            "3",
            "--timeout-ms",
            "500",
        ])
        .bench;
        assert_eq!(args.engine.strategy.as_deref(), Some("page-pool"));
        assert_eq!(args.engine.workers, Some(3));
        assert_eq!(args.engine.timeout_ms, Some(500));
    }
}
