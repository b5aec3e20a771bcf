pub mod bench;
pub mod config;

use anyhow::{Context, Result};
use clap::Args;
use renderpool_engine::{EngineConfig, StrategyKind};

/// Engine settings shared by every command; unset flags fall back to the environment
#[derive(Debug, Clone, Default, Args)]
pub struct EngineArgs {
    /// Pooling topology (dedicated-process, process-pool, page-pool)
    #[arg(long)]
    pub strategy: Option<String>,

    /// Pool size for pooled topologies
    #[arg(long)]
    pub workers: Option<usize>,

    /// Conversion deadline in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl EngineArgs {
    /// Resolve the effective engine configuration
    pub fn resolve(&self) -> Result<EngineConfig> {
        let mut config =
            EngineConfig::from_env_unvalidated().context("Invalid RENDERPOOL_* environment")?;

        if let Some(strategy) = &self.strategy {
            config.strategy = strategy
                .parse::<StrategyKind>()
                .context("Invalid --strategy")?;
        }
        if let Some(workers) = self.workers {
            config.number_of_workers = workers;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout = std::time::Duration::from_millis(timeout_ms);
        }

        config.validate().context("Invalid engine configuration")?;
        Ok(config)
    }
}
