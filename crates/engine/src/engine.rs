//! Composition root
//!
//! [`Engine`] owns the selected strategy and is the only type callers need:
//! hand it tasks with [`Engine::execute`] and release everything with
//! [`Engine::shutdown`].

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::{EngineConfig, StrategyKind};
use crate::conversion::{ConversionOutput, ConversionTask};
use crate::error::{ConfigError, ConversionError};
use crate::pool::PoolStatus;
use crate::reliability::{effective_timeout, TaskContext};
use crate::strategy::{build_strategy, Strategy};
use crate::worker::Launcher;

/// Conversion engine
///
/// # Example
///
/// ```ignore
/// use renderpool_engine::prelude::*;
///
/// let config = EngineConfig::new(StrategyKind::PagePool).with_number_of_workers(4);
/// let engine = Engine::new(config, Arc::new(my_launcher))?;
///
/// let output = engine.execute(ConversionTask::pdf("file:///tmp/report.html")).await?;
/// std::fs::write("report.pdf", &output.content)?;
///
/// engine.shutdown().await;
/// ```
pub struct Engine {
    config: EngineConfig,
    strategy: Arc<dyn Strategy>,
}

impl Engine {
    /// Validate `config` and build its strategy
    pub fn new(config: EngineConfig, launcher: Arc<dyn Launcher>) -> Result<Self, ConfigError> {
        let strategy = build_strategy(&config, launcher)?;
        info!(
            strategy = %config.strategy,
            workers = config.number_of_workers,
            timeout_ms = config.timeout.as_millis() as u64,
            "Conversion engine ready"
        );
        Ok(Self { config, strategy })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Pool occupancy, for pooled topologies
    pub fn status(&self) -> Option<PoolStatus> {
        self.strategy.status()
    }

    /// Convert one task
    ///
    /// The deadline is the configured timeout, shortened by the task's own
    /// timeout when that is smaller. It bounds the work, not the time spent
    /// waiting for a free worker.
    #[instrument(skip(self, task), fields(task_id = %task.id, kind = task.kind.as_str()))]
    pub async fn execute(&self, task: ConversionTask) -> Result<ConversionOutput, ConversionError> {
        let deadline = effective_timeout(self.config.timeout, task.timeout);
        let ctx = TaskContext::new(task.id, deadline);

        debug!(url = %task.html_url, deadline_ms = deadline.as_millis() as u64, "Executing conversion");
        let result = self.strategy.execute(&ctx, task).await;

        let elapsed_ms = ctx.elapsed().as_millis() as u64;
        match &result {
            Ok(output) => info!(
                elapsed_ms,
                bytes = output.content.len(),
                content_type = %output.content_type,
                "Conversion completed"
            ),
            Err(e) if e.is_weak() => info!(elapsed_ms, error = %e, "Conversion rejected"),
            Err(e) => warn!(elapsed_ms, kind = ?e.kind(), error = %e, "Conversion failed"),
        }
        result
    }

    /// Release every worker; later calls are no-ops
    #[instrument(skip(self), fields(strategy = %self.config.strategy))]
    pub async fn shutdown(&self) {
        self.strategy.shutdown().await;
        info!("Conversion engine shut down");
    }
}
