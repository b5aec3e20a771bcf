//! Worker topologies
//!
//! Every strategy honours the same contract: `execute` converts one task
//! within the deadline carried by its [`TaskContext`], and `shutdown`
//! releases every worker it owns.
//!
//! - [`DedicatedProcessStrategy`] - one fresh process per task
//! - [`ProcessPoolStrategy`] - a bounded pool of long-lived processes
//! - [`PagePoolStrategy`] - a bounded pool of pages inside one shared process

mod dedicated;
mod page_pool;
mod process_pool;

use std::sync::Arc;

use async_trait::async_trait;

pub use dedicated::DedicatedProcessStrategy;
pub use page_pool::PagePoolStrategy;
pub use process_pool::ProcessPoolStrategy;

use crate::config::{EngineConfig, StrategyKind};
use crate::conversion::{ConversionOutput, ConversionTask};
use crate::error::{ConfigError, ConversionError};
use crate::pool::PoolStatus;
use crate::reliability::TaskContext;
use crate::worker::Launcher;

/// A worker topology
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Which topology this is
    fn kind(&self) -> StrategyKind;

    /// Convert `task`, answering no later than `ctx.deadline` after the
    /// work started
    async fn execute(
        &self,
        ctx: &TaskContext,
        task: ConversionTask,
    ) -> Result<ConversionOutput, ConversionError>;

    /// Release every worker; later calls are no-ops
    async fn shutdown(&self);

    /// Pool occupancy, for pooled topologies
    fn status(&self) -> Option<PoolStatus> {
        None
    }
}

/// Build the strategy selected by `config`
pub fn build_strategy(
    config: &EngineConfig,
    launcher: Arc<dyn Launcher>,
) -> Result<Arc<dyn Strategy>, ConfigError> {
    config.validate()?;

    let options = config.launch_options.clone();
    let strategy: Arc<dyn Strategy> = match config.strategy {
        StrategyKind::DedicatedProcess => Arc::new(DedicatedProcessStrategy::new(launcher, options)),
        StrategyKind::ProcessPool => Arc::new(ProcessPoolStrategy::new(
            launcher,
            options,
            config.number_of_workers,
        )?),
        StrategyKind::PagePool => Arc::new(PagePoolStrategy::new(
            launcher,
            options,
            config.number_of_workers,
        )?),
    };
    Ok(strategy)
}

/// Turn a pipeline result into the caller's answer
///
/// The pipeline only yields `None` after abandonment, which the caller
/// observes as a timeout.
fn settle(
    result: Result<Option<ConversionOutput>, ConversionError>,
    timeout_message: String,
) -> Result<ConversionOutput, ConversionError> {
    result?.ok_or_else(|| ConversionError::timeout(timeout_message))
}
