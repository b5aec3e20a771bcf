use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{settle, Strategy};
use crate::config::{LaunchOptions, StrategyKind};
use crate::conversion::{convert, timeout_message, ConversionOutput, ConversionTask, RenderTarget};
use crate::error::{ConfigError, ConversionError};
use crate::pool::{Allocator, BrowserFactory, PoolStatus};
use crate::reliability::{run_with_timeout, TaskContext};
use crate::worker::Launcher;

/// Multiplexes tasks over a bounded pool of long-lived worker processes
///
/// A process that crashed or disconnected while serving a task is
/// recycled; any other outcome returns it to the pool. Timed-out work keeps
/// its process busy until the work notices abandonment and returns it.
pub struct ProcessPoolStrategy {
    allocator: Allocator<BrowserFactory>,
}

impl ProcessPoolStrategy {
    pub fn new(
        launcher: Arc<dyn Launcher>,
        options: LaunchOptions,
        size: usize,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            allocator: Allocator::new(BrowserFactory::new(launcher, options), size)?,
        })
    }
}

#[async_trait]
impl Strategy for ProcessPoolStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ProcessPool
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        task: ConversionTask,
    ) -> Result<ConversionOutput, ConversionError> {
        let lease = self.allocator.allocate().await?;
        let allocator = self.allocator.clone();
        let message = timeout_message(task.kind, ctx);

        let result = run_with_timeout(ctx, message.clone(), move |ctx| async move {
            let browser = Arc::clone(lease.handle());
            let result = convert(&ctx, RenderTarget::Browser(Arc::clone(&browser)), &task).await;

            let broken = matches!(&result, Err(e) if e.is_crash()) || !browser.is_connected();
            if broken {
                warn!(
                    task_id = %ctx.task_id,
                    slot = lease.slot(),
                    "Worker process unusable, recycling"
                );
                drop(allocator.recycle(lease));
            } else {
                allocator.release(lease);
            }
            result
        })
        .await;

        settle(result, message)
    }

    async fn shutdown(&self) {
        self.allocator.shutdown().await;
    }

    fn status(&self) -> Option<PoolStatus> {
        Some(self.allocator.status())
    }
}
