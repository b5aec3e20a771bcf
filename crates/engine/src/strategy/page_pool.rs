use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{settle, Strategy};
use crate::config::{LaunchOptions, StrategyKind};
use crate::conversion::{convert, timeout_message, ConversionOutput, ConversionTask, RenderTarget};
use crate::error::{ConfigError, ConversionError};
use crate::pool::{Allocator, PageFactory, PoolStatus, SharedBrowser};
use crate::reliability::{run_with_timeout, TaskContext};
use crate::worker::Launcher;

/// Multiplexes tasks over a bounded pool of pages inside one shared process
///
/// The shared process is launched on first use. A page that crashed, timed
/// out or was closed underneath a task is recycled, since its state can no
/// longer be trusted for the next task.
pub struct PagePoolStrategy {
    browser: Arc<SharedBrowser>,
    allocator: Allocator<PageFactory>,
}

impl PagePoolStrategy {
    pub fn new(
        launcher: Arc<dyn Launcher>,
        options: LaunchOptions,
        size: usize,
    ) -> Result<Self, ConfigError> {
        let browser = Arc::new(SharedBrowser::new(launcher, options));
        let allocator = Allocator::new(PageFactory::new(Arc::clone(&browser)), size)?;
        Ok(Self { browser, allocator })
    }
}

#[async_trait]
impl Strategy for PagePoolStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PagePool
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
            let page = Arc::clone(lease.handle());
            let result = convert(&ctx, RenderTarget::Page(Arc::clone(&page)), &task).await;

            let tainted = ctx.is_abandoned()
                || page.is_closed()
                || matches!(&result, Err(e) if e.is_crash() || e.is_timeout());
            if tainted {
                warn!(
                    task_id = %ctx.task_id,
                    slot = lease.slot(),
                    "Page unusable, recycling"
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
        let report = self.allocator.shutdown().await;
        self.browser.close().await;
        info!(
            pages_closed = report.destroyed,
            pages_failed = report.failed,
            "Page pool shut down"
        );
    }

    fn status(&self) -> Option<PoolStatus> {
        Some(self.allocator.status())
    }
}
