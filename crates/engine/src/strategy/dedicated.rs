use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{settle, Strategy};
use crate::config::{LaunchOptions, StrategyKind};
use crate::conversion::{convert, timeout_message, ConversionOutput, ConversionTask, RenderTarget};
use crate::error::{AllocatorError, ConversionError};
use crate::reliability::{run_with_timeout, TaskContext};
use crate::worker::Launcher;

/// Launches a fresh worker process for every task and closes it afterwards
///
/// Launching happens inside the deadline. The process is closed whether
/// the task succeeds, fails or is abandoned.
pub struct DedicatedProcessStrategy {
    launcher: Arc<dyn Launcher>,
    options: LaunchOptions,
    closed: AtomicBool,
}

impl DedicatedProcessStrategy {
    pub fn new(launcher: Arc<dyn Launcher>, options: LaunchOptions) -> Self {
        Self {
            launcher,
            options,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Strategy for DedicatedProcessStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DedicatedProcess
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        task: ConversionTask,
    ) -> Result<ConversionOutput, ConversionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AllocatorError::ShutDown.into());
        }

        let message = timeout_message(task.kind, ctx);
        let launcher = Arc::clone(&self.launcher);
        let options = self.options.clone();

        let result = run_with_timeout(ctx, message.clone(), move |ctx| async move {
            let browser = launcher.launch(&options).await?;

            let result = if ctx.is_abandoned() {
                Ok(None)
            } else {
                convert(&ctx, RenderTarget::Browser(Arc::clone(&browser)), &task).await
            };

            match browser.close().await {
                Ok(()) => debug!(task_id = %ctx.task_id, "Closed dedicated worker"),
                Err(e) => warn!(task_id = %ctx.task_id, error = %e, "Failed to close dedicated worker"),
            }
            result
        })
        .await;

        settle(result, message)
    }

    async fn shutdown(&self) {
        // In-flight tasks close their own processes
        self.closed.store(true, Ordering::Release);
    }
}
