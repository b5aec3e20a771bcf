//! Handle factories for the two pooled topologies

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::allocator::HandleFactory;
use crate::config::LaunchOptions;
use crate::error::WorkerError;
use crate::worker::{Browser, Launcher, Page};

/// Creates standalone worker processes
pub struct BrowserFactory {
    launcher: Arc<dyn Launcher>,
    options: LaunchOptions,
}

impl BrowserFactory {
    pub fn new(launcher: Arc<dyn Launcher>, options: LaunchOptions) -> Self {
        Self { launcher, options }
    }
}

#[async_trait]
impl HandleFactory for BrowserFactory {
    type Handle = Arc<dyn Browser>;

    async fn create(&self) -> Result<Self::Handle, WorkerError> {
        self.launcher.launch(&self.options).await
    }

    async fn destroy(&self, handle: Self::Handle) -> Result<(), WorkerError> {
        handle.close().await
    }

    fn is_healthy(&self, handle: &Self::Handle) -> bool {
        handle.is_connected()
    }
}

/// Lazily launched worker process shared by every page of a pool
///
/// Concurrent first callers are coalesced onto a single launch. A failed
/// launch is not memoized; the next caller tries again.
pub struct SharedBrowser {
    launcher: Arc<dyn Launcher>,
    options: LaunchOptions,
    cell: OnceCell<Arc<dyn Browser>>,
    closed: AtomicBool,
}

impl SharedBrowser {
    pub fn new(launcher: Arc<dyn Launcher>, options: LaunchOptions) -> Self {
        Self {
            launcher,
            options,
            cell: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the shared process, launching it on first use
    pub async fn get(&self) -> Result<Arc<dyn Browser>, WorkerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WorkerError::Closed);
        }

        let browser = self
            .cell
            .get_or_try_init(|| async {
                info!("Launching shared worker process");
                self.launcher.launch(&self.options).await
            })
            .await?;
        Ok(Arc::clone(browser))
    }

    /// Close the shared process; later calls are no-ops
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(browser) = self.cell.get() {
            debug!("Closing shared worker process");
            if let Err(e) = browser.close().await {
                warn!(error = %e, "Failed to close shared worker process");
            }
        }
    }
}

/// Opens pages inside a [`SharedBrowser`]
pub struct PageFactory {
    browser: Arc<SharedBrowser>,
}

impl PageFactory {
    pub fn new(browser: Arc<SharedBrowser>) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl HandleFactory for PageFactory {
    type Handle = Arc<dyn Page>;

    async fn create(&self) -> Result<Self::Handle, WorkerError> {
        self.browser.get().await?.new_page().await
    }

    async fn destroy(&self, handle: Self::Handle) -> Result<(), WorkerError> {
        if handle.is_closed() {
            return Ok(());
        }
        handle.close().await
    }

    fn is_healthy(&self, handle: &Self::Handle) -> bool {
        !handle.is_closed()
    }
}
