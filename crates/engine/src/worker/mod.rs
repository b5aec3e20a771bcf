//! Worker backend boundary
//!
//! The engine never looks inside a worker. It only launches, opens pages,
//! renders and closes through these traits:
//! - [`Launcher`] - starts a standalone worker process
//! - [`Browser`] - a running worker process
//! - [`Page`] - a lightweight handle living inside a worker process
//!
//! A real backend wraps a headless browser driver; [`crate::sim`] provides
//! an in-process simulation used by tests and the load-test harness.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::LaunchOptions;
use crate::conversion::{ImageOptions, MediaType, OutputKind, PdfOptions};
use crate::error::WorkerError;

/// When navigation is considered finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    /// The load event fired
    Load,
    /// No network connections for a short period
    NetworkIdle,
}

/// Starts standalone worker processes
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    /// Launch a new worker process
    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn Browser>, WorkerError>;
}

/// A running worker process
#[async_trait]
pub trait Browser: Send + Sync {
    /// Version string reported by the worker
    async fn version(&self) -> Result<String, WorkerError>;

    /// Open a new page inside this process
    async fn new_page(&self) -> Result<Arc<dyn Page>, WorkerError>;

    /// Terminate the process
    async fn close(&self) -> Result<(), WorkerError>;

    /// Whether the process is still reachable
    fn is_connected(&self) -> bool;
}

/// A page inside a worker process
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate to `url`, bounded by the worker's own `timeout`
    async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration)
        -> Result<(), WorkerError>;

    /// Wait until the page signals it is ready to be printed
    async fn wait_for_ready(&self, timeout: Duration) -> Result<(), WorkerError>;

    /// Read option overrides published by the page itself, if any
    async fn evaluate_overrides(
        &self,
        kind: OutputKind,
    ) -> Result<Option<serde_json::Value>, WorkerError>;

    /// Switch the CSS media type used for rendering
    async fn emulate_media(&self, media: MediaType) -> Result<(), WorkerError>;

    /// Print the page as a PDF document
    async fn pdf(&self, options: &PdfOptions) -> Result<Vec<u8>, WorkerError>;

    /// Capture the page as an image
    async fn screenshot(&self, options: &ImageOptions) -> Result<Vec<u8>, WorkerError>;

    /// Resolves once the page reports an unrecoverable fault
    ///
    /// Never resolves for a healthy page.
    async fn crashed(&self) -> WorkerError;

    /// Close the page
    async fn close(&self) -> Result<(), WorkerError>;

    /// Whether the page has been closed
    fn is_closed(&self) -> bool;
}
