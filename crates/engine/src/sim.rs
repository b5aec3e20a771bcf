//! In-process simulated worker backend
//!
//! Deterministic stand-in for a headless browser. Latencies run on the
//! tokio clock, so tests with paused time complete instantly. Faults can be
//! injected per URL or per launch, and [`SimCounters`] records what the
//! engine did with the workers it was handed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::watch;
use tracing::debug;

use crate::config::LaunchOptions;
use crate::conversion::{ImageOptions, ImageType, MediaType, OutputKind, PdfOptions};
use crate::error::WorkerError;
use crate::worker::{Browser, Launcher, Page, WaitUntil};

pub const PDF_MAGIC: &[u8] = b"%PDF-1.7";
pub const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
pub const JPEG_MAGIC: &[u8] = b"\xff\xd8\xff\xe0";

/// How simulated workers behave
#[derive(Debug, Clone)]
pub struct SimBehavior {
    /// Time taken to start a process
    pub launch_latency: Duration,
    /// Time taken to open a page
    pub page_latency: Duration,
    /// Time spent rendering each task
    pub render_latency: Duration,
    /// Upper bound of uniform random latency added to each render
    pub render_jitter: Duration,
    /// Probability in `[0, 1]` that a render crashes its page
    pub crash_rate: f64,
    /// URLs containing this marker crash their page half-way through rendering
    pub crash_marker: Option<String>,
    /// Whether worker-side waits honour the timeout they are given
    pub honor_timeouts: bool,
    /// Overrides every page publishes
    pub overrides: Option<serde_json::Value>,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            launch_latency: Duration::ZERO,
            page_latency: Duration::ZERO,
            render_latency: Duration::from_millis(10),
            render_jitter: Duration::ZERO,
            crash_rate: 0.0,
            crash_marker: None,
            honor_timeouts: false,
            overrides: None,
        }
    }
}

impl SimBehavior {
    pub fn with_render_latency(mut self, latency: Duration) -> Self {
        self.render_latency = latency;
        self
    }

    pub fn with_launch_latency(mut self, latency: Duration) -> Self {
        self.launch_latency = latency;
        self
    }

    pub fn with_crash_marker(mut self, marker: impl Into<String>) -> Self {
        self.crash_marker = Some(marker.into());
        self
    }

    pub fn with_overrides(mut self, overrides: serde_json::Value) -> Self {
        self.overrides = Some(overrides);
        self
    }

    fn render_time(&self) -> Duration {
        if self.render_jitter.is_zero() {
            return self.render_latency;
        }
        let jitter = rand::thread_rng().gen_range(0..=self.render_jitter.as_micros() as u64);
        self.render_latency + Duration::from_micros(jitter)
    }

    fn should_crash(&self, url: &str) -> bool {
        if let Some(marker) = &self.crash_marker {
            if url.contains(marker.as_str()) {
                return true;
            }
        }
        self.crash_rate > 0.0 && rand::thread_rng().gen_bool(self.crash_rate.min(1.0))
    }
}

/// What the engine did with simulated workers
#[derive(Debug, Default)]
pub struct SimCounters {
    launches: AtomicU64,
    failed_launches: AtomicU64,
    browsers_closed: AtomicU64,
    pages_opened: AtomicU64,
    pages_closed: AtomicU64,
    renders_started: AtomicU64,
    renders_completed: AtomicU64,
    crashes: AtomicU64,
    active_renders: AtomicUsize,
    peak_active_renders: AtomicUsize,
}

impl SimCounters {
    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> u64 {
        Self::get(&self.launches)
    }

    pub fn failed_launches(&self) -> u64 {
        Self::get(&self.failed_launches)
    }

    pub fn browsers_closed(&self) -> u64 {
        Self::get(&self.browsers_closed)
    }

    pub fn pages_opened(&self) -> u64 {
        Self::get(&self.pages_opened)
    }

    pub fn pages_closed(&self) -> u64 {
        Self::get(&self.pages_closed)
    }

    pub fn renders_started(&self) -> u64 {
        Self::get(&self.renders_started)
    }

    pub fn renders_completed(&self) -> u64 {
        Self::get(&self.renders_completed)
    }

    pub fn crashes(&self) -> u64 {
        Self::get(&self.crashes)
    }

    /// Renders in progress right now
    pub fn active_renders(&self) -> usize {
        self.active_renders.load(Ordering::SeqCst)
    }

    /// Highest number of renders ever in progress at once
    pub fn peak_active_renders(&self) -> usize {
        self.peak_active_renders.load(Ordering::SeqCst)
    }

    fn enter_render(self: &Arc<Self>) -> ActiveRender {
        self.renders_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_renders.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active_renders.fetch_max(now, Ordering::SeqCst);
        ActiveRender {
            counters: Arc::clone(self),
        }
    }
}

/// Decrements the active render count when dropped, including on cancellation
struct ActiveRender {
    counters: Arc<SimCounters>,
}

impl Drop for ActiveRender {
    fn drop(&mut self) {
        self.counters.active_renders.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SimState {
    behavior: parking_lot::RwLock<SimBehavior>,
    counters: Arc<SimCounters>,
    fail_launches: AtomicUsize,
    fail_pages: AtomicUsize,
    next_id: AtomicU64,
    killed: parking_lot::Mutex<HashSet<u64>>,
}

impl SimState {
    fn behavior(&self) -> SimBehavior {
        self.behavior.read().clone()
    }

    fn is_killed(&self, id: u64) -> bool {
        self.killed.lock().contains(&id)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Launches simulated worker processes
#[derive(Clone)]
pub struct SimLauncher {
    state: Arc<SimState>,
}

impl Default for SimLauncher {
    fn default() -> Self {
        Self::new(SimBehavior::default())
    }
}

impl SimLauncher {
    pub fn new(behavior: SimBehavior) -> Self {
        Self {
            state: Arc::new(SimState {
                behavior: parking_lot::RwLock::new(behavior),
                counters: Arc::new(SimCounters::default()),
                fail_launches: AtomicUsize::new(0),
                fail_pages: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                killed: parking_lot::Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Shared counters for every worker this launcher created
    pub fn counters(&self) -> Arc<SimCounters> {
        Arc::clone(&self.state.counters)
    }

    /// Make the next `n` launches fail
    pub fn fail_next_launches(&self, n: usize) {
        self.state.fail_launches.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` page creations fail
    pub fn fail_next_pages(&self, n: usize) {
        self.state.fail_pages.store(n, Ordering::SeqCst);
    }

    /// Kill the process or page with the given id without closing it
    ///
    /// A killed process reports itself disconnected; a killed page, or any
    /// page of a killed process, reports itself closed.
    pub fn kill(&self, id: u64) {
        self.state.killed.lock().insert(id);
    }

    /// Replace the behavior applied to subsequent operations
    pub fn set_behavior(&self, behavior: SimBehavior) {
        *self.state.behavior.write() = behavior;
    }
}

#[async_trait]
impl Launcher for SimLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn Browser>, WorkerError> {
        let behavior = self.state.behavior();
        if !behavior.launch_latency.is_zero() {
            tokio::time::sleep(behavior.launch_latency).await;
        }

        if SimState::take_failure(&self.state.fail_launches) {
            self.state
                .counters
                .failed_launches
                .fetch_add(1, Ordering::SeqCst);
            return Err(WorkerError::Launch("simulated launch failure".to_string()));
        }

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.counters.launches.fetch_add(1, Ordering::SeqCst);
        debug!(browser_id = id, args = ?options.args, "Launched simulated worker");

        Ok(Arc::new(SimBrowser {
            id,
            state: Arc::clone(&self.state),
            connected: AtomicBool::new(true),
        }))
    }
}

/// A simulated worker process
pub struct SimBrowser {
    id: u64,
    state: Arc<SimState>,
    connected: AtomicBool,
}

impl SimBrowser {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl Browser for SimBrowser {
    async fn version(&self) -> Result<String, WorkerError> {
        if !self.is_connected() {
            return Err(WorkerError::Closed);
        }
        Ok("SimBrowser/1.0".to_string())
    }

    async fn new_page(&self) -> Result<Arc<dyn Page>, WorkerError> {
        if !self.is_connected() {
            return Err(WorkerError::Closed);
        }
        let behavior = self.state.behavior();
        if !behavior.page_latency.is_zero() {
            tokio::time::sleep(behavior.page_latency).await;
        }
        if SimState::take_failure(&self.state.fail_pages) {
            return Err(WorkerError::Protocol("simulated page failure".to_string()));
        }

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.counters.pages_opened.fetch_add(1, Ordering::SeqCst);
        let (fault, _) = watch::channel(None);

        Ok(Arc::new(SimPage {
            id,
            browser_id: self.id,
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
            fault,
        }))
    }

    async fn close(&self) -> Result<(), WorkerError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.state
                .counters
                .browsers_closed
                .fetch_add(1, Ordering::SeqCst);
            Ok(())
        } else {
            Err(WorkerError::Closed)
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.state.is_killed(self.id)
    }
}

/// A simulated page
///
/// Rendered content names the page and process that produced it, so
/// callers can tell whether a worker was reused or replaced.
pub struct SimPage {
    id: u64,
    browser_id: u64,
    state: Arc<SimState>,
    closed: AtomicBool,
    fault: watch::Sender<Option<WorkerError>>,
}

impl SimPage {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Report an unrecoverable fault to anyone watching this page
    pub fn crash(&self, reason: &str) {
        if self.fault.borrow().is_none() {
            self.state.counters.crashes.fetch_add(1, Ordering::SeqCst);
            self.fault
                .send_replace(Some(WorkerError::Crashed(reason.to_string())));
        }
    }

    fn check(&self) -> Result<(), WorkerError> {
        if let Some(fault) = self.fault.borrow().clone() {
            return Err(fault);
        }
        if self.is_closed() {
            return Err(WorkerError::Closed);
        }
        Ok(())
    }

    fn render(&self, magic: &[u8]) -> Vec<u8> {
        self.state
            .counters
            .renders_completed
            .fetch_add(1, Ordering::SeqCst);
        let mut out = magic.to_vec();
        out.extend_from_slice(format!(" browser={} page={}\n", self.browser_id, self.id).as_bytes());
        out
    }
}

#[async_trait]
impl Page for SimPage {
    async fn goto(
        &self,
        url: &str,
        _wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<(), WorkerError> {
        self.check()?;
        let behavior = self.state.behavior();
        let latency = behavior.render_time();
        let _active = self.state.counters.enter_render();

        if behavior.should_crash(url) {
            tokio::time::sleep(latency / 2).await;
            self.crash("simulated renderer crash");
            return Err(WorkerError::Crashed("simulated renderer crash".to_string()));
        }

        if behavior.honor_timeouts && latency > timeout {
            tokio::time::sleep(timeout).await;
            return Err(WorkerError::Timeout(timeout));
        }

        tokio::time::sleep(latency).await;
        self.check()
    }

    async fn wait_for_ready(&self, _timeout: Duration) -> Result<(), WorkerError> {
        self.check()
    }

    async fn evaluate_overrides(
        &self,
        _kind: OutputKind,
    ) -> Result<Option<serde_json::Value>, WorkerError> {
        self.check()?;
        Ok(self.state.behavior().overrides)
    }

    async fn emulate_media(&self, _media: MediaType) -> Result<(), WorkerError> {
        self.check()
    }

    async fn pdf(&self, _options: &PdfOptions) -> Result<Vec<u8>, WorkerError> {
        self.check()?;
        Ok(self.render(PDF_MAGIC))
    }

    async fn screenshot(&self, options: &ImageOptions) -> Result<Vec<u8>, WorkerError> {
        self.check()?;
        Ok(self.render(match options.image_type {
            ImageType::Png => PNG_MAGIC,
            ImageType::Jpeg => JPEG_MAGIC,
        }))
    }

    async fn crashed(&self) -> WorkerError {
        let mut rx = self.fault.subscribe();
        loop {
            let fault = rx.borrow_and_update().clone();
            if let Some(fault) = fault {
                return fault;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as the page, so this only happens on drop
                return std::future::pending::<WorkerError>().await;
            }
        }
    }

    async fn close(&self) -> Result<(), WorkerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::Closed);
        }
        self.state.counters.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
            || self.state.is_killed(self.id)
            || self.state.is_killed(self.browser_id)
    }
}
