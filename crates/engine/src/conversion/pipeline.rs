//! Conversion steps run against a worker
//!
//! Every step is followed by an abandonment checkpoint. Once the caller has
//! been answered with a timeout, the remaining steps are skipped and the
//! pipeline resolves to `Ok(None)`.

use std::sync::Arc;

use tracing::{debug, instrument};

use super::options::{ConversionOptions, ConversionOutput, ConversionTask, OutputKind};
use crate::error::{ConversionError, WorkerError};
use crate::reliability::TaskContext;
use crate::worker::{Browser, Page, WaitUntil};

/// Where a conversion runs
#[derive(Clone)]
pub enum RenderTarget {
    /// A whole worker process; a fresh page is opened and closed around the task
    Browser(Arc<dyn Browser>),
    /// A pooled page, left open for reuse
    Page(Arc<dyn Page>),
}

/// Message used when the deadline elapses for a task of `kind`
pub fn timeout_message(kind: OutputKind, ctx: &TaskContext) -> String {
    format!(
        "{} generation not completed after {}ms",
        kind.as_str(),
        ctx.deadline.as_millis()
    )
}

/// Run the conversion steps for `task` on `target`
///
/// Returns `Ok(None)` when the task was abandoned part-way. A fault
/// reported by the page while any step is pending fails the task as a
/// crash.
#[instrument(skip_all, fields(task_id = %ctx.task_id, kind = task.kind.as_str()))]
pub async fn convert(
    ctx: &TaskContext,
    target: RenderTarget,
    task: &ConversionTask,
) -> Result<Option<ConversionOutput>, ConversionError> {
    let (page, owned) = match target {
        RenderTarget::Browser(browser) => {
            let version = browser.version().await?;
            debug!(%version, url = %task.html_url, "Opening page");
            if ctx.is_abandoned() {
                return Ok(None);
            }
            (browser.new_page().await?, true)
        }
        RenderTarget::Page(page) => {
            if page.is_closed() {
                return Err(ConversionError::WorkerCrashed(WorkerError::Closed));
            }
            (page, false)
        }
    };

    let result = if ctx.is_abandoned() {
        Ok(None)
    } else {
        tokio::select! {
            biased;

            fault = page.crashed() => Err(ConversionError::WorkerCrashed(fault)),
            rendered = render(ctx, page.as_ref(), task) => rendered,
        }
    };

    if owned && !page.is_closed() {
        if let Err(e) = page.close().await {
            debug!(error = %e, "Failed to close page");
        }
    }

    result
}

async fn render(
    ctx: &TaskContext,
    page: &dyn Page,
    task: &ConversionTask,
) -> Result<Option<ConversionOutput>, ConversionError> {
    let wait_until = if task.options.wait_for_network_idle.unwrap_or(false) {
        WaitUntil::NetworkIdle
    } else {
        WaitUntil::Load
    };

    page.goto(&task.html_url, wait_until, ctx.deadline).await?;
    if ctx.is_abandoned() {
        return Ok(None);
    }

    if task.options.wait_for_js.unwrap_or(false) {
        page.wait_for_ready(ctx.deadline).await?;
        if ctx.is_abandoned() {
            return Ok(None);
        }
    }

    let mut options: ConversionOptions = task.options.clone();
    if let Some(overrides) = page.evaluate_overrides(task.kind).await? {
        options.merge_overrides(overrides)?;
    }
    if ctx.is_abandoned() {
        return Ok(None);
    }

    if let Some(media) = options.media()? {
        page.emulate_media(media).await?;
        if ctx.is_abandoned() {
            return Ok(None);
        }
    }

    let output = match task.kind {
        OutputKind::Pdf => {
            let pdf = options.pdf_options();
            ConversionOutput {
                content_type: "pdf".to_string(),
                content: page.pdf(&pdf).await?,
            }
        }
        OutputKind::Image => {
            let image = options.image_options()?;
            ConversionOutput {
                content_type: image.image_type.as_str().to_string(),
                content: page.screenshot(&image).await?,
            }
        }
    };

    if ctx.is_abandoned() {
        return Ok(None);
    }

    debug!(bytes = output.content.len(), "Rendered");
    Ok(Some(output))
}
