//! Worker handle pooling
//!
//! This module provides:
//! - [`Allocator`] - bounded pool with round-robin reuse, FIFO waiting and recycling
//! - [`BrowserFactory`] - handles are standalone worker processes
//! - [`PageFactory`] / [`SharedBrowser`] - handles are pages inside one shared process
//!
//! # Slot lifecycle
//!
//! ```text
//!            allocate                 release
//!   ┌──────┐ ────────► ┌──────┐ ─────────────────► ┌──────┐
//!   │ Free │           │ Busy │                    │ Free │
//!   └──────┘           └──────┘ ──┐           ┌──► └──────┘
//!                                 │ recycle   │
//!                                 ▼           │
//!                           ┌───────────┐     │
//!                           │ Recycling │ ────┘
//!                           └───────────┘
//! ```
//!
//! A freed slot is handed directly to the oldest queued request, so a
//! newcomer can never overtake a waiter.

mod allocator;
mod factories;

pub use allocator::{
    Allocator, HandleFactory, Lease, PoolStatus, RecycleFuture, ShutdownReport, SlotId,
};
pub use factories::{BrowserFactory, PageFactory, SharedBrowser};
