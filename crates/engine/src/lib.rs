//! # Render Pool Engine
//!
//! Multiplexes HTML-to-document conversion tasks over a small number of
//! long-lived, crash-prone worker processes.
//!
//! ## Features
//!
//! - **Bounded pools**: lazily created handles, round-robin reuse and FIFO waiting
//! - **Deadline race**: callers are answered on time while late work winds down cooperatively
//! - **Recycling**: crashed or tainted handles are destroyed and recreated per slot
//! - **Three topologies**: dedicated process, process pool and page pool behind one contract
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │  (deadline per task, logging, strategy selection)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Strategy                             │
//! │  dedicated-process │ process-pool │ page-pool               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Allocator  +  race  +  ConversionPipeline         │
//! │  (slots, waiters, recycling │ abandonment │ render steps)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Launcher / Browser / Page traits               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod pool;
pub mod reliability;
pub mod sim;
pub mod strategy;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{EngineConfig, LaunchOptions, StrategyKind};
    pub use crate::conversion::{
        ConversionOptions, ConversionOutput, ConversionTask, MediaType, OutputKind,
    };
    pub use crate::engine::Engine;
    pub use crate::error::{
        AllocatorError, ConfigError, ConversionError, FailureKind, WorkerError,
    };
    pub use crate::pool::{Allocator, HandleFactory, Lease, PoolStatus};
    pub use crate::reliability::{RaceOutcome, TaskContext};
    pub use crate::sim::{SimBehavior, SimLauncher};
    pub use crate::strategy::Strategy;
    pub use crate::worker::{Browser, Launcher, Page};
}

pub use config::{EngineConfig, LaunchOptions, StrategyKind};
pub use conversion::{ConversionOptions, ConversionOutput, ConversionTask, OutputKind};
pub use engine::Engine;
pub use error::{ConfigError, ConversionError, FailureKind, WorkerError};
