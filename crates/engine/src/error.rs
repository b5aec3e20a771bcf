//! Error types for the render pool engine
//!
//! Task-level failures ([`ConversionError`]) always reach the caller of
//! `execute`. Pool housekeeping failures are logged and contained.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for conversion operations
pub type Result<T> = std::result::Result<T, ConversionError>;

/// Errors reported by a worker backend (browser process or page)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker process could not be started
    #[error("failed to launch worker: {0}")]
    Launch(String),

    /// The worker or page was already closed
    #[error("worker is closed")]
    Closed,

    /// The worker reported an unrecoverable fault
    #[error("worker crashed: {0}")]
    Crashed(String),

    /// A worker-side wait exceeded its own timeout
    #[error("worker operation timed out after {0:?}")]
    Timeout(Duration),

    /// Any other failure reported by the backend
    #[error("worker protocol error: {0}")]
    Protocol(String),
}

/// Errors raised by the allocator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocatorError {
    /// The pool was shut down before or while waiting for a handle
    #[error("worker pool is shut down")]
    ShutDown,

    /// Creating the underlying worker resource failed
    #[error("failed to create worker handle: {0}")]
    Create(#[source] WorkerError),
}

/// Configuration errors, raised at setup time and never retried
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Pool size below one
    #[error("\"numberOfWorkers\" must be a number greater or equal than 1, got {0}")]
    InvalidPoolSize(usize),

    /// Strategy name is not one of the supported topologies
    #[error("unsupported strategy \"{0}\"")]
    UnknownStrategy(String),

    /// Timeout must be positive
    #[error("\"timeout\" must be greater than zero")]
    InvalidTimeout,

    /// An environment variable could not be parsed
    #[error("invalid value for {var}: {message}")]
    Env { var: String, message: String },
}

/// Coarse classification of a task failure
///
/// Strategies use this to decide between recycling and releasing the
/// worker handle that served the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The deadline elapsed before the task completed
    Timeout,
    /// The worker crashed while serving the task
    Crash,
    /// Any other failure; the worker is still structurally sound
    Application,
}

/// Tagged error surfaced by `execute`
#[derive(Debug, Clone, Error)]
pub enum ConversionError {
    /// Deadline elapsed before the conversion completed
    #[error("Timeout Error: {message}")]
    Timeout { message: String },

    /// The worker crashed while converting
    #[error("worker crashed during conversion: {0}")]
    WorkerCrashed(#[source] WorkerError),

    /// The supplied (or page-provided) options are invalid
    #[error("{0}")]
    InvalidOptions(String),

    /// The worker reported a non-fatal failure
    #[error("worker error: {0}")]
    Worker(#[source] WorkerError),

    /// No worker handle could be allocated
    #[error("allocation failed: {0}")]
    Allocation(#[from] AllocatorError),
}

impl ConversionError {
    /// Build a timeout error with the given message
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Classify this failure
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::WorkerCrashed(_) => FailureKind::Crash,
            _ => FailureKind::Application,
        }
    }

    /// Whether the deadline elapsed
    pub fn is_timeout(&self) -> bool {
        self.kind() == FailureKind::Timeout
    }

    /// Whether the worker crashed
    pub fn is_crash(&self) -> bool {
        self.kind() == FailureKind::Crash
    }

    /// Whether this is a user-facing validation error
    pub fn is_weak(&self) -> bool {
        matches!(self, Self::InvalidOptions(_))
    }
}

impl From<WorkerError> for ConversionError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Crashed(_) => Self::WorkerCrashed(err),
            WorkerError::Timeout(limit) => Self::timeout(format!(
                "worker did not respond within {}ms",
                limit.as_millis()
            )),
            other => Self::Worker(other),
        }
    }
}
