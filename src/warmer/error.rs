//! Error types for the warmer module

use thiserror::Error;

use crate::error::ErrorCategory;
use crate::queue::QueueError;
use crate::storage::StorageError;

/// Result type for warmer operations
pub type WarmerResult<T> = Result<T, WarmerError>;

/// Errors raised while building, dispatching or executing warm-up work
///
/// Remote server failures are not errors: they end up as failure records in
/// the visit log. These variants cover what prevents the work from being done
/// at all.
#[derive(Error, Debug)]
pub enum WarmerError {
    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL without a host component
    #[error("URL has no host: {0}")]
    MissingHost(String),

    /// Header line without a `Name: Value` separator
    #[error("Invalid header line: {0}")]
    InvalidHeader(String),

    /// Empty chunk handed to the executor
    #[error("Chunk has no URLs")]
    EmptyChunk,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WarmerError {
    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Storage(e) => e.is_recoverable(),
            Self::Queue(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// Error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Http(_) => ErrorCategory::Network,
            Self::MissingHost(_)
            | Self::InvalidHeader(_)
            | Self::Serialization(_) => ErrorCategory::Parsing,
            Self::EmptyChunk => ErrorCategory::Other,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Queue(_) => ErrorCategory::Scheduler,
        }
    }
}
