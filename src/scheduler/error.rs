//! Error types for the scheduler module

use std::fmt;

use crate::queue::QueueError;
use crate::storage::StorageError;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Interval must be a positive number of seconds
    InvalidInterval { seconds: i64 },

    /// Job queue failure
    Queue(QueueError),

    /// Option store failure
    Storage(StorageError),

    /// Serialization/deserialization error
    SerializationError { reason: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInterval { seconds } => {
                write!(f, "Invalid interval '{}'. Must be positive seconds", seconds)
            }
            Self::Queue(e) => write!(f, "Queue error: {}", e),
            Self::Storage(e) => write!(f, "Storage error: {}", e),
            Self::SerializationError { reason } => {
                write!(f, "Serialization error: {}", reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Queue(e) => Some(e),
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<QueueError> for SchedulerError {
    fn from(err: QueueError) -> Self {
        Self::Queue(err)
    }
}

impl From<StorageError> for SchedulerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError {
            reason: err.to_string(),
        }
    }
}

impl SchedulerError {
    /// Create an invalid interval error
    pub fn invalid_interval(seconds: i64) -> Self {
        Self::InvalidInterval { seconds }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Queue(e) => e.is_recoverable(),
            Self::Storage(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_interval_error() {
        let err = SchedulerError::invalid_interval(-5);
        assert!(err.to_string().contains("-5"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_is_recoverable() {
        let err: SchedulerError =
            StorageError::Database(rusqlite::Error::QueryReturnedNoRows).into();
        assert!(err.is_recoverable());

        let err: SchedulerError = QueueError::UnknownHook("x".into()).into();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let scheduler_err: SchedulerError = json_err.into();
        assert!(matches!(
            scheduler_err,
            SchedulerError::SerializationError { .. }
        ));
    }
}
