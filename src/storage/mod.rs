//! Persistence for site options and warm-up telemetry
//!
//! Both stores follow the same repository pattern: a trait describing the
//! contract the core depends on, a SQLite implementation for production and an
//! in-memory implementation for tests.
//!
//! - [`options`] - string-keyed option store ([`ConfigStore`])
//! - [`visits`] - append-only per-URL warm attempt log ([`VisitLog`])

pub mod options;
pub mod visits;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub use options::{ConfigStore, ConfigStoreExt, MemoryConfigStore, SqliteConfigStore};
pub use visits::{
    CacheStatus, FailureRecord, MemoryVisitLog, SqliteVisitLog, SuccessRecord, VisitEntry,
    VisitLog, VisitOutcome, VisitStats,
};

/// Errors raised by the option store and the visit log
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error while preparing the database location
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A previous holder of the connection lock panicked
    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Open a SQLite database file, creating its parent directory and enabling WAL.
pub(crate) fn open_sqlite(path: &Path) -> StorageResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

/// Lock a connection mutex, mapping poisoning to [`StorageError::LockPoisoned`]
pub(crate) fn lock(conn: &Mutex<Connection>) -> StorageResult<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| StorageError::LockPoisoned)
}
