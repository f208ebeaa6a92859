//! prewarm - Drift-free cache warming scheduler
//!
//! Keeps a site's page cache warm: a local warm-up visits the configured entry
//! points on a fixed cadence, and an external warmer replays the recorded
//! requests from remote servers in chunks.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Process configuration and typed site settings
//! - [`queue`] - Durable job queue (SQLite) and typed job payloads
//! - [`scheduler`] - Drift-free intervals, self-healing sweep, activation
//! - [`warmer`] - Local warm-up, chunking and the remote warmer protocol
//! - [`worker`] - Queue polling and job dispatch
//! - [`storage`] - Option store and visit log
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use prewarm::config::Config;
//! use prewarm::queue::SqliteJobQueue;
//! use prewarm::storage::{SqliteConfigStore, SqliteVisitLog};
//! use prewarm::worker::{Dispatcher, Worker};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let path = &config.database.sqlite_path;
//!     let store = Arc::new(SqliteConfigStore::new(path)?);
//!     let queue = Arc::new(SqliteJobQueue::new(path)?);
//!     let log = Arc::new(SqliteVisitLog::new(path)?);
//!
//!     let dispatcher = Dispatcher::new(store, queue.clone(), log, &config.http)?;
//!     let worker = Worker::new(queue, Arc::new(dispatcher), config.worker.clone());
//!     let (_tx, rx) = tokio::sync::watch::channel(false);
//!     worker.run(rx).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod storage;
pub mod utils;
pub mod warmer;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, DomainSettings, WarmerSettings};
    pub use crate::error::{Error, ErrorCategory, PrewarmErrorTrait, Result};
    pub use crate::queue::{Hook, Job, JobQueue};
    pub use crate::scheduler::{IntervalRegistry, IntervalScheduler, ScheduleKey};
    pub use crate::storage::{ConfigStore, ConfigStoreExt, VisitLog};
    pub use crate::worker::{Dispatcher, JobHandler, Worker};
}

// Direct re-exports for convenience
pub use error::{Error, Result};
