//! Drift-free interval scheduling
//!
//! This module keeps recurring warm-up work alive on top of a queue that only
//! knows single-shot jobs (plus fixed-period native recurring jobs).
//!
//! # Overview
//!
//! Every interval is identified by a [`ScheduleKey`] (hook + arguments). When
//! a run finishes it asks [`IntervalScheduler`] to schedule the next one. The
//! scheduler persists the planned run time of each key, so the next run is
//! computed from the previous plan instead of from the moment the handler ran:
//!
//! ```text
//!   planned:  4600 ───────────── 8200 ───────────── 11800
//!   ran at:        4700 (late)        8230 (late)
//!   next:          8200               11800
//! ```
//!
//! The [`IntervalRegistry`] knows the concrete intervals of the system:
//!
//! - the local warm-up interval, cadence in minutes from settings
//! - one external warmer interval per domain, cadence in hours per domain
//! - the self-healing sweep, a native 4-hour recurring job that re-creates
//!   any interval that went missing
//!
//! # Modules
//!
//! - [`interval`] - next-run computation and the idempotent `ensure_scheduled`
//! - [`registry`] - the concrete intervals, activation and deactivation
//! - [`error`] - scheduler errors
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use prewarm::queue::MemoryJobQueue;
//! use prewarm::scheduler::IntervalRegistry;
//! use prewarm::storage::MemoryConfigStore;
//!
//! let registry = IntervalRegistry::new(
//!     Arc::new(MemoryJobQueue::new()),
//!     Arc::new(MemoryConfigStore::new()),
//! );
//! registry.activate()?;
//! registry.post_activation(now)?;
//! registry.schedule_sweep(now)?;
//! ```

pub mod error;
pub mod interval;
pub mod registry;

// Re-export main types
pub use error::{SchedulerError, SchedulerResult};
pub use interval::{
    compute_next_run, IntervalScheduler, ScheduleKey, ScheduleOutcome, ScheduleState,
    STATE_KEY_PREFIX,
};
pub use registry::{DomainSchedule, IntervalRegistry, POST_ACTIVATION_KEY, SWEEP_PERIOD_SECS};
