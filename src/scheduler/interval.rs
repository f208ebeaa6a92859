//! Drift-free interval scheduling on top of single-shot jobs
//!
//! The queue has no notion of a recurring, drift-corrected interval. Instead
//! each run re-arms itself through [`IntervalScheduler::ensure_scheduled`],
//! which anchors the next run to the previously planned one rather than to
//! the moment the handler happened to execute. Late runs therefore never
//! shift the phase of the interval.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::SchedulerResult;
use crate::metrics;
use crate::queue::{canonical_args, Hook, Job, JobQueue, QueueResult};
use crate::storage::{ConfigStore, ConfigStoreExt};
use crate::utils::now_timestamp;

/// Prefix of the option keys holding [`ScheduleState`]
pub const STATE_KEY_PREFIX: &str = "interval-state.";

/// Identity of a recurring job instance
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleKey {
    pub hook: Hook,
    pub args: Vec<Value>,
}

impl ScheduleKey {
    pub fn new(hook: Hook, args: Vec<Value>) -> Self {
        Self { hook, args }
    }

    pub fn for_job(job: Job) -> QueueResult<Self> {
        let (hook, args) = job.into_parts()?;
        Ok(Self { hook, args })
    }

    /// Option key the state of this schedule is persisted under
    pub fn state_key(&self) -> QueueResult<String> {
        let suffix = if self.args.is_empty() {
            String::new()
        } else {
            canonical_args(&self.args)?
        };
        Ok(format!("{STATE_KEY_PREFIX}{}{suffix}", self.hook))
    }
}

/// Persisted anchor of a recurring schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub next_run_timestamp: i64,
    pub last_interval_seconds: i64,
}

/// What `ensure_scheduled` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A job was enqueued at `run_at`
    Scheduled { run_at: i64 },
    /// A pending job already exists for the key
    AlreadyPending,
    /// The interval is not positive
    Disabled,
}

impl ScheduleOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Scheduled { .. } => "scheduled",
            Self::AlreadyPending => "already_pending",
            Self::Disabled => "disabled",
        }
    }
}

/// Next run for a schedule with interval `interval` at time `now`.
///
/// - no prior state: `now + interval`
/// - planned run in the past: advanced by whole intervals to the first
///   instant `>= now`, keeping the phase
/// - planned run not in the past: reused when the interval is unchanged,
///   otherwise `now + interval`
pub fn compute_next_run(state: Option<ScheduleState>, interval: i64, now: i64) -> i64 {
    let Some(state) = state.filter(|s| s.next_run_timestamp > 0) else {
        return now.saturating_add(interval);
    };

    let planned = state.next_run_timestamp;
    if planned < now {
        let next = planned.saturating_add(interval);
        if next < now {
            let periods = (now - next - 1) / interval + 1;
            return next.saturating_add(periods.saturating_mul(interval));
        }
        next
    } else if state.last_interval_seconds == interval {
        planned
    } else {
        now.saturating_add(interval)
    }
}

/// Keeps exactly one pending single-shot job per [`ScheduleKey`]
pub struct IntervalScheduler {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ConfigStore>,
}

impl IntervalScheduler {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn ConfigStore>) -> Self {
        Self { queue, store }
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// [`IntervalScheduler::ensure_scheduled_at`] with the wall clock
    pub fn ensure_scheduled(
        &self,
        interval_seconds: i64,
        key: &ScheduleKey,
    ) -> SchedulerResult<ScheduleOutcome> {
        self.ensure_scheduled_at(interval_seconds, key, now_timestamp())
    }

    /// Make sure a job for `key` is pending, anchored to the previous plan.
    ///
    /// The pending check and the enqueue are not atomic; two concurrent calls
    /// for the same key can both enqueue.
    pub fn ensure_scheduled_at(
        &self,
        interval_seconds: i64,
        key: &ScheduleKey,
        now: i64,
    ) -> SchedulerResult<ScheduleOutcome> {
        let outcome = self.decide(interval_seconds, key, now)?;
        metrics::record_schedule_decision(key.hook.as_str(), outcome.label());
        Ok(outcome)
    }

    fn decide(
        &self,
        interval_seconds: i64,
        key: &ScheduleKey,
        now: i64,
    ) -> SchedulerResult<ScheduleOutcome> {
        if interval_seconds <= 0 {
            return Ok(ScheduleOutcome::Disabled);
        }

        if self.queue.has_pending(key.hook, &key.args)? {
            tracing::debug!(hook = %key.hook, "Interval already pending");
            return Ok(ScheduleOutcome::AlreadyPending);
        }

        let state_key = key.state_key()?;
        let previous = self.store.get_as::<ScheduleState>(&state_key)?;
        let next_run = compute_next_run(previous, interval_seconds, now);

        self.store.set_as(
            &state_key,
            &ScheduleState {
                next_run_timestamp: next_run,
                last_interval_seconds: interval_seconds,
            },
        )?;
        self.queue.enqueue_at(next_run, key.hook, &key.args)?;

        tracing::info!(
            hook = %key.hook,
            interval_seconds,
            next_run,
            "Interval scheduled"
        );
        Ok(ScheduleOutcome::Scheduled { run_at: next_run })
    }

    /// Persisted state for `key`, if any
    pub fn state(&self, key: &ScheduleKey) -> SchedulerResult<Option<ScheduleState>> {
        Ok(self.store.get_as(&key.state_key()?)?)
    }
}
