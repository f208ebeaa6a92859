//! Job queue adapter
//!
//! The queue delivers `(run_at, hook, args)` jobs at least once. It knows
//! nothing about drift-corrected intervals; those are layered on top by
//! [`crate::scheduler::IntervalScheduler`], which re-enqueues a single-shot job
//! after every run. The only native recurrence is the fixed-period
//! self-healing sweep.
//!
//! Typed [`Job`] payloads are converted to `(hook, args)` only at this
//! boundary; the rest of the crate matches on the enum.

pub mod memory;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::storage::StorageError;
use crate::warmer::chunks::Chunk;

pub use memory::MemoryJobQueue;
pub use sqlite::SqliteJobQueue;

/// Row id of a queued job
pub type JobId = i64;

/// Errors raised by a [`JobQueue`] implementation
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Unknown hook: {0}")]
    UnknownHook(String),

    #[error("Invalid args for hook '{hook}': {reason}")]
    InvalidArgs { hook: String, reason: String },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue lock poisoned")]
    LockPoisoned,
}

impl QueueError {
    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Database(_) => true,
            Self::Storage(e) => e.is_recoverable(),
            _ => false,
        }
    }

    fn invalid_args(hook: Hook, reason: impl Into<String>) -> Self {
        Self::InvalidArgs {
            hook: hook.as_str().to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

// ============================================================================
// Hooks and typed jobs
// ============================================================================

/// Named hooks the queue dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    /// Periodic local warm-up run
    LocalWarmInterval,
    /// Periodic chunk creation for one domain
    ProcessExternalWarmer,
    /// Self-healing sweep (native recurring)
    FixMissingIntervals,
    /// One chunk of URLs sent to the remote warmers
    WarmUrlsChunk,
    /// Manually requested local warm-up
    StartWarmUp,
    /// Manually requested stop of a running local warm-up
    StopWarmUp,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalWarmInterval => "local_warm_interval",
            Self::ProcessExternalWarmer => "process_external_warmer",
            Self::FixMissingIntervals => "fix_missing_intervals",
            Self::WarmUrlsChunk => "warm_urls_chunk",
            Self::StartWarmUp => "start_warm_up",
            Self::StopWarmUp => "stop_warm_up",
        }
    }

    pub fn all() -> &'static [Hook] {
        &[
            Self::LocalWarmInterval,
            Self::ProcessExternalWarmer,
            Self::FixMissingIntervals,
            Self::WarmUrlsChunk,
            Self::StartWarmUp,
            Self::StopWarmUp,
        ]
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Hook {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|h| h.as_str() == s)
            .ok_or_else(|| QueueError::UnknownHook(s.to_string()))
    }
}

/// A typed job payload
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    LocalInterval,
    ExternalInterval { domain: String },
    FixMissingIntervals,
    WarmChunk(Chunk),
    StartWarmUp,
    StopWarmUp,
}

impl Job {
    /// Args the local interval is keyed on
    pub fn local_interval_args() -> Vec<Value> {
        vec![json!({ "start_for_interval": true })]
    }

    pub fn hook(&self) -> Hook {
        match self {
            Self::LocalInterval => Hook::LocalWarmInterval,
            Self::ExternalInterval { .. } => Hook::ProcessExternalWarmer,
            Self::FixMissingIntervals => Hook::FixMissingIntervals,
            Self::WarmChunk(_) => Hook::WarmUrlsChunk,
            Self::StartWarmUp => Hook::StartWarmUp,
            Self::StopWarmUp => Hook::StopWarmUp,
        }
    }

    /// Split into the `(hook, args)` pair stored by the queue
    pub fn into_parts(self) -> QueueResult<(Hook, Vec<Value>)> {
        let hook = self.hook();
        let args = match self {
            Self::LocalInterval => Self::local_interval_args(),
            Self::ExternalInterval { domain } => vec![Value::String(domain)],
            Self::WarmChunk(chunk) => vec![serde_json::to_value(chunk)?],
            Self::FixMissingIntervals | Self::StartWarmUp | Self::StopWarmUp => Vec::new(),
        };
        Ok((hook, args))
    }

    /// Rebuild a typed job from a stored `(hook, args)` pair
    pub fn from_parts(hook: Hook, args: &[Value]) -> QueueResult<Self> {
        match hook {
            Hook::LocalWarmInterval => Ok(Self::LocalInterval),
            Hook::ProcessExternalWarmer => match args.first() {
                Some(Value::String(domain)) if !domain.is_empty() => Ok(Self::ExternalInterval {
                    domain: domain.clone(),
                }),
                _ => Err(QueueError::invalid_args(hook, "expected a domain string")),
            },
            Hook::FixMissingIntervals => Ok(Self::FixMissingIntervals),
            Hook::WarmUrlsChunk => {
                let raw = args
                    .first()
                    .cloned()
                    .ok_or_else(|| QueueError::invalid_args(hook, "missing chunk payload"))?;
                Ok(Self::WarmChunk(serde_json::from_value(raw)?))
            }
            Hook::StartWarmUp => Ok(Self::StartWarmUp),
            Hook::StopWarmUp => Ok(Self::StopWarmUp),
        }
    }
}

// ============================================================================
// Queue contract
// ============================================================================

/// Lifecycle of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A job as stored by the queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: JobId,
    pub hook: String,
    pub args: Vec<Value>,
    /// Unix timestamp the job becomes due
    pub run_at: i64,
    /// Set for natively recurring jobs
    pub period_secs: Option<i64>,
    pub status: JobStatus,
    /// Number of times the job has been claimed
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl QueuedJob {
    /// Decode the stored hook and args into a typed [`Job`]
    pub fn job(&self) -> QueueResult<Job> {
        let hook: Hook = self.hook.parse()?;
        Job::from_parts(hook, &self.args)
    }
}

/// Job counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub complete: usize,
    pub failed: usize,
    pub canceled: usize,
}

/// Contract for the job queue
///
/// Args are compared by their canonical JSON encoding, so `[{"a":1,"b":2}]`
/// and `[{"b":2,"a":1}]` identify the same job.
pub trait JobQueue: Send + Sync {
    /// Enqueue a single-shot job due immediately
    fn enqueue_now(&self, hook: Hook, args: &[Value]) -> QueueResult<JobId>;

    /// Enqueue a single-shot job due at `run_at`
    fn enqueue_at(&self, run_at: i64, hook: Hook, args: &[Value]) -> QueueResult<JobId>;

    /// Enqueue a natively recurring job. With `unique`, nothing is enqueued
    /// when a pending job for the same `(hook, args)` exists.
    fn schedule_recurring(
        &self,
        first_run: i64,
        period_secs: i64,
        hook: Hook,
        args: &[Value],
        unique: bool,
    ) -> QueueResult<Option<JobId>>;

    /// First pending job for `(hook, args)`, if any. Running jobs do not count.
    fn find_pending(&self, hook: Hook, args: &[Value]) -> QueueResult<Option<QueuedJob>>;

    /// Cancel every pending job for `hook`, whatever its args
    fn cancel_all(&self, hook: Hook) -> QueueResult<usize>;

    /// Claim up to `limit` pending jobs due at `now`, oldest first
    fn claim_due(&self, now: i64, limit: usize) -> QueueResult<Vec<QueuedJob>>;

    /// Mark a claimed job complete. Recurring jobs get their next occurrence.
    fn complete(&self, id: JobId, now: i64) -> QueueResult<()>;

    /// Mark a claimed job failed. With `retry_at` the job goes back to pending.
    fn fail(&self, id: JobId, error: &str, retry_at: Option<i64>, now: i64) -> QueueResult<()>;

    /// Pending jobs ordered by due time
    fn pending_jobs(&self) -> QueueResult<Vec<QueuedJob>>;

    fn stats(&self) -> QueueResult<QueueStats>;

    fn has_pending(&self, hook: Hook, args: &[Value]) -> QueueResult<bool> {
        Ok(self.find_pending(hook, args)?.is_some())
    }
}

/// Canonical JSON used for args identity (object keys sorted at every level)
pub(crate) fn canonical_args(args: &[Value]) -> QueueResult<String> {
    let sorted: Vec<Value> = args.iter().map(sort_keys).collect();
    Ok(serde_json::to_string(&sorted)?)
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|k| (k.clone(), sort_keys(&map[k])))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Smallest `run_at + k * period` (k >= 1) strictly after `now`
pub(crate) fn next_occurrence(run_at: i64, period_secs: i64, now: i64) -> i64 {
    let period = period_secs.max(1);
    let mut next = run_at + period;
    if next <= now {
        let behind = now - next;
        next += (behind / period + 1) * period;
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warmer::headers::HeaderList;

    #[test]
    fn test_hook_roundtrip() {
        for hook in Hook::all() {
            assert_eq!(hook.as_str().parse::<Hook>().unwrap(), *hook);
        }
        assert!(matches!(
            "warm_everything".parse::<Hook>(),
            Err(QueueError::UnknownHook(_))
        ));
    }

    #[test]
    fn test_job_parts() {
        let job = Job::ExternalInterval {
            domain: "example.com".to_string(),
        };
        let (hook, args) = job.clone().into_parts().unwrap();
        assert_eq!(hook, Hook::ProcessExternalWarmer);
        assert_eq!(args, vec![json!("example.com")]);
        assert_eq!(Job::from_parts(hook, &args).unwrap(), job);
    }

    #[test]
    fn test_local_interval_args() {
        let (_, args) = Job::LocalInterval.into_parts().unwrap();
        assert_eq!(
            serde_json::to_string(&args).unwrap(),
            r#"[{"start_for_interval":true}]"#
        );
    }

    #[test]
    fn test_chunk_job_parts() {
        let chunk = Chunk {
            headers: HeaderList::from_pairs([("User-Agent", "prewarm")]),
            urls: vec!["https://example.com/".to_string()],
        };
        let (hook, args) = Job::WarmChunk(chunk.clone()).into_parts().unwrap();
        assert_eq!(hook, Hook::WarmUrlsChunk);
        assert_eq!(args[0]["headers"], json!(["User-Agent: prewarm"]));
        assert_eq!(Job::from_parts(hook, &args).unwrap(), Job::WarmChunk(chunk));
    }

    #[test]
    fn test_external_interval_requires_domain() {
        let err = Job::from_parts(Hook::ProcessExternalWarmer, &[]).unwrap_err();
        assert!(matches!(err, QueueError::InvalidArgs { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_canonical_args_sorts_keys() {
        let a = canonical_args(&[json!({"b": 2, "a": 1})]).unwrap();
        let b = canonical_args(&[json!({"a": 1, "b": 2})]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_next_occurrence() {
        assert_eq!(next_occurrence(1000, 100, 1000), 1100);
        assert_eq!(next_occurrence(1000, 100, 1099), 1100);
        assert_eq!(next_occurrence(1000, 100, 1100), 1200);
        assert_eq!(next_occurrence(1000, 100, 1350), 1400);
    }
}
