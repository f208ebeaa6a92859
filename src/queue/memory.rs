//! In-memory job queue (for testing)

use std::sync::RwLock;

use chrono::Utc;
use serde_json::Value;

use super::{
    canonical_args, next_occurrence, Hook, JobId, JobQueue, JobStatus, QueueError, QueueResult,
    QueueStats, QueuedJob,
};

struct Entry {
    job: QueuedJob,
    key: String,
}

/// In-memory implementation of [`JobQueue`]
#[derive(Default)]
pub struct MemoryJobQueue {
    entries: RwLock<Vec<Entry>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending jobs for one hook, ordered by due time
    pub fn pending_for(&self, hook: Hook) -> Vec<QueuedJob> {
        self.pending_jobs()
            .unwrap_or_default()
            .into_iter()
            .filter(|j| j.hook == hook.as_str())
            .collect()
    }

    /// Every job regardless of status
    pub fn jobs(&self) -> Vec<QueuedJob> {
        self.entries
            .read()
            .map(|entries| entries.iter().map(|e| e.job.clone()).collect())
            .unwrap_or_default()
    }

    fn push(
        entries: &mut Vec<Entry>,
        run_at: i64,
        period_secs: Option<i64>,
        hook: &str,
        args: Vec<Value>,
        key: String,
    ) -> JobId {
        let id = entries.len() as JobId + 1;
        entries.push(Entry {
            job: QueuedJob {
                id,
                hook: hook.to_string(),
                args,
                run_at,
                period_secs,
                status: JobStatus::Pending,
                attempts: 0,
                last_error: None,
            },
            key,
        });
        id
    }

    fn pending_exists(entries: &[Entry], hook: &str, key: &str) -> bool {
        entries
            .iter()
            .any(|e| e.job.status == JobStatus::Pending && e.job.hook == hook && e.key == key)
    }

    fn rearm_recurring(entries: &mut Vec<Entry>, index: usize, now: i64) {
        let (job, key) = {
            let entry = &entries[index];
            (entry.job.clone(), entry.key.clone())
        };
        let Some(period) = job.period_secs else {
            return;
        };
        if Self::pending_exists(entries, &job.hook, &key) {
            return;
        }
        let next = next_occurrence(job.run_at, period, now);
        Self::push(entries, next, Some(period), &job.hook, job.args, key);
    }

    fn index_of(entries: &[Entry], id: JobId) -> QueueResult<usize> {
        entries
            .iter()
            .position(|e| e.job.id == id)
            .ok_or(QueueError::JobNotFound(id))
    }
}

impl JobQueue for MemoryJobQueue {
    fn enqueue_now(&self, hook: Hook, args: &[Value]) -> QueueResult<JobId> {
        self.enqueue_at(Utc::now().timestamp(), hook, args)
    }

    fn enqueue_at(&self, run_at: i64, hook: Hook, args: &[Value]) -> QueueResult<JobId> {
        let key = canonical_args(args)?;
        let mut entries = self.entries.write().map_err(|_| QueueError::LockPoisoned)?;
        Ok(Self::push(
            &mut entries,
            run_at,
            None,
            hook.as_str(),
            args.to_vec(),
            key,
        ))
    }

    fn schedule_recurring(
        &self,
        first_run: i64,
        period_secs: i64,
        hook: Hook,
        args: &[Value],
        unique: bool,
    ) -> QueueResult<Option<JobId>> {
        let key = canonical_args(args)?;
        let mut entries = self.entries.write().map_err(|_| QueueError::LockPoisoned)?;
        if unique && Self::pending_exists(&entries, hook.as_str(), &key) {
            return Ok(None);
        }
        Ok(Some(Self::push(
            &mut entries,
            first_run,
            Some(period_secs),
            hook.as_str(),
            args.to_vec(),
            key,
        )))
    }

    fn find_pending(&self, hook: Hook, args: &[Value]) -> QueueResult<Option<QueuedJob>> {
        let key = canonical_args(args)?;
        let entries = self.entries.read().map_err(|_| QueueError::LockPoisoned)?;
        Ok(entries
            .iter()
            .filter(|e| {
                e.job.status == JobStatus::Pending && e.job.hook == hook.as_str() && e.key == key
            })
            .min_by_key(|e| (e.job.run_at, e.job.id))
            .map(|e| e.job.clone()))
    }

    fn cancel_all(&self, hook: Hook) -> QueueResult<usize> {
        let mut entries = self.entries.write().map_err(|_| QueueError::LockPoisoned)?;
        let mut n = 0;
        for entry in entries
            .iter_mut()
            .filter(|e| e.job.status == JobStatus::Pending && e.job.hook == hook.as_str())
        {
            entry.job.status = JobStatus::Canceled;
            n += 1;
        }
        Ok(n)
    }

    fn claim_due(&self, now: i64, limit: usize) -> QueueResult<Vec<QueuedJob>> {
        let mut entries = self.entries.write().map_err(|_| QueueError::LockPoisoned)?;
        let mut due: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.job.status == JobStatus::Pending && e.job.run_at <= now)
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|&i| (entries[i].job.run_at, entries[i].job.id));
        due.truncate(limit);

        Ok(due
            .into_iter()
            .map(|i| {
                let job = &mut entries[i].job;
                job.status = JobStatus::Running;
                job.attempts += 1;
                job.clone()
            })
            .collect())
    }

    fn complete(&self, id: JobId, now: i64) -> QueueResult<()> {
        let mut entries = self.entries.write().map_err(|_| QueueError::LockPoisoned)?;
        let index = Self::index_of(&entries, id)?;
        entries[index].job.status = JobStatus::Complete;
        entries[index].job.last_error = None;
        Self::rearm_recurring(&mut entries, index, now);
        Ok(())
    }

    fn fail(&self, id: JobId, error: &str, retry_at: Option<i64>, now: i64) -> QueueResult<()> {
        let mut entries = self.entries.write().map_err(|_| QueueError::LockPoisoned)?;
        let index = Self::index_of(&entries, id)?;
        let job = &mut entries[index].job;
        job.last_error = Some(error.to_string());
        match retry_at {
            Some(run_at) => {
                job.status = JobStatus::Pending;
                job.run_at = run_at;
            }
            None => {
                job.status = JobStatus::Failed;
                Self::rearm_recurring(&mut entries, index, now);
            }
        }
        Ok(())
    }

    fn pending_jobs(&self) -> QueueResult<Vec<QueuedJob>> {
        let entries = self.entries.read().map_err(|_| QueueError::LockPoisoned)?;
        let mut pending: Vec<QueuedJob> = entries
            .iter()
            .filter(|e| e.job.status == JobStatus::Pending)
            .map(|e| e.job.clone())
            .collect();
        pending.sort_by_key(|j| (j.run_at, j.id));
        Ok(pending)
    }

    fn stats(&self) -> QueueResult<QueueStats> {
        let entries = self.entries.read().map_err(|_| QueueError::LockPoisoned)?;
        let mut stats = QueueStats::default();
        for entry in entries.iter() {
            match entry.job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Complete => stats.complete += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Canceled => stats.canceled += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_find_pending_by_canonical_args() {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue_at(10, Hook::LocalWarmInterval, &[json!({"b": 1, "a": 2})])
            .unwrap();
        assert!(queue
            .has_pending(Hook::LocalWarmInterval, &[json!({"a": 2, "b": 1})])
            .unwrap());
    }

    #[test]
    fn test_failed_recurring_job_still_rearms() {
        let queue = MemoryJobQueue::new();
        queue
            .schedule_recurring(0, 100, Hook::FixMissingIntervals, &[], true)
            .unwrap();
        let claimed = queue.claim_due(0, 1).unwrap();
        queue.fail(claimed[0].id, "sweep failed", None, 5).unwrap();

        let pending = queue.pending_for(Hook::FixMissingIntervals);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].run_at, 100);
    }

    #[test]
    fn test_claim_due_skips_future_jobs() {
        let queue = MemoryJobQueue::new();
        queue.enqueue_at(50, Hook::StartWarmUp, &[]).unwrap();
        assert!(queue.claim_due(49, 10).unwrap().is_empty());
        assert_eq!(queue.claim_due(50, 10).unwrap().len(), 1);
    }
}
