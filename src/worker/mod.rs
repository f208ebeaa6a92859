//! Queue worker
//!
//! Polls the job queue, hands due jobs to a [`JobHandler`] with bounded
//! concurrency and reports each outcome back to the queue. Failed jobs are
//! retried with exponential backoff (see [`crate::utils::retry`]).

pub mod dispatch;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::WorkerConfig;
use crate::error::{PrewarmErrorTrait, Result};
use crate::metrics;
use crate::queue::{JobQueue, QueuedJob};
use crate::utils::now_timestamp;

pub use dispatch::Dispatcher;

/// Executes one claimed job
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &QueuedJob, now: i64) -> Result<()>;

    /// Called once before the first poll
    async fn on_start(&self, _now: i64) -> Result<()> {
        Ok(())
    }
}

/// Outcome counts of one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

enum JobOutcome {
    Completed,
    Retried,
    Failed,
}

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<dyn JobHandler>, config: WorkerConfig) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.handler.on_start(now_timestamp()).await?;

        let mut ticker = interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            poll_interval_secs = self.config.poll_interval_secs,
            batch_size = self.config.batch_size,
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once(now_timestamp()).await {
                        Ok(summary) if summary.claimed > 0 => {
                            tracing::debug!(
                                claimed = summary.claimed,
                                completed = summary.completed,
                                retried = summary.retried,
                                failed = summary.failed,
                                "Poll finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Poll failed: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("Worker shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Claim the jobs due at `now` and run them
    pub async fn run_once(&self, now: i64) -> Result<PollSummary> {
        let jobs = self.queue.claim_due(now, self.config.batch_size.max(1))?;
        let mut summary = PollSummary {
            claimed: jobs.len(),
            ..Default::default()
        };

        if !jobs.is_empty() {
            let outcomes: Vec<Result<JobOutcome>> = stream::iter(jobs)
                .map(|job| self.execute(job, now))
                .buffer_unordered(self.config.max_concurrent_jobs.max(1))
                .collect()
                .await;

            for outcome in outcomes {
                match outcome? {
                    JobOutcome::Completed => summary.completed += 1,
                    JobOutcome::Retried => summary.retried += 1,
                    JobOutcome::Failed => summary.failed += 1,
                }
            }
        }

        let stats = self.queue.stats()?;
        metrics::update_pending_jobs(stats.pending);
        Ok(summary)
    }

    async fn execute(&self, job: QueuedJob, now: i64) -> Result<JobOutcome> {
        let _timer = metrics::start_job_timer(&job.hook);

        match self.handler.handle(&job, now).await {
            Ok(()) => {
                self.queue.complete(job.id, now)?;
                metrics::record_job(&job.hook, "complete");
                Ok(JobOutcome::Completed)
            }
            Err(e) => {
                let retry = &self.config.retry;
                let message = e.to_string();

                if e.is_recoverable() && retry.should_retry(job.attempts) {
                    let delay = retry.delay_for_attempt(job.attempts).as_secs() as i64;
                    let retry_at = now + delay.max(1);
                    tracing::warn!(
                        job_id = %job.id,
                        hook = %job.hook,
                        attempt = job.attempts,
                        retry_at,
                        category = e.category().as_str(),
                        "Job failed, retrying: {}",
                        message
                    );
                    self.queue.fail(job.id, &message, Some(retry_at), now)?;
                    metrics::record_job(&job.hook, "retry");
                    Ok(JobOutcome::Retried)
                } else {
                    tracing::error!(
                        job_id = %job.id,
                        hook = %job.hook,
                        attempt = job.attempts,
                        category = e.category().as_str(),
                        "Job failed: {}",
                        message
                    );
                    self.queue.fail(job.id, &message, None, now)?;
                    metrics::record_job(&job.hook, "failed");
                    Ok(JobOutcome::Failed)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::queue::{Hook, JobStatus, MemoryJobQueue};
    use crate::storage::StorageError;
    use crate::utils::retry::RetryConfig;
    use std::sync::Mutex;

    /// Fails every job whose hook is in `failing`
    struct ScriptedHandler {
        failing: Vec<String>,
        recoverable: bool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        async fn handle(&self, job: &QueuedJob, _now: i64) -> Result<()> {
            self.seen.lock().unwrap().push(job.hook.clone());
            if self.failing.contains(&job.hook) {
                if self.recoverable {
                    return Err(StorageError::Database(rusqlite::Error::QueryReturnedNoRows).into());
                }
                return Err(Error::config("bad job"));
            }
            Ok(())
        }
    }

    fn worker(queue: Arc<MemoryJobQueue>, failing: &[Hook], recoverable: bool) -> (Worker, Arc<ScriptedHandler>) {
        let handler = Arc::new(ScriptedHandler {
            failing: failing.iter().map(|h| h.to_string()).collect(),
            recoverable,
            seen: Mutex::new(Vec::new()),
        });
        let config = WorkerConfig {
            poll_interval_secs: 1,
            batch_size: 10,
            max_concurrent_jobs: 2,
            retry: RetryConfig::with_delays(2, 60, 600),
        };
        (Worker::new(queue, handler.clone(), config), handler)
    }

    #[tokio::test]
    async fn test_run_once_completes_due_jobs() {
        let queue = Arc::new(MemoryJobQueue::new());
        queue.enqueue_at(100, Hook::StartWarmUp, &[]).unwrap();
        queue.enqueue_at(500, Hook::StopWarmUp, &[]).unwrap();
        let (worker, handler) = worker(queue.clone(), &[], true);

        let summary = worker.run_once(200).await.unwrap();
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(*handler.seen.lock().unwrap(), vec!["start_warm_up"]);

        let stats = queue.stats().unwrap();
        assert_eq!(stats.complete, 1);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn test_recoverable_failure_is_retried_then_failed() {
        let queue = Arc::new(MemoryJobQueue::new());
        queue.enqueue_at(100, Hook::StartWarmUp, &[]).unwrap();
        let (worker, _) = worker(queue.clone(), &[Hook::StartWarmUp], true);

        let summary = worker.run_once(100).await.unwrap();
        assert_eq!(summary.retried, 1);
        let pending = queue.pending_for(Hook::StartWarmUp);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].run_at, 160);

        let summary = worker.run_once(160).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(queue.pending_for(Hook::StartWarmUp).is_empty());
        assert_eq!(queue.stats().unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_unrecoverable_failure_is_not_retried() {
        let queue = Arc::new(MemoryJobQueue::new());
        let id = queue.enqueue_at(100, Hook::StopWarmUp, &[]).unwrap();
        let (worker, _) = worker(queue.clone(), &[Hook::StopWarmUp], false);

        let summary = worker.run_once(100).await.unwrap();
        assert_eq!(summary.failed, 1);
        let job = queue
            .jobs()
            .into_iter()
            .find(|j| j.id == id)
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("Config error: bad job"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let queue = Arc::new(MemoryJobQueue::new());
        let (worker, _) = worker(queue, &[], true);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run(rx).await });
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
