//! Typed job dispatch

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::JobHandler;
use crate::config::HttpConfig;
use crate::error::Result;
use crate::queue::{Job, JobQueue, QueuedJob};
use crate::scheduler::IntervalRegistry;
use crate::storage::{ConfigStore, VisitLog};
use crate::warmer::{
    create_chunks, request_stop, ChunkExecutor, LocalWarmer, RemoteWarmerClient, WarmerResult,
};

/// Routes each claimed job to the component that handles its hook
pub struct Dispatcher {
    store: Arc<dyn ConfigStore>,
    queue: Arc<dyn JobQueue>,
    registry: IntervalRegistry,
    local: LocalWarmer,
    executor: ChunkExecutor,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        queue: Arc<dyn JobQueue>,
        log: Arc<dyn VisitLog>,
        http: &HttpConfig,
    ) -> WarmerResult<Self> {
        let local = LocalWarmer::new(store.clone(), log.clone(), http)?;
        let executor = ChunkExecutor::new(RemoteWarmerClient::new()?, store.clone(), log);
        Ok(Self::from_parts(store, queue, local, executor))
    }

    pub fn from_parts(
        store: Arc<dyn ConfigStore>,
        queue: Arc<dyn JobQueue>,
        local: LocalWarmer,
        executor: ChunkExecutor,
    ) -> Self {
        let registry = IntervalRegistry::new(queue.clone(), store.clone());
        Self {
            store,
            queue,
            registry,
            local,
            executor,
        }
    }

    pub fn registry(&self) -> &IntervalRegistry {
        &self.registry
    }
}

/// Time an interval re-arms at after a run that started at `now` (poll time)
/// and took `elapsed`. A run that finishes within the second it was due must
/// not re-arm onto that same slot.
fn rearm_time(now: i64, run_at: i64, elapsed: Duration) -> i64 {
    let elapsed = i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX);
    now.saturating_add(elapsed).max(run_at.saturating_add(1))
}

#[async_trait]
impl JobHandler for Dispatcher {
    async fn handle(&self, job: &QueuedJob, now: i64) -> Result<()> {
        tracing::debug!(job_id = job.id, hook = %job.hook, run_at = job.run_at, "Dispatching job");

        // Interval jobs re-arm, then complete whatever the run returned.
        match job.job()? {
            Job::LocalInterval => {
                let started = Instant::now();
                let run = self.local.run().await;
                let rearm_at = rearm_time(now, job.run_at, started.elapsed());
                self.registry.schedule_local(None, rearm_at)?;
                if let Err(e) = run {
                    tracing::warn!(job_id = job.id, error = %e, "Local warm-up interval run failed");
                }
            }
            Job::ExternalInterval { domain } => {
                let started = Instant::now();
                let created = create_chunks(self.store.as_ref(), self.queue.as_ref(), &domain);
                let rearm_at = rearm_time(now, job.run_at, started.elapsed());
                self.registry.schedule_external(&domain, rearm_at)?;
                if let Err(e) = created {
                    tracing::warn!(job_id = job.id, domain = %domain, error = %e, "Chunk creation failed");
                }
            }
            Job::FixMissingIntervals => self.registry.fix_missing_intervals(now)?,
            Job::WarmChunk(chunk) => {
                let summary = self.executor.warm_chunk(&chunk).await?;
                tracing::info!(
                    job_id = job.id,
                    urls = chunk.urls.len(),
                    servers = summary.servers,
                    success = summary.success,
                    failed = summary.failed,
                    "Chunk warmed"
                );
            }
            Job::StartWarmUp => {
                self.local.run().await?;
            }
            Job::StopWarmUp => request_stop(self.store.as_ref())?,
        }

        Ok(())
    }

    async fn on_start(&self, now: i64) -> Result<()> {
        if self.registry.post_activation(now)? {
            tracing::info!("Post-activation scheduling done");
        }
        self.registry.schedule_sweep(now)?;
        Ok(())
    }
}
