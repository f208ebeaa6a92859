//! SQLite-backed job queue

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use super::{
    canonical_args, next_occurrence, Hook, JobId, JobQueue, JobStatus, QueueError, QueueResult,
    QueueStats, QueuedJob,
};
use crate::storage::{lock, open_sqlite};

const JOB_COLUMNS: &str =
    "id, hook, args, run_at, period_secs, status, attempts, last_error";

/// Job queue persisted in a `jobs` table
///
/// Every instance gets a worker id that is stamped on the rows it claims, so
/// a crashed worker's running jobs can be told apart in the table.
pub struct SqliteJobQueue {
    conn: Mutex<Connection>,
    worker_id: String,
}

impl SqliteJobQueue {
    pub fn new(path: impl AsRef<Path>) -> QueueResult<Self> {
        let path = path.as_ref();
        let queue = Self {
            conn: Mutex::new(open_sqlite(path)?),
            worker_id: Uuid::new_v4().to_string(),
        };
        queue.create_schema()?;

        tracing::debug!(path = %path.display(), worker_id = %queue.worker_id, "Job queue initialized");
        Ok(queue)
    }

    /// Create in-memory queue (for testing)
    pub fn in_memory() -> QueueResult<Self> {
        let queue = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            worker_id: Uuid::new_v4().to_string(),
        };
        queue.create_schema()?;
        Ok(queue)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn create_schema(&self) -> QueueResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS jobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    hook TEXT NOT NULL,
                    args TEXT NOT NULL,
                    run_at INTEGER NOT NULL,
                    period_secs INTEGER,
                    status TEXT NOT NULL DEFAULT 'pending',
                    attempts INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT,
                    claimed_by TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_jobs_due
                    ON jobs(status, run_at);

                CREATE INDEX IF NOT EXISTS idx_jobs_key
                    ON jobs(hook, args, status);
                "#,
        )?;
        Ok(())
    }

    fn row_to_job(row: &Row<'_>) -> rusqlite::Result<(QueuedJobRow, String)> {
        Ok((
            QueuedJobRow {
                id: row.get(0)?,
                hook: row.get(1)?,
                run_at: row.get(3)?,
                period_secs: row.get(4)?,
                status: row.get(5)?,
                attempts: row.get(6)?,
                last_error: row.get(7)?,
            },
            row.get(2)?,
        ))
    }

    fn decode((row, args): (QueuedJobRow, String)) -> QueueResult<QueuedJob> {
        let args: Vec<Value> = serde_json::from_str(&args)?;
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|reason| QueueError::InvalidArgs {
                hook: row.hook.clone(),
                reason,
            })?;
        Ok(QueuedJob {
            id: row.id,
            hook: row.hook,
            args,
            run_at: row.run_at,
            period_secs: row.period_secs,
            status,
            attempts: row.attempts,
            last_error: row.last_error,
        })
    }

    fn insert(
        conn: &Connection,
        run_at: i64,
        period_secs: Option<i64>,
        hook: &str,
        args: &str,
    ) -> QueueResult<JobId> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO jobs (hook, args, run_at, period_secs, status, attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)",
            params![hook, args, run_at, period_secs, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn pending_exists(conn: &Connection, hook: &str, args: &str) -> QueueResult<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM jobs WHERE hook = ?1 AND args = ?2 AND status = 'pending' LIMIT 1",
                params![hook, args],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn load(conn: &Connection, id: JobId) -> QueueResult<QueuedJob> {
        let raw = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                Self::row_to_job,
            )
            .optional()?
            .ok_or(QueueError::JobNotFound(id))?;
        Self::decode(raw)
    }

    /// Queue the next occurrence of a recurring job unless one is already pending
    fn rearm_recurring(conn: &Connection, job: &QueuedJob, now: i64) -> QueueResult<()> {
        let Some(period) = job.period_secs else {
            return Ok(());
        };
        let args = canonical_args(&job.args)?;
        if Self::pending_exists(conn, &job.hook, &args)? {
            return Ok(());
        }
        let next = next_occurrence(job.run_at, period, now);
        Self::insert(conn, next, Some(period), &job.hook, &args)?;
        tracing::debug!(hook = %job.hook, next_run = next, "Recurring job re-armed");
        Ok(())
    }
}

struct QueuedJobRow {
    id: JobId,
    hook: String,
    run_at: i64,
    period_secs: Option<i64>,
    status: String,
    attempts: u32,
    last_error: Option<String>,
}

impl JobQueue for SqliteJobQueue {
    fn enqueue_now(&self, hook: Hook, args: &[Value]) -> QueueResult<JobId> {
        self.enqueue_at(Utc::now().timestamp(), hook, args)
    }

    fn enqueue_at(&self, run_at: i64, hook: Hook, args: &[Value]) -> QueueResult<JobId> {
        let args = canonical_args(args)?;
        let conn = lock(&self.conn)?;
        let id = Self::insert(&conn, run_at, None, hook.as_str(), &args)?;
        tracing::debug!(job_id = id, hook = %hook, run_at, "Job enqueued");
        Ok(id)
    }

    fn schedule_recurring(
        &self,
        first_run: i64,
        period_secs: i64,
        hook: Hook,
        args: &[Value],
        unique: bool,
    ) -> QueueResult<Option<JobId>> {
        let args = canonical_args(args)?;
        let conn = lock(&self.conn)?;
        if unique && Self::pending_exists(&conn, hook.as_str(), &args)? {
            return Ok(None);
        }
        let id = Self::insert(&conn, first_run, Some(period_secs), hook.as_str(), &args)?;
        tracing::debug!(job_id = id, hook = %hook, first_run, period_secs, "Recurring job scheduled");
        Ok(Some(id))
    }

    fn find_pending(&self, hook: Hook, args: &[Value]) -> QueueResult<Option<QueuedJob>> {
        let args = canonical_args(args)?;
        let conn = lock(&self.conn)?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE hook = ?1 AND args = ?2 AND status = 'pending'
                     ORDER BY run_at, id LIMIT 1"
                ),
                params![hook.as_str(), args],
                Self::row_to_job,
            )
            .optional()?;
        raw.map(Self::decode).transpose()
    }

    fn cancel_all(&self, hook: Hook) -> QueueResult<usize> {
        let conn = lock(&self.conn)?;
        let n = conn.execute(
            "UPDATE jobs SET status = 'canceled', updated_at = ?2
             WHERE hook = ?1 AND status = 'pending'",
            params![hook.as_str(), Utc::now().to_rfc3339()],
        )?;
        if n > 0 {
            tracing::debug!(hook = %hook, canceled = n, "Pending jobs canceled");
        }
        Ok(n)
    }

    fn claim_due(&self, now: i64, limit: usize) -> QueueResult<Vec<QueuedJob>> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;

        let raw: Vec<(QueuedJobRow, String)> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE status = 'pending' AND run_at <= ?1
                 ORDER BY run_at, id LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![now, limit as i64], Self::row_to_job)?;
            rows.collect::<Result<_, _>>()?
        };

        let updated_at = Utc::now().to_rfc3339();
        let mut claimed = Vec::with_capacity(raw.len());
        for entry in raw {
            let mut job = Self::decode(entry)?;
            tx.execute(
                "UPDATE jobs SET status = 'running', attempts = attempts + 1,
                        claimed_by = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![job.id, self.worker_id, updated_at],
            )?;
            job.status = JobStatus::Running;
            job.attempts += 1;
            claimed.push(job);
        }

        tx.commit()?;
        Ok(claimed)
    }

    fn complete(&self, id: JobId, now: i64) -> QueueResult<()> {
        let conn = lock(&self.conn)?;
        let job = Self::load(&conn, id)?;
        conn.execute(
            "UPDATE jobs SET status = 'complete', last_error = NULL, updated_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Self::rearm_recurring(&conn, &job, now)
    }

    fn fail(&self, id: JobId, error: &str, retry_at: Option<i64>, now: i64) -> QueueResult<()> {
        let conn = lock(&self.conn)?;
        let job = Self::load(&conn, id)?;
        let updated_at = Utc::now().to_rfc3339();

        match retry_at {
            Some(run_at) => {
                conn.execute(
                    "UPDATE jobs SET status = 'pending', run_at = ?2, last_error = ?3, updated_at = ?4
                     WHERE id = ?1",
                    params![id, run_at, error, updated_at],
                )?;
                Ok(())
            }
            None => {
                conn.execute(
                    "UPDATE jobs SET status = 'failed', last_error = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id, error, updated_at],
                )?;
                Self::rearm_recurring(&conn, &job, now)
            }
        }
    }

    fn pending_jobs(&self) -> QueueResult<Vec<QueuedJob>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' ORDER BY run_at, id"
        ))?;
        let raw: Vec<(QueuedJobRow, String)> = stmt
            .query_map([], Self::row_to_job)?
            .collect::<Result<_, _>>()?;
        raw.into_iter().map(Self::decode).collect()
    }

    fn stats(&self) -> QueueResult<QueueStats> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let counts: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;

        let mut stats = QueueStats::default();
        for (status, count) in counts {
            let count = count as usize;
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Pending) => stats.pending = count,
                Ok(JobStatus::Running) => stats.running = count,
                Ok(JobStatus::Complete) => stats.complete = count,
                Ok(JobStatus::Failed) => stats.failed = count,
                Ok(JobStatus::Canceled) => stats.canceled = count,
                Err(e) => tracing::warn!("Ignoring jobs with {}", e),
            }
        }
        Ok(stats)
    }
}
