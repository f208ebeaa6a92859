//! Append-only log of per-URL warm attempts
//!
//! Every warm attempt, local or through a remote warmer, ends up here as
//! exactly one row. The core only writes; `recent` and `stats` exist for the
//! CLI status view.

use std::path::Path;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::{lock, open_sqlite, StorageError, StorageResult};

/// Cache-layer status headers reported for a warmed URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatus {
    /// `cf-cache-status`
    pub cloudflare: String,
    /// `x-wp-super-cache`
    pub super_cache: String,
    /// `x-cache`
    pub x_cache: String,
}

/// A successful warm attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessRecord {
    pub subject: String,
    pub batch_id: String,
    pub depth: u32,
    pub elapsed_secs: f64,
    pub extra: Option<String>,
    pub response_code: String,
    pub retry_count: u32,
    pub user_agent: String,
    pub context: Vec<String>,
    pub content_type: String,
    pub content_length: String,
    pub cache: CacheStatus,
}

/// A failed warm attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub subject: String,
    pub batch_id: String,
    pub depth: u32,
    pub elapsed_secs: Option<f64>,
    pub reason: String,
    pub retry_count: u32,
    pub user_agent: String,
}

/// Outcome stored with a log entry
#[derive(Debug, Clone, PartialEq)]
pub enum VisitOutcome {
    Success(SuccessRecord),
    Failure(FailureRecord),
}

impl VisitOutcome {
    pub fn subject(&self) -> &str {
        match self {
            Self::Success(r) => &r.subject,
            Self::Failure(r) => &r.subject,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// A stored log entry
#[derive(Debug, Clone, PartialEq)]
pub struct VisitEntry {
    pub logged_at: DateTime<Utc>,
    pub outcome: VisitOutcome,
}

/// Aggregate counts over the log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

impl VisitStats {
    /// Calculate success rate (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.success as f64 / self.total as f64
    }
}

/// Contract for the logging sink
pub trait VisitLog: Send + Sync {
    fn log_success(&self, record: SuccessRecord) -> StorageResult<()>;

    fn log_failure(&self, record: FailureRecord) -> StorageResult<()>;

    /// Most recent entries, newest first
    fn recent(&self, limit: usize) -> StorageResult<Vec<VisitEntry>>;

    fn stats(&self) -> StorageResult<VisitStats>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`VisitLog`]
///
/// Success and failure rows share one table; the full record is kept as JSON
/// next to the indexed columns.
pub struct SqliteVisitLog {
    conn: Mutex<Connection>,
}

impl SqliteVisitLog {
    pub fn new(path: impl AsRef<Path>) -> StorageResult<Self> {
        let log = Self {
            conn: Mutex::new(open_sqlite(path.as_ref())?),
        };
        log.create_schema()?;
        Ok(log)
    }

    /// Create in-memory log (for testing)
    pub fn in_memory() -> StorageResult<Self> {
        let log = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        log.create_schema()?;
        Ok(log)
    }

    fn create_schema(&self) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS warm_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    logged_at TEXT NOT NULL,
                    status TEXT NOT NULL,
                    subject TEXT NOT NULL,
                    batch_id TEXT NOT NULL,
                    record TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_warm_logs_batch
                    ON warm_logs(batch_id);

                CREATE INDEX IF NOT EXISTS idx_warm_logs_status
                    ON warm_logs(status);
                "#,
        )?;
        Ok(())
    }

    fn insert(&self, status: &str, subject: &str, batch_id: &str, record: String) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO warm_logs (logged_at, status, subject, batch_id, record)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![Utc::now().to_rfc3339(), status, subject, batch_id, record],
        )?;
        Ok(())
    }
}

impl VisitLog for SqliteVisitLog {
    fn log_success(&self, record: SuccessRecord) -> StorageResult<()> {
        let json = serde_json::to_string(&record)?;
        self.insert("success", &record.subject, &record.batch_id, json)
    }

    fn log_failure(&self, record: FailureRecord) -> StorageResult<()> {
        let json = serde_json::to_string(&record)?;
        self.insert("failed", &record.subject, &record.batch_id, json)
    }

    fn recent(&self, limit: usize) -> StorageResult<Vec<VisitEntry>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT logged_at, status, record FROM warm_logs ORDER BY id DESC LIMIT ?1",
        )?;

        let rows: Vec<(String, String, String)> = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<_, _>>()?;

        rows.into_iter()
            .map(|(logged_at, status, record)| {
                let logged_at = DateTime::parse_from_rfc3339(&logged_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                let outcome = if status == "success" {
                    VisitOutcome::Success(serde_json::from_str(&record)?)
                } else {
                    VisitOutcome::Failure(serde_json::from_str(&record)?)
                };
                Ok(VisitEntry { logged_at, outcome })
            })
            .collect::<Result<Vec<_>, StorageError>>()
    }

    fn stats(&self) -> StorageResult<VisitStats> {
        let conn = lock(&self.conn)?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM warm_logs", [], |row| row.get(0))?;
        let success: i64 = conn.query_row(
            "SELECT COUNT(*) FROM warm_logs WHERE status = 'success'",
            [],
            |row| row.get(0),
        )?;

        Ok(VisitStats {
            total: total as usize,
            success: success as usize,
            failed: (total - success) as usize,
        })
    }
}

// ============================================================================
// Mock Implementation (for testing)
// ============================================================================

/// In-memory implementation of [`VisitLog`]
#[derive(Default)]
pub struct MemoryVisitLog {
    entries: RwLock<Vec<VisitEntry>>,
}

impl MemoryVisitLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in insertion order
    pub fn entries(&self) -> Vec<VisitEntry> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }

    /// All success records in insertion order
    pub fn successes(&self) -> Vec<SuccessRecord> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e.outcome {
                VisitOutcome::Success(r) => Some(r),
                VisitOutcome::Failure(_) => None,
            })
            .collect()
    }

    /// All failure records in insertion order
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e.outcome {
                VisitOutcome::Failure(r) => Some(r),
                VisitOutcome::Success(_) => None,
            })
            .collect()
    }

    fn push(&self, outcome: VisitOutcome) -> StorageResult<()> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        entries.push(VisitEntry {
            logged_at: Utc::now(),
            outcome,
        });
        Ok(())
    }
}

impl VisitLog for MemoryVisitLog {
    fn log_success(&self, record: SuccessRecord) -> StorageResult<()> {
        self.push(VisitOutcome::Success(record))
    }

    fn log_failure(&self, record: FailureRecord) -> StorageResult<()> {
        self.push(VisitOutcome::Failure(record))
    }

    fn recent(&self, limit: usize) -> StorageResult<Vec<VisitEntry>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }

    fn stats(&self) -> StorageResult<VisitStats> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        let success = entries.iter().filter(|e| e.outcome.is_success()).count();
        Ok(VisitStats {
            total: entries.len(),
            success,
            failed: entries.len() - success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(subject: &str) -> SuccessRecord {
        SuccessRecord {
            subject: subject.to_string(),
            batch_id: "2000-01-01".to_string(),
            depth: 0,
            elapsed_secs: 0.42,
            extra: None,
            response_code: "200".to_string(),
            retry_count: 0,
            user_agent: "prewarm-test".to_string(),
            context: Vec::new(),
            content_type: "text/html".to_string(),
            content_length: "1024".to_string(),
            cache: CacheStatus {
                cloudflare: "HIT".to_string(),
                ..Default::default()
            },
        }
    }

    fn failure(subject: &str) -> FailureRecord {
        FailureRecord {
            subject: subject.to_string(),
            batch_id: "2000-01-01".to_string(),
            depth: 0,
            elapsed_secs: None,
            reason: "Server response code: 500".to_string(),
            retry_count: 0,
            user_agent: String::new(),
        }
    }

    fn exercise(log: &dyn VisitLog) {
        log.log_success(success("us1 https://example.com/")).unwrap();
        log.log_failure(failure("us1 https://example.com/a")).unwrap();
        log.log_success(success("us1 https://example.com/b")).unwrap();

        let stats = log.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.success, 2);
        assert_eq!(stats.failed, 1);

        let recent = log.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].outcome.subject(), "us1 https://example.com/b");
        assert!(!recent[1].outcome.is_success());
    }

    #[test]
    fn test_sqlite_visit_log() {
        let log = SqliteVisitLog::in_memory().unwrap();
        exercise(&log);
    }

    #[test]
    fn test_memory_visit_log() {
        let log = MemoryVisitLog::new();
        exercise(&log);
        assert_eq!(log.successes().len(), 2);
        assert_eq!(log.failures().len(), 1);
    }

    #[test]
    fn test_sqlite_roundtrips_full_record() {
        let log = SqliteVisitLog::in_memory().unwrap();
        log.log_success(success("x")).unwrap();

        let recent = log.recent(1).unwrap();
        match &recent[0].outcome {
            VisitOutcome::Success(r) => assert_eq!(r, &success("x")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_success_rate() {
        let stats = VisitStats {
            total: 4,
            success: 3,
            failed: 1,
        };
        assert_eq!(stats.success_rate(), 0.75);
        assert_eq!(VisitStats::default().success_rate(), 1.0);
    }
}
