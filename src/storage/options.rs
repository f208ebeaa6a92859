//! String-keyed option store
//!
//! Site settings, per-domain remote warmer settings, schedule state and the
//! recorded warm-up request args all live here as JSON values. Components
//! never read keys ad hoc: they go through the typed loaders in
//! [`crate::config::settings`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{lock, open_sqlite, StorageError, StorageResult};

/// Contract for the option store
pub trait ConfigStore: Send + Sync {
    /// Get the raw value stored under `key`
    fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Insert or replace the value stored under `key`
    fn set(&self, key: &str, value: &Value) -> StorageResult<()>;

    /// Remove `key`. Returns whether a value was present.
    fn delete(&self, key: &str) -> StorageResult<bool>;
}

/// Typed helpers over any [`ConfigStore`]
pub trait ConfigStoreExt {
    /// Get and deserialize the value stored under `key`
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>>;

    /// Get and deserialize the value stored under `key`, or `default`
    fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> StorageResult<T>;

    /// Serialize and store `value` under `key`
    fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()>;
}

impl<S: ConfigStore + ?Sized> ConfigStoreExt for S {
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get(key)? {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> StorageResult<T> {
        Ok(self.get_as(key)?.unwrap_or(default))
    }

    fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        self.set(key, &serde_json::to_value(value)?)
    }
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`ConfigStore`]
pub struct SqliteConfigStore {
    conn: Mutex<Connection>,
}

impl SqliteConfigStore {
    /// Open (or create) the option table in the database at `path`
    pub fn new(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let store = Self {
            conn: Mutex::new(open_sqlite(path)?),
        };
        store.create_schema()?;

        tracing::debug!(path = %path.display(), "Option store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> StorageResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS options (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                "#,
        )?;
        Ok(())
    }
}

impl ConfigStore for SqliteConfigStore {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let conn = lock(&self.conn)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM options WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|s| serde_json::from_str(&s).map_err(StorageError::from))
            .transpose()
    }

    fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
                INSERT INTO options (key, value, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            params![key, serde_json::to_string(value)?, now],
        )?;

        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let conn = lock(&self.conn)?;
        let n = conn.execute("DELETE FROM options WHERE key = ?1", params![key])?;
        Ok(n > 0)
    }
}

// ============================================================================
// Mock Implementation (for testing)
// ============================================================================

/// In-memory implementation of [`ConfigStore`]
#[derive(Default)]
pub struct MemoryConfigStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let values = self.values.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        let mut values = self.values.write().map_err(|_| StorageError::LockPoisoned)?;
        values.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut values = self.values.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(values.remove(key).is_some())
    }
}
