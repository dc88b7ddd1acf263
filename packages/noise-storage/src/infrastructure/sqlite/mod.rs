//! SQLite adapter for the result cache
//!
//! One table, one row per fingerprint. Rows are replaced as a whole
//! (`INSERT ... ON CONFLICT DO UPDATE`), expired rows are treated as
//! misses and removed lazily on read.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{CacheEntry, CachePolicy, ResultCache};
use crate::{Result, StorageError};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache_entries (
        key        TEXT PRIMARY KEY,
        value      TEXT NOT NULL,
        stored_at  TEXT NOT NULL,
        expires_at TEXT
    );
";

pub struct SqliteResultCache {
    conn: Arc<Mutex<Connection>>,
    policy: CachePolicy,
}

impl SqliteResultCache {
    pub fn open(path: impl AsRef<Path>, policy: CachePolicy) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, policy)
    }

    pub fn new_in_memory(policy: CachePolicy) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, policy)
    }

    fn with_connection(conn: Connection, policy: CachePolicy) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            policy,
        })
    }

    /// Run a blocking closure against the connection off the async executor
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StorageError::unavailable("SQLite connection lock poisoned"))?;
            f(&guard)
        })
        .await?
    }
}

#[async_trait]
impl ResultCache for SqliteResultCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let storage_key = self.policy.storage_key(key);

        self.with_conn(move |conn| {
            let row: Option<(String, Option<DateTime<Utc>>)> = conn
                .query_row(
                    "SELECT value, expires_at FROM cache_entries WHERE key = ?1",
                    params![storage_key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((_, Some(expires_at))) if expires_at <= Utc::now() => {
                    conn.execute(
                        "DELETE FROM cache_entries WHERE key = ?1",
                        params![storage_key],
                    )?;
                    Ok(None)
                }
                Some((value, _)) => Ok(Some(serde_json::from_str(&value)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let entry = CacheEntry::new(self.policy.storage_key(key), value, self.policy.ttl);
        let encoded = serde_json::to_string(&entry.value)?;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO cache_entries (key, value, stored_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    stored_at = excluded.stored_at,
                    expires_at = excluded.expires_at",
                params![entry.key, encoded, entry.stored_at, entry.expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let storage_key = self.policy.storage_key(key);

        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM cache_entries WHERE key = ?1",
                params![storage_key],
            )?;
            Ok(removed > 0)
        })
        .await
    }
}
