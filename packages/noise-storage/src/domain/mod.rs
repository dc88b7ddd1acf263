//! Domain layer for the result cache
//!
//! - `CacheEntry`: one stored result with its expiry
//! - `CachePolicy`: key prefix and retention applied by every backend
//! - `ResultCache`: the port trait used by the job orchestrator

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Stored computation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Storage key (prefix applied)
    pub key: String,
    /// Complete result document
    pub value: serde_json::Value,
    /// Write timestamp
    pub stored_at: DateTime<Utc>,
    /// `None` means the entry never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: serde_json::Value, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value,
            stored_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }
}

/// Key namespace and retention policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub key_prefix: String,
    pub ttl: Option<Duration>,
}

impl CachePolicy {
    pub fn new(key_prefix: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            ttl,
        }
    }

    /// Retention expressed in days (`0` disables expiry)
    pub fn with_ttl_days(key_prefix: impl Into<String>, ttl_days: u32) -> Self {
        let ttl = (ttl_days > 0).then(|| Duration::days(i64::from(ttl_days)));
        Self::new(key_prefix, ttl)
    }

    pub fn storage_key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::with_ttl_days("noise_simulations", 30)
    }
}

/// Result cache port
///
/// Implementations must support concurrent readers and writers. `put`
/// replaces the whole value stored under `key`.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Fetch a live (non-expired) value
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Store or overwrite a value
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Remove a value, returning whether one was present
    async fn delete(&self, key: &str) -> Result<bool>;
}
