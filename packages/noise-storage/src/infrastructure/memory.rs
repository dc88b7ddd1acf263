//! Process-local result cache

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::domain::{CacheEntry, CachePolicy, ResultCache};
use crate::Result;

/// Concurrent in-memory cache (lock-free sharded map)
pub struct InMemoryResultCache {
    entries: DashMap<String, CacheEntry>,
    policy: CachePolicy,
}

impl InMemoryResultCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        before - self.entries.len()
    }

    #[cfg(test)]
    fn insert_entry(&self, entry: CacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }
}

impl Default for InMemoryResultCache {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let storage_key = self.policy.storage_key(key);
        let now = Utc::now();

        let expired = match self.entries.get(&storage_key) {
            Some(entry) if !entry.is_expired_at(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries
                .remove_if(&storage_key, |_, entry| entry.is_expired_at(now));
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let storage_key = self.policy.storage_key(key);
        let entry = CacheEntry::new(storage_key.clone(), value, self.policy.ttl);
        self.entries.insert(storage_key, entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let storage_key = self.policy.storage_key(key);
        Ok(self.entries.remove(&storage_key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_and_get() {
        let cache = InMemoryResultCache::default();

        cache.put("abc_def", json!({"geojson": {"features": []}})).await.unwrap();

        let value = cache.get("abc_def").await.unwrap();
        assert_eq!(value, Some(json!({"geojson": {"features": []}})));
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let cache = InMemoryResultCache::default();
        assert_eq!(cache.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_overwrites_whole_value() {
        let cache = InMemoryResultCache::default();

        cache.put("k", json!({"a": 1, "b": 2})).await.unwrap();
        cache.put("k", json!({"c": 3})).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"c": 3})));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let policy = CachePolicy::new("noise", Some(Duration::days(1)));
        let cache = InMemoryResultCache::new(policy.clone());

        let mut entry = CacheEntry::new(policy.storage_key("old"), json!(1), None);
        entry.expires_at = Some(Utc::now() - Duration::seconds(1));
        cache.insert_entry(entry);

        assert_eq!(cache.get("old").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let policy = CachePolicy::new("noise", None);
        let cache = InMemoryResultCache::new(policy.clone());

        let mut stale = CacheEntry::new(policy.storage_key("stale"), json!(1), None);
        stale.expires_at = Some(Utc::now() - Duration::seconds(1));
        cache.insert_entry(stale);
        cache.put("fresh", json!(2)).await.unwrap();

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get("fresh").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = InMemoryResultCache::default();
        cache.put("k", json!(1)).await.unwrap();

        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_writers_distinct_keys() {
        let cache = std::sync::Arc::new(InMemoryResultCache::default());

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.put(&format!("key-{}", i), json!(i)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.len(), 16);
        assert_eq!(cache.get("key-7").await.unwrap(), Some(json!(7)));
    }
}
