//! In-process cache store used when no database is configured.

use super::{CacheEntry, CacheStore};
use crate::catalog::ResourceKey;
use crate::clock::Clock;
use crate::data::StoreError;
use crate::utils::add_duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

#[derive(Clone)]
pub struct MemoryCacheStore {
    /// key → (expires_at, entry)
    entries: Arc<DashMap<ResourceKey, (DateTime<Utc>, CacheEntry)>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<CacheEntry>, StoreError> {
        let now = self.clock.now();
        // remove_if takes the shard write lock, so an expired entry cannot be
        // resurrected by a concurrent set between the check and the removal
        if self
            .entries
            .remove_if(key, |_, (expires_at, _)| *expires_at < now)
            .is_some()
        {
            trace!(key = %key, "evicted expired cache entry");
            return Ok(None);
        }
        Ok(self.entries.get(key).map(|e| e.value().1.clone()))
    }

    async fn set(&self, entry: CacheEntry, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = add_duration(entry.written_at, ttl);
        self.entries.insert(entry.key.clone(), (expires_at, entry));
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, (expires_at, _)| *expires_at >= now);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Resource;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn entry(clock: &ManualClock, resource: &Resource) -> CacheEntry {
        CacheEntry {
            key: resource.key(),
            payload: json!({"competitions": []}),
            written_at: clock.now(),
        }
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let clock = ManualClock::default();
        let store = MemoryCacheStore::new(Arc::new(clock.clone()));
        let resource = Resource::competitions();

        store
            .set(entry(&clock, &resource), Duration::from_secs(300))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(300));
        assert!(store.get(&resource.key()).await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(store.get(&resource.key()).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn set_overwrites_whole_entry() {
        let clock = ManualClock::default();
        let store = MemoryCacheStore::new(Arc::new(clock.clone()));
        let resource = Resource::standings(2021);

        store
            .set(entry(&clock, &resource), Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(30));
        let newer = CacheEntry {
            payload: json!({"standings": [1]}),
            ..entry(&clock, &resource)
        };
        store.set(newer.clone(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get(&resource.key()).await.unwrap(), Some(newer));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let clock = ManualClock::default();
        let store = MemoryCacheStore::new(Arc::new(clock.clone()));

        store
            .set(entry(&clock, &Resource::standings(1)), Duration::from_secs(10))
            .await
            .unwrap();
        store
            .set(entry(&clock, &Resource::standings(2)), Duration::from_secs(100))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(50));
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}
