//! Cache entries and the key-value store that holds them.

mod memory;

pub use memory::MemoryCacheStore;

use crate::catalog::ResourceKey;
use crate::data::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

/// A cached upstream payload. Replaced whole on refresh, never merged.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: ResourceKey,
    pub payload: Value,
    pub written_at: DateTime<Utc>,
}

/// Key-value store with per-entry TTL.
///
/// Entries whose TTL has elapsed are never returned by [`CacheStore::get`].
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, key: &ResourceKey) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or overwrite `entry`, expiring it `ttl` after `entry.written_at`.
    async fn set(&self, entry: CacheEntry, ttl: Duration) -> Result<(), StoreError>;

    /// Drop every expired entry, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64, StoreError>;
}
