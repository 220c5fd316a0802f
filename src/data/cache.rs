//! Cache store backed by the `resource_cache` UNLOGGED table.
//!
//! Losing the table on crash recovery only costs a round of cache misses.

use crate::cache::{CacheEntry, CacheStore};
use crate::catalog::ResourceKey;
use crate::data::StoreError;
use crate::utils::add_duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::time::Duration;

#[derive(Clone)]
pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    payload: Value,
    written_at: DateTime<Utc>,
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<CacheEntry>, StoreError> {
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT payload, written_at FROM resource_cache WHERE key = $1 AND expires_at >= now()",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CacheEntry {
            key: key.clone(),
            payload: row.payload,
            written_at: row.written_at,
        }))
    }

    async fn set(&self, entry: CacheEntry, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = add_duration(entry.written_at, ttl);
        sqlx::query(
            r#"
            INSERT INTO resource_cache (key, payload, written_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key)
            DO UPDATE SET payload = EXCLUDED.payload,
                          written_at = EXCLUDED.written_at,
                          expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(entry.key.as_str())
        .bind(&entry.payload)
        .bind(entry.written_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM resource_cache WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
