//! PostgreSQL cache store and job queue. Needs `DATABASE_URL`; run with `--ignored`.

use chrono::Utc;
use matchday::cache::{CacheEntry, CacheStore};
use matchday::catalog::Resource;
use matchday::data::{PgCacheStore, PgJobQueue};
use matchday::queue::{EnqueueOutcome, JobQueue, JobState};
use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_enqueue_is_idempotent_per_key(pool: PgPool) {
    let queue = PgJobQueue::new(pool);
    let resource = Resource::standings(2021);
    let now = Utc::now();

    assert_eq!(
        queue.enqueue(&resource, now).await.unwrap(),
        EnqueueOutcome::Enqueued
    );
    assert_eq!(
        queue.enqueue(&resource, now).await.unwrap(),
        EnqueueOutcome::AlreadyQueued(JobState::Waiting)
    );
    assert_eq!(queue.len().await.unwrap(), 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_lock_next_skips_delayed_until_due(pool: PgPool) {
    let queue = PgJobQueue::new(pool);
    let first = Resource::competitions();
    let second = Resource::competition(2021);
    let now = Utc::now();

    queue.enqueue(&first, now).await.unwrap();
    queue.enqueue(&second, now).await.unwrap();

    let job = queue.lock_next(now).await.unwrap().unwrap();
    assert_eq!(job.key(), first.key());
    queue
        .delay(&first.key(), now + chrono::Duration::seconds(60))
        .await
        .unwrap();

    let job = queue.lock_next(now).await.unwrap().unwrap();
    assert_eq!(job.key(), second.key());
    assert!(queue.lock_next(now).await.unwrap().is_none());

    let later = now + chrono::Duration::seconds(61);
    let job = queue.lock_next(later).await.unwrap().unwrap();
    assert_eq!(job.key(), first.key());
    assert_eq!(job.rate_limit_delays, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_release_active_requeues_orphans(pool: PgPool) {
    let queue = PgJobQueue::new(pool);
    let resource = Resource::competitions();
    let now = Utc::now();

    queue.enqueue(&resource, now).await.unwrap();
    queue.lock_next(now).await.unwrap();
    assert_eq!(
        queue.state(&resource.key()).await.unwrap(),
        Some(JobState::Active)
    );

    assert_eq!(queue.release_active().await.unwrap(), 1);
    assert_eq!(
        queue.state(&resource.key()).await.unwrap(),
        Some(JobState::Waiting)
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_cache_entries_expire(pool: PgPool) {
    let cache = PgCacheStore::new(pool);
    let key = Resource::competitions().key();

    let fresh = CacheEntry {
        key: key.clone(),
        payload: json!({ "competitions": [] }),
        written_at: Utc::now(),
    };
    cache.set(fresh.clone(), Duration::from_secs(3600)).await.unwrap();
    let stored = cache.get(&key).await.unwrap().unwrap();
    assert_eq!(stored.payload, fresh.payload);

    let expired = CacheEntry {
        written_at: Utc::now() - chrono::Duration::hours(2),
        ..fresh
    };
    cache.set(expired, Duration::from_secs(3600)).await.unwrap();
    assert!(cache.get(&key).await.unwrap().is_none());
    assert_eq!(cache.purge_expired().await.unwrap(), 1);
}
