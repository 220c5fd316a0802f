//! Job queue backed by the `fetch_jobs` table.
//!
//! The primary key on `key` enforces one live job per resource; terminal jobs
//! are deleted rather than kept, so a conflict always means a live job exists.

use crate::catalog::{Resource, ResourceKey, ResourceType};
use crate::data::StoreError;
use crate::queue::{EnqueueOutcome, Job, JobQueue, JobState};
use crate::utils::log_if_slow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::{Duration, Instant};

const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    resource_type: String,
    param: Option<String>,
    state: String,
    run_at: DateTime<Utc>,
    queued_at: DateTime<Utc>,
    rate_limit_delays: i32,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let kind: ResourceType = row.resource_type.parse()?;
        Ok(Job {
            resource: Resource::new(kind, row.param.as_deref())?,
            state: row.state.parse()?,
            run_at: row.run_at,
            queued_at: row.queued_at,
            rate_limit_delays: u32::try_from(row.rate_limit_delays).unwrap_or(0),
        })
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(
        &self,
        resource: &Resource,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, StoreError> {
        let key = resource.key();
        let inserted = sqlx::query(
            r#"
            INSERT INTO fetch_jobs (key, resource_type, param, state, run_at, queued_at)
            VALUES ($1, $2, $3, 'waiting', $4, $4)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key.as_str())
        .bind(resource.kind().slug())
        .bind(resource.param())
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(EnqueueOutcome::Enqueued);
        }

        // The conflicting job may have finished between the insert and this read
        match self.state(&key).await? {
            Some(state) => Ok(EnqueueOutcome::AlreadyQueued(state)),
            None => self.enqueue(resource, now).await,
        }
    }

    async fn state(&self, key: &ResourceKey) -> Result<Option<JobState>, StoreError> {
        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM fetch_jobs WHERE key = $1")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await?;
        state.map(|s| s.parse()).transpose()
    }

    async fn lock_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        let start = Instant::now();
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE fetch_jobs
            SET state = 'active'
            WHERE key = (
                SELECT key FROM fetch_jobs
                WHERE state IN ('waiting', 'delayed') AND run_at <= $1
                ORDER BY run_at, seq
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING resource_type, param, state, run_at, queued_at, rate_limit_delays
            "#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        log_if_slow(start, SLOW_QUERY_THRESHOLD, "lock next fetch job");

        row.map(Job::try_from).transpose()
    }

    async fn complete(&self, key: &ResourceKey) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM fetch_jobs WHERE key = $1")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail(&self, key: &ResourceKey) -> Result<(), StoreError> {
        self.complete(key).await
    }

    async fn delay(&self, key: &ResourceKey, until: DateTime<Utc>) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE fetch_jobs
            SET state = 'delayed',
                run_at = $2,
                rate_limit_delays = rate_limit_delays + 1,
                seq = nextval('fetch_jobs_seq_seq')
            WHERE key = $1
            "#,
        )
        .bind(key.as_str())
        .bind(until)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::MissingJob(key.clone()));
        }
        Ok(())
    }

    async fn release_active(&self) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE fetch_jobs SET state = 'waiting' WHERE state = 'active'")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fetch_jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
