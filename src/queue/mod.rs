//! Durable fetch-job queue.
//!
//! A job's identity is its [`ResourceKey`]: the queue holds at most one live
//! (waiting, active or delayed) job per key, and enqueueing a key that already
//! has one is a no-op. Succeeded and failed jobs are removed, so the next
//! enqueue for that key starts a fresh job.

mod memory;

pub use memory::MemoryJobQueue;

use crate::catalog::{Resource, ResourceKey};
use crate::data::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    /// Pushed back to a later `run_at` after an upstream rate limit.
    Delayed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Delayed => "delayed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "delayed" => Ok(JobState::Delayed),
            other => Err(StoreError::Corrupt(format!("unknown job state '{other}'"))),
        }
    }
}

/// A unit of refresh work for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub resource: Resource,
    pub state: JobState,
    /// Earliest time the job may be picked up.
    pub run_at: DateTime<Utc>,
    pub queued_at: DateTime<Utc>,
    /// How many times upstream rate limiting has pushed this job back.
    pub rate_limit_delays: u32,
}

impl Job {
    pub fn key(&self) -> ResourceKey {
        self.resource.key()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A live job for the key already exists; nothing was added.
    AlreadyQueued(JobState),
}

impl EnqueueOutcome {
    pub fn is_new(self) -> bool {
        matches!(self, EnqueueOutcome::Enqueued)
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Add a waiting job for `resource` unless a live job for its key exists.
    async fn enqueue(
        &self,
        resource: &Resource,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, StoreError>;

    /// State of the live job for `key`, if any.
    async fn state(&self, key: &ResourceKey) -> Result<Option<JobState>, StoreError>;

    /// Claim the oldest due job (waiting, or delayed with `run_at <= now`) and mark it active.
    async fn lock_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, StoreError>;

    /// Remove a job that finished successfully.
    async fn complete(&self, key: &ResourceKey) -> Result<(), StoreError>;

    /// Remove a job that failed terminally.
    async fn fail(&self, key: &ResourceKey) -> Result<(), StoreError>;

    /// Move an active job to delayed, runnable again at `until`.
    async fn delay(&self, key: &ResourceKey, until: DateTime<Utc>) -> Result<(), StoreError>;

    /// Return jobs left active by a previous process to waiting.
    async fn release_active(&self) -> Result<u64, StoreError>;

    /// Number of live jobs.
    async fn len(&self) -> Result<usize, StoreError>;
}
