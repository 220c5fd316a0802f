//! In-process job queue used when no database is configured.

use super::{EnqueueOutcome, Job, JobQueue, JobState};
use crate::catalog::{Resource, ResourceKey};
use crate::data::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct Slot {
    job: Job,
    /// Insertion order, breaks ties between jobs with the same `run_at`.
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<ResourceKey, Slot>,
    next_seq: u64,
}

#[derive(Clone, Default)]
pub struct MemoryJobQueue {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(
        &self,
        resource: &Resource,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, StoreError> {
        let mut inner = self.lock();
        let key = resource.key();
        if let Some(existing) = inner.jobs.get(&key) {
            return Ok(EnqueueOutcome::AlreadyQueued(existing.job.state));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            key,
            Slot {
                job: Job {
                    resource: resource.clone(),
                    state: JobState::Waiting,
                    run_at: now,
                    queued_at: now,
                    rate_limit_delays: 0,
                },
                seq,
            },
        );
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn state(&self, key: &ResourceKey) -> Result<Option<JobState>, StoreError> {
        Ok(self.lock().jobs.get(key).map(|slot| slot.job.state))
    }

    async fn lock_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        let mut inner = self.lock();
        let next = inner
            .jobs
            .values_mut()
            .filter(|slot| slot.job.state != JobState::Active && slot.job.run_at <= now)
            .min_by_key(|slot| (slot.job.run_at, slot.seq));

        Ok(next.map(|slot| {
            slot.job.state = JobState::Active;
            slot.job.clone()
        }))
    }

    async fn complete(&self, key: &ResourceKey) -> Result<(), StoreError> {
        self.lock().jobs.remove(key);
        Ok(())
    }

    async fn fail(&self, key: &ResourceKey) -> Result<(), StoreError> {
        self.lock().jobs.remove(key);
        Ok(())
    }

    async fn delay(&self, key: &ResourceKey, until: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        match inner.jobs.get_mut(key) {
            Some(slot) => {
                slot.job.state = JobState::Delayed;
                slot.job.run_at = until;
                slot.job.rate_limit_delays += 1;
                // Re-enter behind everything already queued
                slot.seq = seq;
                Ok(())
            }
            None => Err(StoreError::MissingJob(key.clone())),
        }
    }

    async fn release_active(&self) -> Result<u64, StoreError> {
        let mut released = 0;
        for slot in self.lock().jobs.values_mut() {
            if slot.job.state == JobState::Active {
                slot.job.state = JobState::Waiting;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock().jobs.len())
    }
}
