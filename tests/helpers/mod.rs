//! Shared fixtures: a scripted upstream and an in-process pipeline on a manual clock.
#![allow(dead_code)]

use async_trait::async_trait;
use matchday::cache::MemoryCacheStore;
use matchday::catalog::Catalog;
use matchday::clock::ManualClock;
use matchday::config::QueueConfig;
use matchday::freshness::orchestrator::CacheOrchestrator;
use matchday::queue::MemoryJobQueue;
use matchday::refresh::{Scheduler, Worker};
use matchday::upstream::{Upstream, UpstreamError};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upstream that pops scripted replies and records every requested path.
///
/// Once the script runs out it answers `{"path": <path>}`.
#[derive(Clone, Default)]
pub struct ScriptedUpstream {
    replies: Arc<Mutex<VecDeque<Result<Value, UpstreamError>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedUpstream {
    pub fn push(&self, reply: Result<Value, UpstreamError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn push_rate_limited(&self, wait_secs: u64) {
        self.push(Err(UpstreamError::RateLimited {
            retry_after: Some(Duration::from_secs(wait_secs)),
            message: format!("You reached your request limit. Wait {wait_secs} seconds."),
        }));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn get_json(&self, path: &str) -> Result<Value, UpstreamError> {
        self.calls.lock().unwrap().push(path.to_owned());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({ "path": path })))
    }
}

/// The cache-backed pipeline wired over in-process stores.
pub struct Pipeline {
    pub clock: ManualClock,
    pub upstream: ScriptedUpstream,
    pub cache: MemoryCacheStore,
    pub queue: MemoryJobQueue,
    pub orchestrator: CacheOrchestrator,
    pub worker: Worker,
}

pub fn pipeline() -> Pipeline {
    let clock = ManualClock::default();
    let upstream = ScriptedUpstream::default();
    let cache = MemoryCacheStore::new(Arc::new(clock.clone()));
    let queue = MemoryJobQueue::new();
    let catalog = Arc::new(Catalog::default());

    let orchestrator = CacheOrchestrator::new(
        Arc::new(cache.clone()),
        Arc::new(queue.clone()),
        catalog.clone(),
        Arc::new(clock.clone()),
        Duration::from_secs(5),
    );
    let worker = Worker::new(
        Arc::new(upstream.clone()),
        Arc::new(cache.clone()),
        Arc::new(queue.clone()),
        catalog,
        Arc::new(clock.clone()),
        QueueConfig::default(),
    );

    Pipeline {
        clock,
        upstream,
        cache,
        queue,
        orchestrator,
        worker,
    }
}

impl Pipeline {
    pub fn scheduler(&self, popular: &[u32]) -> Scheduler {
        Scheduler::new(
            Arc::new(self.queue.clone()),
            Arc::new(self.cache.clone()),
            Arc::new(self.clock.clone()),
            chrono_tz::UTC,
            Scheduler::default_triggers(&Default::default(), popular),
        )
    }

    /// Run the worker until no job is due.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        while self.worker.run_once().await.unwrap().is_some() {
            processed += 1;
        }
        processed
    }
}
