//! De-duplication of concurrent identical upstream requests.
//!
//! All requests funnel through one sequential pump task, so at most one
//! upstream call is in flight across every key. Callers asking for a key that
//! is already queued or running are attached to that request and receive the
//! same outcome.

use crate::catalog::ResourceKey;
use crate::config::CoalescerConfig;
use crate::upstream::UpstreamError;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, info_span, warn};

type Outcome = Result<Value, UpstreamError>;

/// A re-invocable upstream call; invoked once per attempt.
pub type Operation = Box<dyn Fn() -> BoxFuture<'static, Outcome> + Send + Sync>;

struct Submission {
    key: ResourceKey,
    operation: Operation,
}

type Waiters = Arc<Mutex<HashMap<ResourceKey, Vec<oneshot::Sender<Outcome>>>>>;

#[derive(Clone)]
pub struct FetchCoalescer {
    submit: mpsc::UnboundedSender<Submission>,
    waiters: Waiters,
}

impl FetchCoalescer {
    /// Create the coalescer and spawn its pump on the current runtime.
    pub fn new(config: CoalescerConfig) -> Self {
        let (submit, rx) = mpsc::unbounded_channel();
        let waiters: Waiters = Arc::default();

        let pump = Pump {
            config,
            waiters: waiters.clone(),
        };
        tokio::spawn(pump.run(rx).instrument(info_span!("fetch_pump")));

        Self { submit, waiters }
    }

    /// Fetch `key` with `operation`, sharing the outcome with any concurrent
    /// caller for the same key.
    pub async fn fetch<F>(&self, key: ResourceKey, operation: F) -> Outcome
    where
        F: Fn() -> BoxFuture<'static, Outcome> + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();

        // Lookup and registration happen under one lock so two callers cannot
        // both decide they are first
        {
            let mut waiters = lock(&self.waiters);
            if let Some(existing) = waiters.get_mut(&key) {
                debug!(key = %key, waiting = existing.len(), "joining in-flight request");
                existing.push(tx);
            } else {
                waiters.insert(key.clone(), vec![tx]);
                let submission = Submission {
                    key: key.clone(),
                    operation: Box::new(operation),
                };
                if self.submit.send(submission).is_err() {
                    waiters.remove(&key);
                    return Err(UpstreamError::Unavailable);
                }
            }
        }

        rx.await.unwrap_or(Err(UpstreamError::Unavailable))
    }

    /// Number of keys with an outstanding request.
    pub fn in_flight(&self) -> usize {
        lock(&self.waiters).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct Pump {
    config: CoalescerConfig,
    waiters: Waiters,
}

impl Pump {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Submission>) {
        while let Some(Submission { key, operation }) = rx.recv().await {
            let outcome = self.execute(&key, &operation).await;

            if let Err(e) = &outcome {
                if e.is_expected() {
                    debug!(key = %key, error = %e, "upstream fetch did not succeed");
                } else {
                    warn!(key = %key, error = %e, "upstream fetch failed");
                }
            }

            // Removed before notifying so the next caller starts a fresh attempt
            let senders = lock(&self.waiters).remove(&key).unwrap_or_default();
            for sender in senders {
                let _ = sender.send(outcome.clone());
            }
        }
        debug!("fetch pump stopped");
    }

    async fn execute(&self, key: &ResourceKey, operation: &Operation) -> Outcome {
        let mut attempt = 1;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e @ UpstreamError::RateLimited { .. }) => e,
                Err(e) => return Err(e),
            };

            let retry_after = error.retry_after();
            if attempt >= self.config.max_attempts {
                return Err(UpstreamError::RateLimitExceeded {
                    attempts: attempt,
                    retry_after,
                });
            }

            let wait = self.backoff(attempt, retry_after);
            if wait > self.config.max_wait {
                debug!(
                    key = %key,
                    attempt,
                    wait_secs = wait.as_secs(),
                    "rate limit wait exceeds ceiling, giving up"
                );
                return Err(UpstreamError::RateLimitExceeded {
                    attempts: attempt,
                    retry_after,
                });
            }

            debug!(key = %key, attempt, wait_secs = wait.as_secs(), "rate limited, backing off");
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    /// Upstream hint, or `attempt * base_backoff`, plus the safety margin.
    fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or(self.config.base_backoff * attempt) + self.config.safety_margin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Resource;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;
    use tokio::time::Instant;

    fn rate_limited(message: &str) -> UpstreamError {
        UpstreamError::RateLimited {
            retry_after: crate::upstream::wait::wait_from_message(message),
            message: message.to_owned(),
        }
    }

    #[tokio::test]
    async fn concurrent_duplicates_share_one_upstream_call() {
        let coalescer = FetchCoalescer::new(CoalescerConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let release = Arc::new(Notify::new());
        let key = Resource::standings(2021).key();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coalescer = coalescer.clone();
            let calls = calls.clone();
            let release = release.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .fetch(key, move || {
                        let calls = calls.clone();
                        let release = release.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            release.notified().await;
                            Ok(json!({"standings": []}))
                        }
                        .boxed()
                    })
                    .await
            }));
        }

        // Let every caller register before the upstream call completes
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        release.notify_one();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), json!({"standings": []}));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn failures_are_shared_and_entry_is_cleared() {
        let coalescer = FetchCoalescer::new(CoalescerConfig::default());
        let key = Resource::competition(9).key();

        let err = coalescer
            .fetch(key.clone(), || {
                async {
                    Err(UpstreamError::NotFound {
                        path: "competitions/9".into(),
                    })
                }
                .boxed()
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(coalescer.in_flight(), 0);

        // A later call starts a fresh attempt
        let value = coalescer
            .fetch(key, || async { Ok(json!({"id": 9})) }.boxed())
            .await
            .unwrap();
        assert_eq!(value["id"], 9);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_hint_plus_margin_before_retrying() {
        let coalescer = FetchCoalescer::new(CoalescerConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        let value = coalescer
            .fetch(Resource::competitions().key(), move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt == 1 {
                        Err(rate_limited("You reached your request limit. Wait 12 seconds."))
                    } else {
                        Ok(json!({"competitions": []}))
                    }
                }
                .boxed()
            })
            .await
            .unwrap();

        assert_eq!(value, json!({"competitions": []}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(17));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_attempts() {
        let coalescer = FetchCoalescer::new(CoalescerConfig::default());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let err = coalescer
            .fetch(Resource::standings(2014).key(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(rate_limited("Wait 12 seconds")) }.boxed()
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UpstreamError::RateLimitExceeded { attempts: 3, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn aborts_when_wait_exceeds_ceiling() {
        let coalescer = FetchCoalescer::new(CoalescerConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        // No hint: 1 * 30s + 5s margin = 35s > 25s ceiling
        let counter = calls.clone();
        let err = coalescer
            .fetch(Resource::team_matches(1).key(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(rate_limited("Too many requests")) }.boxed()
            })
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn distinct_keys_run_one_at_a_time() {
        let coalescer = FetchCoalescer::new(CoalescerConfig::default());
        let running = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for id in 0..5 {
            let coalescer = coalescer.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .fetch(Resource::standings(id).key(), move || {
                        let running = running.clone();
                        let peak = peak.clone();
                        async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            running.fetch_sub(1, Ordering::SeqCst);
                            Ok(json!(id))
                        }
                        .boxed()
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
