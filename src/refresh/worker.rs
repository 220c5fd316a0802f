use crate::cache::{CacheEntry, CacheStore};
use crate::catalog::{Catalog, ResourceKey};
use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::data::StoreError;
use crate::queue::{Job, JobQueue};
use crate::upstream::{Upstream, UpstreamError};
use crate::utils::{add_duration, fmt_duration};
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time;
use tracing::{Instrument, debug, error, info, trace, warn};

/// Jobs slower than this are logged at warn.
const SLOW_THRESHOLD: Duration = Duration::from_secs(30);

/// Back-off after the queue itself fails to answer.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(10);

/// What happened to a job the worker picked up.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Payload cached, job removed.
    Succeeded { written_at: DateTime<Utc> },
    /// Upstream rate limited; the job re-enters the queue at `until`.
    Delayed { until: DateTime<Utc> },
    /// Terminal failure, job removed.
    Failed,
}

/// Drains the fetch queue one job at a time, writing results into the cache.
pub struct Worker {
    upstream: Arc<dyn Upstream>,
    cache: Arc<dyn CacheStore>,
    queue: Arc<dyn JobQueue>,
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl Worker {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        cache: Arc<dyn CacheStore>,
        queue: Arc<dyn JobQueue>,
        catalog: Arc<Catalog>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        Self {
            upstream,
            cache,
            queue,
            catalog,
            clock,
            config,
        }
    }

    fn limiter(&self) -> DefaultDirectRateLimiter {
        let per_minute = NonZeroU32::new(self.config.jobs_per_minute).unwrap_or(NonZeroU32::MIN);
        RateLimiter::direct(Quota::per_minute(per_minute))
    }

    /// Runs the worker's main loop until shutdown.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            jobs_per_minute = self.config.jobs_per_minute,
            "Fetch worker started"
        );
        let limiter = self.limiter();

        loop {
            let next = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Fetch worker received shutdown signal, exiting gracefully");
                    break;
                }
                result = self.queue.lock_next(self.clock.now()) => result,
            };

            let job = match next {
                Ok(Some(job)) => job,
                Ok(None) => {
                    trace!("No jobs due, waiting");
                    if sleep_or_shutdown(&mut shutdown_rx, self.config.poll_interval).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    warn!(error = ?e, "Failed to fetch job, waiting");
                    if sleep_or_shutdown(&mut shutdown_rx, QUEUE_ERROR_BACKOFF).await {
                        break;
                    }
                    continue;
                }
            };

            // The job stays active while waiting for throughput budget
            let key = job.key();
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    self.handle_shutdown_during_processing(&key).await;
                    break;
                }
                _ = async {
                    limiter.until_ready().await;
                    self.process(job).await
                } => {}
            }
            trace!(job = %key, "Job handled");
        }
    }

    /// Claim and process the next due job, if there is one.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>, StoreError> {
        match self.queue.lock_next(self.clock.now()).await? {
            Some(job) => Ok(Some(self.process(job).await)),
            None => Ok(None),
        }
    }

    async fn process(&self, job: Job) -> JobOutcome {
        let key = job.key();
        let span = tracing::info_span!("process_job", job = %key);

        async move {
            debug!(
                queued_for = fmt_duration(crate::utils::age_between(job.queued_at, self.clock.now())),
                "Processing job"
            );
            let start = Instant::now();
            let path = job.resource.path();

            let result = match time::timeout(self.config.job_timeout, self.upstream.get_json(&path)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(UpstreamError::Transport(format!(
                    "job timed out after {}s",
                    self.config.job_timeout.as_secs()
                ))),
            };

            let duration = start.elapsed();
            if duration > SLOW_THRESHOLD {
                warn!(
                    duration = fmt_duration(duration),
                    "Slow job processing detected (likely upstream latency)"
                );
            }

            match result {
                Ok(payload) => self.handle_success(&job, payload, duration).await,
                Err(UpstreamError::RateLimited { retry_after, .. }) => {
                    self.handle_rate_limited(&job, retry_after).await
                }
                Err(e) => self.handle_failure(&job, e, duration).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_success(&self, job: &Job, payload: serde_json::Value, duration: Duration) -> JobOutcome {
        let key = job.key();
        let written_at = self.clock.now();
        let ttl = self.catalog.policy(job.resource.kind()).expire_after;

        let entry = CacheEntry {
            key: key.clone(),
            payload,
            written_at,
        };
        if let Err(e) = self.cache.set(entry, ttl).await {
            error!(error = ?e, "Failed to write cache entry, dropping job");
            self.fail(job).await;
            return JobOutcome::Failed;
        }

        if let Err(e) = self.queue.complete(&key).await {
            error!(error = ?e, "Failed to complete job");
        }

        info!(
            duration = fmt_duration(duration),
            ttl_secs = ttl.as_secs(),
            "Job completed"
        );
        JobOutcome::Succeeded { written_at }
    }

    /// Rate limiting is expected; the job is pushed back, never failed for it,
    /// unless it has already been pushed back too many times.
    async fn handle_rate_limited(&self, job: &Job, retry_after: Option<Duration>) -> JobOutcome {
        if job.rate_limit_delays >= self.config.max_rate_limit_delays {
            warn!(
                delays = job.rate_limit_delays,
                "Job rate limited too many times, dropping"
            );
            self.fail(job).await;
            return JobOutcome::Failed;
        }

        let wait = retry_after.unwrap_or(self.config.default_rate_limit_wait);
        let until = add_duration(self.clock.now(), wait);

        match self.queue.delay(&job.key(), until).await {
            Ok(()) => {
                info!(
                    wait_secs = wait.as_secs(),
                    delays = job.rate_limit_delays + 1,
                    "Upstream rate limited, job delayed"
                );
            }
            Err(e) => error!(error = ?e, "Failed to delay rate-limited job"),
        }
        JobOutcome::Delayed { until }
    }

    async fn handle_failure(&self, job: &Job, e: UpstreamError, duration: Duration) -> JobOutcome {
        if e.is_not_found() {
            debug!(duration = fmt_duration(duration), error = %e, "Upstream resource not found, dropping job");
        } else {
            warn!(duration = fmt_duration(duration), error = %e, "Job failed, dropping");
        }
        self.fail(job).await;
        JobOutcome::Failed
    }

    async fn fail(&self, job: &Job) {
        if let Err(e) = self.queue.fail(&job.key()).await {
            error!(job = %job.key(), error = ?e, "Failed to remove failed job");
        }
    }

    /// Return the job to waiting so the next process picks it up.
    async fn handle_shutdown_during_processing(&self, key: &ResourceKey) {
        info!(job = %key, "Shutdown received during job processing");
        match self.queue.release_active().await {
            Ok(n) => debug!(released = n, "Active jobs released during shutdown"),
            Err(e) => warn!(error = ?e, "Failed to release job during shutdown"),
        }
    }
}

/// Sleep for `duration`, returning true if shutdown arrived first.
async fn sleep_or_shutdown(shutdown_rx: &mut broadcast::Receiver<()>, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown_rx.recv() => true,
        _ = time::sleep(duration) => false,
    }
}
