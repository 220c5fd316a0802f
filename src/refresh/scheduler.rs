use crate::cache::CacheStore;
use crate::catalog::Resource;
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::queue::JobQueue;
use crate::utils::fmt_duration;
use chrono::NaiveDate;
use chrono_tz::Tz;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// What a trigger does when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerKind {
    /// Refresh today's fixtures, "today" being the configured timezone's date.
    TodaysMatches,
    /// Refresh standings of a fixed set of competitions.
    PopularStandings(Vec<u32>),
    /// Refresh the competition list.
    Competitions,
    /// Drop expired rows from the cache store.
    PurgeCache,
}

impl TriggerKind {
    pub fn name(&self) -> &'static str {
        match self {
            TriggerKind::TodaysMatches => "todays-matches",
            TriggerKind::PopularStandings(_) => "popular-standings",
            TriggerKind::Competitions => "competitions",
            TriggerKind::PurgeCache => "cache-purge",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub interval: Duration,
}

/// Counts from one firing of a trigger.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TriggerReport {
    pub enqueued: usize,
    /// Keys that already had a waiting, active, or delayed job.
    pub skipped: usize,
    pub purged: u64,
}

/// Enqueues refresh jobs for predictable demand before anyone asks.
pub struct Scheduler {
    queue: Arc<dyn JobQueue>,
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    triggers: Vec<Trigger>,
}

impl Scheduler {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        timezone: Tz,
        triggers: Vec<Trigger>,
    ) -> Self {
        Self {
            queue,
            cache,
            clock,
            timezone,
            triggers,
        }
    }

    /// The standard trigger set.
    pub fn default_triggers(config: &SchedulerConfig, popular_competitions: &[u32]) -> Vec<Trigger> {
        vec![
            Trigger {
                kind: TriggerKind::TodaysMatches,
                interval: config.todays_matches_interval,
            },
            Trigger {
                kind: TriggerKind::PopularStandings(popular_competitions.to_vec()),
                interval: config.standings_interval,
            },
            Trigger {
                kind: TriggerKind::Competitions,
                interval: config.competitions_interval,
            },
            Trigger {
                kind: TriggerKind::PurgeCache,
                interval: config.purge_interval,
            },
        ]
    }

    /// Today's date in the configured timezone.
    pub fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.timezone).date_naive()
    }

    /// Resources a trigger refreshes when it fires now.
    pub fn resources_for(&self, kind: &TriggerKind) -> Vec<Resource> {
        match kind {
            TriggerKind::TodaysMatches => vec![Resource::matches_on(self.today())],
            TriggerKind::PopularStandings(ids) => ids.iter().copied().map(Resource::standings).collect(),
            TriggerKind::Competitions => vec![Resource::competitions()],
            TriggerKind::PurgeCache => Vec::new(),
        }
    }

    /// Fire a trigger once.
    pub async fn run_trigger(&self, kind: &TriggerKind) -> TriggerReport {
        let start = Instant::now();
        let mut report = TriggerReport::default();

        if *kind == TriggerKind::PurgeCache {
            match self.cache.purge_expired().await {
                Ok(purged) => report.purged = purged,
                Err(e) => error!(trigger = %kind, error = ?e, "Failed to purge expired cache entries"),
            }
        }

        for resource in self.resources_for(kind) {
            let key = resource.key();
            match self.queue.state(&key).await {
                Ok(Some(state)) => {
                    trace!(trigger = %kind, key = %key, state = %state, "Job already queued, skipping");
                    report.skipped += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(trigger = %kind, key = %key, error = ?e, "Failed to read job state");
                    continue;
                }
            }

            match self.queue.enqueue(&resource, self.clock.now()).await {
                Ok(outcome) if outcome.is_new() => report.enqueued += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => warn!(trigger = %kind, key = %key, error = ?e, "Failed to enqueue refresh"),
            }
        }

        debug!(
            trigger = %kind,
            enqueued = report.enqueued,
            skipped = report.skipped,
            purged = report.purged,
            duration = fmt_duration(start.elapsed()),
            "Trigger fired"
        );
        report
    }

    /// Runs every trigger on its own task until shutdown.
    ///
    /// Each trigger fires immediately on start, then once per interval.
    pub async fn run(self: Arc<Self>, shutdown_rx: broadcast::Receiver<()>) {
        info!(triggers = self.triggers.len(), "Scheduler service started");

        let handles: Vec<_> = self
            .triggers
            .iter()
            .cloned()
            .map(|trigger| {
                let scheduler = self.clone();
                let shutdown_rx = shutdown_rx.resubscribe();
                tokio::spawn(async move { scheduler.run_periodic(trigger, shutdown_rx).await })
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = ?e, "Scheduler trigger task panicked");
            }
        }
        info!("Scheduler exited gracefully");
    }

    async fn run_periodic(&self, trigger: Trigger, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = time::interval(trigger.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    trace!(trigger = %trigger.kind, "Trigger stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_trigger(&trigger.kind).await;
                }
            }
        }
    }
}
