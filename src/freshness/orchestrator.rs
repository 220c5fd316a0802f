//! Serves resources from cache and queues fetches for what is stale or missing.

use super::{FetchResult, Freshness, classify};
use crate::cache::CacheStore;
use crate::catalog::{Catalog, Resource};
use crate::clock::Clock;
use crate::queue::{EnqueueOutcome, JobQueue};
use crate::utils::{age_between, retry_after_secs};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Decides, per request, whether to answer from cache, serve stale data while
/// a refresh is queued, or tell the caller to come back shortly.
///
/// Never calls the upstream and never returns an error: store and queue
/// failures degrade to `Pending` (or to the stale payload already in hand).
#[derive(Clone)]
pub struct CacheOrchestrator {
    cache: Arc<dyn CacheStore>,
    queue: Arc<dyn JobQueue>,
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
    pending_retry_after: Duration,
}

impl CacheOrchestrator {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        queue: Arc<dyn JobQueue>,
        catalog: Arc<Catalog>,
        clock: Arc<dyn Clock>,
        pending_retry_after: Duration,
    ) -> Self {
        Self {
            cache,
            queue,
            catalog,
            clock,
            pending_retry_after,
        }
    }

    pub async fn resolve(&self, resource: &Resource) -> FetchResult {
        let key = resource.key();
        let now = self.clock.now();
        let policy = self.catalog.policy(resource.kind());

        let entry = match self.cache.get(&key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = ?e, "Cache read failed, treating as miss");
                None
            }
        };

        let freshness = entry
            .as_ref()
            .map(|entry| classify(age_between(entry.written_at, now), &policy));

        match (entry, freshness) {
            (Some(entry), Some(Freshness::Fresh)) => {
                trace!(key = %key, "cache fresh");
                FetchResult::Fresh(entry.payload)
            }
            (Some(entry), Some(Freshness::Stale)) => {
                let refresh_triggered = self.ensure_job(resource).await;
                debug!(key = %key, refresh_triggered, "cache stale, serving while refreshing");
                FetchResult::Stale {
                    payload: entry.payload,
                    refresh_triggered,
                }
            }
            _ => {
                let queued = self.ensure_job(resource).await;
                debug!(key = %key, queued, "cache miss, fetch pending");
                FetchResult::Pending {
                    retry_after_secs: retry_after_secs(self.pending_retry_after),
                }
            }
        }
    }

    /// Today's matches restricted to competitions the catalog knows about.
    ///
    /// Depends on two resources; see [`FetchResult::combine`] for how their
    /// states merge.
    pub async fn resolve_matches_in_known_competitions(&self, date: NaiveDate) -> FetchResult {
        let matches = self.resolve(&Resource::matches_on(date)).await;
        let competitions = self.resolve(&Resource::competitions()).await;
        matches.combine(competitions, filter_matches_by_competitions)
    }

    /// Queue a fetch for `resource` unless one is already live.
    /// Returns whether this call created the job.
    async fn ensure_job(&self, resource: &Resource) -> bool {
        match self.queue.enqueue(resource, self.clock.now()).await {
            Ok(EnqueueOutcome::Enqueued) => true,
            Ok(EnqueueOutcome::AlreadyQueued(state)) => {
                trace!(key = %resource.key(), %state, "fetch job already live");
                false
            }
            Err(e) => {
                warn!(key = %resource.key(), error = ?e, "Failed to enqueue fetch job");
                false
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompetitionList {
    #[serde(default)]
    competitions: Vec<CompetitionRef>,
}

#[derive(Debug, Deserialize)]
struct CompetitionRef {
    id: u64,
}

/// Keep only matches whose `competition.id` appears in the competitions payload.
fn filter_matches_by_competitions(matches: Value, competitions: Value) -> Value {
    let known: HashSet<u64> = serde_json::from_value::<CompetitionList>(competitions)
        .map(|list| list.competitions.into_iter().map(|c| c.id).collect())
        .unwrap_or_default();

    let all = match matches {
        Value::Object(mut body) => match body.remove("matches") {
            Some(Value::Array(all)) => all,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let kept: Vec<Value> = all
        .into_iter()
        .filter(|m| {
            m.pointer("/competition/id")
                .and_then(Value::as_u64)
                .is_some_and(|id| known.contains(&id))
        })
        .collect();

    json!({ "count": kept.len(), "matches": kept })
}
