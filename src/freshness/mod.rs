//! Freshness classification of cached resources.
//!
//! Entries move through three states as they age:
//!
//! ```text
//!  written        stale_after        expire_after
//!     |--- Fresh ---|----- Stale -------|----- miss (Pending) ...
//! ```
//!
//! Stale entries are still served, but a refresh job is queued so later
//! readers see newer data. Misses never block the caller: they queue a fetch
//! and answer [`FetchResult::Pending`] with a short retry hint.

pub mod orchestrator;

pub use orchestrator::CacheOrchestrator;

use crate::catalog::FreshnessPolicy;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

/// Classify an entry of the given age. Both thresholds are inclusive upper bounds.
pub fn classify(age: Duration, policy: &FreshnessPolicy) -> Freshness {
    if age <= policy.stale_after {
        Freshness::Fresh
    } else if age <= policy.expire_after {
        Freshness::Stale
    } else {
        Freshness::Expired
    }
}

/// Outcome of resolving a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Fresh(Value),
    Stale {
        payload: Value,
        /// True when this call queued the refresh, false when one was already live.
        refresh_triggered: bool,
    },
    Pending {
        retry_after_secs: u64,
    },
}

impl FetchResult {
    pub fn payload(&self) -> Option<&Value> {
        match self {
            FetchResult::Fresh(payload) | FetchResult::Stale { payload, .. } => Some(payload),
            FetchResult::Pending { .. } => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, FetchResult::Pending { .. })
    }

    /// Combine two sub-results into one, merging their payloads with `merge`.
    ///
    /// Any `Pending` makes the whole `Pending` with the longer retry hint;
    /// otherwise any `Stale` makes it `Stale`; otherwise it is `Fresh`.
    pub fn combine(self, other: FetchResult, merge: impl FnOnce(Value, Value) -> Value) -> FetchResult {
        use FetchResult::*;

        match (self, other) {
            (Pending { retry_after_secs: a }, Pending { retry_after_secs: b }) => Pending {
                retry_after_secs: a.max(b),
            },
            (Pending { retry_after_secs }, _) | (_, Pending { retry_after_secs }) => {
                Pending { retry_after_secs }
            }
            (Fresh(a), Fresh(b)) => Fresh(merge(a, b)),
            (Fresh(a), Stale { payload: b, refresh_triggered })
            | (Stale { payload: a, refresh_triggered }, Fresh(b)) => Stale {
                payload: merge(a, b),
                refresh_triggered,
            },
            (
                Stale {
                    payload: a,
                    refresh_triggered: ta,
                },
                Stale {
                    payload: b,
                    refresh_triggered: tb,
                },
            ) => Stale {
                payload: merge(a, b),
                refresh_triggered: ta || tb,
            },
        }
    }

    pub fn into_response(self) -> ResolveResponse {
        match self {
            FetchResult::Fresh(data) => ResolveResponse {
                status: ResolveStatus::Fresh,
                data,
                retry_after_seconds: None,
                is_refreshing: None,
            },
            FetchResult::Stale {
                payload,
                refresh_triggered,
            } => ResolveResponse {
                status: ResolveStatus::Stale,
                data: payload,
                retry_after_seconds: None,
                is_refreshing: Some(refresh_triggered),
            },
            FetchResult::Pending { retry_after_secs } => ResolveResponse {
                status: ResolveStatus::Processing,
                data: Value::Null,
                retry_after_seconds: Some(retry_after_secs),
                is_refreshing: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveStatus {
    Fresh,
    Stale,
    Processing,
}

/// The shape callers of `resolve` receive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub status: ResolveStatus,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_refreshing: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const POLICY: FreshnessPolicy =
        FreshnessPolicy::new(Duration::from_secs(150), Duration::from_secs(300));

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn classification_boundaries() {
        assert_eq!(classify(secs(0), &POLICY), Freshness::Fresh);
        assert_eq!(classify(secs(100), &POLICY), Freshness::Fresh);
        assert_eq!(classify(secs(150), &POLICY), Freshness::Fresh);
        assert_eq!(classify(secs(151), &POLICY), Freshness::Stale);
        assert_eq!(classify(secs(200), &POLICY), Freshness::Stale);
        assert_eq!(classify(secs(300), &POLICY), Freshness::Stale);
        assert_eq!(classify(secs(301), &POLICY), Freshness::Expired);
        assert_eq!(classify(secs(350), &POLICY), Freshness::Expired);
    }

    fn fresh() -> FetchResult {
        FetchResult::Fresh(json!(1))
    }

    fn stale(triggered: bool) -> FetchResult {
        FetchResult::Stale {
            payload: json!(2),
            refresh_triggered: triggered,
        }
    }

    fn pending(secs: u64) -> FetchResult {
        FetchResult::Pending {
            retry_after_secs: secs,
        }
    }

    fn sum(a: Value, b: Value) -> Value {
        json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0))
    }

    #[test]
    fn combine_stale_and_fresh_is_stale() {
        assert_eq!(
            stale(false).combine(fresh(), sum),
            FetchResult::Stale {
                payload: json!(3),
                refresh_triggered: false
            }
        );
        assert_eq!(
            fresh().combine(stale(true), sum),
            FetchResult::Stale {
                payload: json!(3),
                refresh_triggered: true
            }
        );
    }

    #[test]
    fn combine_takes_longest_pending_hint() {
        assert_eq!(pending(5).combine(pending(10), sum), pending(10));
        assert_eq!(pending(10).combine(pending(5), sum), pending(10));
    }

    #[test]
    fn combine_is_total_over_all_states() {
        let states = || vec![fresh(), stale(false), pending(5)];
        for a in states() {
            for b in states() {
                let expected = match (&a, &b) {
                    (FetchResult::Pending { .. }, _) | (_, FetchResult::Pending { .. }) => "pending",
                    (FetchResult::Stale { .. }, _) | (_, FetchResult::Stale { .. }) => "stale",
                    _ => "fresh",
                };
                let combined = a.clone().combine(b.clone(), sum);
                let got = match combined {
                    FetchResult::Fresh(_) => "fresh",
                    FetchResult::Stale { .. } => "stale",
                    FetchResult::Pending { .. } => "pending",
                };
                assert_eq!(got, expected, "{a:?} + {b:?}");
            }
        }
    }

    #[test]
    fn response_shape() {
        let processing = serde_json::to_value(pending(5).into_response()).unwrap();
        assert_eq!(
            processing,
            json!({"status": "processing", "data": null, "retryAfterSeconds": 5})
        );

        let stale = serde_json::to_value(stale(true).into_response()).unwrap();
        assert_eq!(
            stale,
            json!({"status": "stale", "data": 2, "isRefreshing": true})
        );

        let fresh = serde_json::to_value(fresh().into_response()).unwrap();
        assert_eq!(fresh, json!({"status": "fresh", "data": 1}));
    }
}
