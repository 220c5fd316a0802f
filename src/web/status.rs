//! Health handler.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{trace, warn};

use crate::state::{AppState, ServiceStatus};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    status: ServiceStatus,
    updated_secs_ago: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: ServiceStatus,
    version: &'static str,
    commit: &'static str,
    services: BTreeMap<String, ServiceInfo>,
    /// Live fetch jobs, absent when the queue could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    queued_jobs: Option<usize>,
    timestamp: String,
}

/// `GET /api/health`
pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    trace!("health check requested");

    let services: BTreeMap<String, ServiceInfo> = state
        .service_statuses
        .all()
        .into_iter()
        .map(|(name, status, updated_secs_ago)| {
            (
                name,
                ServiceInfo {
                    status,
                    updated_secs_ago,
                },
            )
        })
        .collect();

    let overall = if services.values().any(|s| s.status == ServiceStatus::Error) {
        ServiceStatus::Error
    } else if services.is_empty() {
        ServiceStatus::Disabled
    } else if services.values().all(|s| s.status == ServiceStatus::Active) {
        ServiceStatus::Active
    } else {
        ServiceStatus::Starting
    };

    let queued_jobs = match state.queue.len().await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(error = ?e, "Failed to count queued jobs");
            None
        }
    };

    Json(HealthResponse {
        status: overall,
        version: env!("CARGO_PKG_VERSION"),
        commit: env!("GIT_COMMIT_SHORT"),
        services,
        queued_jobs,
        timestamp: state.clock.now().to_rfc3339(),
    })
}
