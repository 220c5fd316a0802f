//! Cache-backed and pass-through resource handlers.

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;
use tracing::debug;

use crate::catalog::Resource;
use crate::freshness::{FetchResult, ResolveStatus};
use crate::state::AppState;
use crate::web::error::ApiError;

/// Render a resolution: 200 with data, or 202 with `Retry-After` while processing.
fn resolution_response(result: FetchResult) -> Response {
    let body = result.into_response();
    match body.status {
        ResolveStatus::Processing => {
            let retry_after = body.retry_after_seconds.unwrap_or(0);
            let mut response = (StatusCode::ACCEPTED, Json(body)).into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            response
        }
        ResolveStatus::Fresh | ResolveStatus::Stale => Json(body).into_response(),
    }
}

async fn resolve(state: &AppState, kind: &str, param: Option<&str>) -> Result<Response, ApiError> {
    let resource = Resource::parse(kind, param)?;
    let result = state.orchestrator.resolve(&resource).await;
    Ok(resolution_response(result))
}

/// `GET /api/resources/{type}`
pub(super) async fn get_resource(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Response, ApiError> {
    resolve(&state, &kind, None).await
}

/// `GET /api/resources/{type}/{param}`
pub(super) async fn get_resource_with_param(
    State(state): State<AppState>,
    Path((kind, param)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    resolve(&state, &kind, Some(&param)).await
}

/// `GET /api/matches/today`
pub(super) async fn todays_matches(State(state): State<AppState>) -> Response {
    let today = state.today();
    debug!(%today, "resolving today's matches");
    let result = state
        .orchestrator
        .resolve_matches_in_known_competitions(today)
        .await;
    resolution_response(result)
}

async fn direct(state: &AppState, kind: &str, param: Option<&str>) -> Result<Json<Value>, ApiError> {
    let resource = Resource::parse(kind, param)?;
    let payload = state.direct.fetch(&resource).await?;
    Ok(Json(payload))
}

/// `GET /api/direct/{type}`
pub(super) async fn get_direct(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<Value>, ApiError> {
    direct(&state, &kind, None).await
}

/// `GET /api/direct/{type}/{param}`
pub(super) async fn get_direct_with_param(
    State(state): State<AppState>,
    Path((kind, param)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    direct(&state, &kind, Some(&param)).await
}
