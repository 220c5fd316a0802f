//! JSON error responses for the HTTP API.

use crate::catalog::CatalogError;
use crate::upstream::UpstreamError;
use crate::utils::retry_after_secs;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    InvalidResource,
    NotFound,
    RateLimited,
    UpstreamError,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    code: ApiErrorCode,
    message: String,
}

/// An error returned from a handler, rendered as `{code, message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: ApiErrorCode,
    message: String,
    retry_after: Option<Duration>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, ApiErrorCode::InvalidResource, e.to_string())
    }
}

/// Direct callers see upstream failures mapped onto HTTP semantics.
impl From<UpstreamError> for ApiError {
    fn from(e: UpstreamError) -> Self {
        match &e {
            UpstreamError::NotFound { .. } => {
                ApiError::new(StatusCode::NOT_FOUND, ApiErrorCode::NotFound, e.to_string())
            }
            UpstreamError::RateLimited { .. } | UpstreamError::RateLimitExceeded { .. } => {
                let error = ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiErrorCode::RateLimited,
                    e.to_string(),
                );
                match e.retry_after() {
                    Some(wait) => error.with_retry_after(wait),
                    None => error,
                }
            }
            _ => ApiError::new(StatusCode::BAD_GATEWAY, ApiErrorCode::UpstreamError, e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            code: self.code,
            message: self.message,
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(wait) = self.retry_after {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(wait)),
            );
        }
        response
    }
}
