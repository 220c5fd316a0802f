//! Client for the third-party sports-data API.

pub mod errors;
pub mod json;
pub mod middleware;
pub mod wait;

pub use errors::UpstreamError;

use crate::config::UpstreamConfig;
use anyhow::Context;
use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, StatusCode};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde_json::Value;
use tracing::debug;

/// Anything that can perform a GET against the upstream and return its JSON body.
///
/// The worker and the direct pass-through path depend on this seam rather
/// than on [`UpstreamClient`] so they can be driven by scripted responses.
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// GET `path` (relative to the configured base URL).
    async fn get_json(&self, path: &str) -> Result<Value, UpstreamError>;
}

/// HTTP client for the upstream API.
pub struct UpstreamClient {
    http: ClientWithMiddleware,
    base_url: url::Url,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if !config.token.is_empty() {
            let mut token = HeaderValue::from_str(&config.token)
                .context("Upstream token is not a valid header value")?;
            token.set_sensitive(true);
            headers.insert("X-Auth-Token", token);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .user_agent(concat!("matchday/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        let http = ClientBuilder::new(client)
            .with(middleware::TransparentMiddleware)
            .build();

        // Relative joins drop the last segment unless the base ends with a slash
        let mut base_url = config.base_url.clone();
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        Ok(Self { http, base_url })
    }

    fn url_for(&self, path: &str) -> Result<url::Url, UpstreamError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| UpstreamError::Transport(format!("invalid upstream path '{path}': {e}")))
    }
}

#[async_trait]
impl Upstream for UpstreamClient {
    async fn get_json(&self, path: &str) -> Result<Value, UpstreamError> {
        let url = self.url_for(path)?;
        let response = self.http.get(url).send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        match status {
            s if s.is_success() => {
                json::parse_json_with_context::<Value>(&body).map_err(|message| {
                    UpstreamError::Decode {
                        path: path.to_owned(),
                        message,
                    }
                })
            }
            StatusCode::NOT_FOUND => Err(UpstreamError::NotFound {
                path: path.to_owned(),
            }),
            StatusCode::TOO_MANY_REQUESTS => {
                let message = wait::error_message(&body);
                let retry_after = wait::suggested_wait(&message, &headers);
                debug!(path, ?retry_after, "upstream rate limited the request");
                Err(UpstreamError::RateLimited {
                    retry_after,
                    message,
                })
            }
            s => Err(UpstreamError::Status {
                status: s.as_u16(),
                path: path.to_owned(),
                message: wait::error_message(&body),
            }),
        }
    }
}
