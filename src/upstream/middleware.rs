//! HTTP client middleware for upstream request logging.

use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next};
use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::utils::fmt_duration;

/// Requests slower than this are logged at warn.
const SLOW_REQUEST_THRESHOLD: std::time::Duration = std::time::Duration::from_secs(5);

pub struct TransparentMiddleware;

#[async_trait::async_trait]
impl Middleware for TransparentMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let method = req.method().clone();
        let path = req.url().path().to_owned();
        trace!(method = %method, path, "upstream request");

        let start = Instant::now();
        let result = next.run(req, extensions).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(response) => {
                let status = response.status().as_u16();
                if elapsed > SLOW_REQUEST_THRESHOLD {
                    warn!(
                        method = %method,
                        path,
                        status,
                        duration = fmt_duration(elapsed),
                        "slow upstream request"
                    );
                } else {
                    debug!(
                        method = %method,
                        path,
                        status,
                        duration = fmt_duration(elapsed),
                        "upstream response"
                    );
                }
            }
            Err(e) => {
                debug!(
                    method = %method,
                    path,
                    duration = fmt_duration(elapsed),
                    error = %e,
                    "upstream request failed"
                );
            }
        }

        result
    }
}
