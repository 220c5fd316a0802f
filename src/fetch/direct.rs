//! Pass-through path for reads that must go to the upstream right now.

use super::{FetchCoalescer, RateCounter};
use crate::catalog::Resource;
use crate::upstream::{Upstream, UpstreamError};
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

/// Calls the upstream directly, bypassing cache and queue.
///
/// Every attempt passes the admission counter first, and concurrent requests
/// for the same resource are coalesced into one upstream call. Callers see
/// raw upstream errors.
#[derive(Clone)]
pub struct DirectFetcher {
    upstream: Arc<dyn Upstream>,
    coalescer: FetchCoalescer,
    admission: Arc<RateCounter>,
}

impl DirectFetcher {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        coalescer: FetchCoalescer,
        admission: Arc<RateCounter>,
    ) -> Self {
        Self {
            upstream,
            coalescer,
            admission,
        }
    }

    #[instrument(skip(self), fields(key = %resource.key()))]
    pub async fn fetch(&self, resource: &Resource) -> Result<Value, UpstreamError> {
        let upstream = self.upstream.clone();
        let admission = self.admission.clone();
        let path = resource.path();

        self.coalescer
            .fetch(resource.key(), move || {
                let upstream = upstream.clone();
                let admission = admission.clone();
                let path = path.clone();
                async move {
                    admission.admit().await;
                    upstream.get_json(&path).await
                }
                .boxed()
            })
            .await
    }
}
