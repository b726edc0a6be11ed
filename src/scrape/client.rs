use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::FetchFailure;
use crate::model::RawPage;
use crate::ratelimit::RateLimiter;
use crate::scrape::PageRenderer;

/// Single-page fetcher: one rate-limit permit per attempt, keyed by domain,
/// then a render bounded by `timeout`.
#[derive(Clone)]
pub struct ScrapeClient {
    renderer: Arc<dyn PageRenderer>,
    limiter: Arc<RateLimiter>,
}

impl ScrapeClient {
    pub fn new(renderer: Arc<dyn PageRenderer>, limiter: Arc<RateLimiter>) -> Self {
        Self { renderer, limiter }
    }

    pub fn renderer_name(&self) -> &str {
        self.renderer.name()
    }

    pub async fn fetch(&self, url: &str, timeout: Duration) -> Result<RawPage, FetchFailure> {
        let parsed = Url::parse(url).map_err(|e| FetchFailure::blocked(format!("Invalid URL {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchFailure::blocked(format!("Unsupported scheme '{}'", parsed.scheme())));
        }
        let domain = parsed
            .host_str()
            .map(str::to_lowercase)
            .ok_or_else(|| FetchFailure::blocked(format!("URL has no host: {url}")))?;

        let permit = self.limiter.acquire(&domain).await;
        if !permit.waited.is_zero() {
            debug!("Waited {:?} for rate limit on {}", permit.waited, domain);
        }

        match tokio::time::timeout(timeout, self.renderer.render(&parsed)).await {
            Ok(Ok(page)) => {
                debug!("Fetched {} ({} bytes) via {}", url, page.html.len(), self.renderer.name());
                Ok(page)
            }
            Ok(Err(failure)) => {
                warn!("Fetch of {} failed: {}", url, failure);
                Err(failure)
            }
            Err(_) => {
                warn!("Fetch of {} timed out after {:?}", url, timeout);
                Err(FetchFailure::timeout(format!("No response within {timeout:?}")))
            }
        }
    }
}
