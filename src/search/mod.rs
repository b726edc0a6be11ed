pub mod duckduckgo;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::SearchFailure;
use crate::model::SearchResult;
use crate::ratelimit::RateLimiter;

pub use duckduckgo::DuckDuckGoEngine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: usize,
    pub language: Option<String>,
}

/// A concrete search backend. Results come back in engine order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchEngine: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, SearchFailure>;
}

/// Rate-limited front for a search engine: deduplicates exact URL repeats,
/// caps the result count and re-ranks in engine order.
#[derive(Clone)]
pub struct SearchClient {
    engine: Arc<dyn SearchEngine>,
    engine_id: String,
    limiter: Arc<RateLimiter>,
}

impl SearchClient {
    pub fn new(engine: Arc<dyn SearchEngine>, engine_id: impl Into<String>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            engine,
            engine_id: engine_id.into(),
            limiter,
        }
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, SearchFailure> {
        self.limiter.acquire(&self.engine_id).await;

        info!("Searching {} for '{}' (max {})", self.engine_id, request.query, request.max_results);
        let raw = self.engine.search(request).await.map_err(|failure| {
            warn!("Search on {} failed: {}", self.engine_id, failure);
            failure
        })?;

        let mut seen = HashSet::new();
        let results: Vec<SearchResult> = raw
            .into_iter()
            .filter(|result| seen.insert(result.url.clone()))
            .take(request.max_results)
            .enumerate()
            .map(|(index, result)| SearchResult {
                rank: index + 1,
                ..result
            })
            .collect();

        if results.is_empty() {
            warn!("Search on {} returned no results for '{}'", self.engine_id, request.query);
            return Err(SearchFailure::NoResults);
        }

        debug!("Search on {} returned {} unique results", self.engine_id, results.len());
        Ok(results)
    }
}
