use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::browser::BrowserManager;
use crate::config::Config;
use crate::error::{ResearchError, Result, RunFailureKind};
use crate::extract::ContentExtractor;
use crate::llm::{build_provider, LlmProvider, LlmRouter};
use crate::model::{Query, ResearchResult, RunStatus, Stage};
use crate::ratelimit::RateLimiter;
use crate::research::prompt::PromptBuilder;
use crate::scrape::{HttpRenderer, PageRenderer, RendererKind, ScrapeClient, ScrapeManager};
use crate::search::{DuckDuckGoEngine, SearchClient, SearchRequest};

pub const MAX_QUERY_CHARS: usize = 2000;
pub const MAX_SOURCES_LIMIT: usize = 50;

/// Drives one query through Planning, Searching, Scraping and Synthesizing.
/// Every run ends in a [`ResearchResult`], failed runs included, so work
/// gathered before a terminal failure is handed back to the caller.
pub struct ResearchOrchestrator {
    search: SearchClient,
    scraper: ScrapeManager,
    router: LlmRouter,
    prompts: PromptBuilder,
    default_max_sources: usize,
    browser: Option<Arc<BrowserManager>>,
}

impl ResearchOrchestrator {
    pub fn new(
        search: SearchClient,
        scraper: ScrapeManager,
        router: LlmRouter,
        prompts: PromptBuilder,
        default_max_sources: usize,
    ) -> Self {
        Self {
            search,
            scraper,
            router,
            prompts,
            default_max_sources,
            browser: None,
        }
    }

    /// Wires every component from a validated config. Launches chromium
    /// when `scraping.renderer = "chromium"`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let limits = &config.rate_limits;

        let engine = DuckDuckGoEngine::new(config.search.base_url.clone(), config.search.timeout)?;
        let search_limiter = RateLimiter::new(None).with_limit(config.search.engine.clone(), limits.search);
        let search = SearchClient::new(Arc::new(engine), config.search.engine.clone(), Arc::new(search_limiter));

        let mut browser = None;
        let renderer: Arc<dyn PageRenderer> = match config.scraping.renderer {
            RendererKind::Chromium => {
                let manager = Arc::new(BrowserManager::launch(config.scraping.browser.clone()).await?);
                browser = Some(manager.clone());
                manager
            }
            RendererKind::Http => Arc::new(HttpRenderer::new(
                &config.scraping.browser.profile,
                config.scraping.fetch_timeout,
            )?),
        };
        let scrape_limiter = RateLimiter::new(limits.per_domain).with_limits(&limits.domains);
        let client = ScrapeClient::new(renderer, Arc::new(scrape_limiter));
        let extractor = Arc::new(ContentExtractor::new(config.scraping.min_body_chars)?);
        let scraper = ScrapeManager::new(client, extractor, config.scraping.settings());

        let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();
        for id in &config.llm.fallback_chain {
            let provider = config
                .llm
                .provider(id)
                .ok_or_else(|| ResearchError::ConfigError(format!("Fallback chain names unknown provider '{}'", id)))?;
            providers.push(build_provider(provider, config.llm.per_attempt_timeout)?);
        }
        let llm_limiter = RateLimiter::new(None).with_limits(&limits.providers);
        let router = LlmRouter::new(providers, Arc::new(llm_limiter), config.llm.router_settings());

        let prompts = PromptBuilder::new(config.research.prompt_settings());

        let mut orchestrator = Self::new(search, scraper, router, prompts, config.research.default_max_sources);
        orchestrator.browser = browser;
        Ok(orchestrator)
    }

    /// Validates the query and derives the search request.
    pub fn plan(&self, query: &Query) -> std::result::Result<SearchRequest, RunFailureKind> {
        let text = query.text.trim();
        if text.is_empty() {
            return Err(RunFailureKind::InvalidQuery("query text is empty".to_string()));
        }
        let length = text.chars().count();
        if length > MAX_QUERY_CHARS {
            return Err(RunFailureKind::InvalidQuery(format!(
                "query text is {} characters, limit is {}",
                length, MAX_QUERY_CHARS
            )));
        }

        let max_results = query.constraints.max_sources.unwrap_or(self.default_max_sources);
        if !(1..=MAX_SOURCES_LIMIT).contains(&max_results) {
            return Err(RunFailureKind::InvalidQuery(format!(
                "max_sources must be between 1 and {}, got {}",
                MAX_SOURCES_LIMIT, max_results
            )));
        }

        let language = match query.constraints.language {
            Some(ref language) => {
                let code = language.trim().to_lowercase();
                if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(RunFailureKind::InvalidQuery(format!(
                        "language must be a two-letter code, got '{}'",
                        language
                    )));
                }
                Some(code)
            }
            None => None,
        };

        Ok(SearchRequest {
            query: text.to_string(),
            max_results,
            language,
        })
    }

    pub async fn run(&self, query: Query) -> ResearchResult {
        let mut result = ResearchResult::new(query);
        info!("Starting research run {} for '{}'", result.run_id, result.query.text.trim());

        enter(&mut result, Stage::Planning);
        let request = match self.plan(&result.query) {
            Ok(request) => request,
            Err(kind) => return fail(result, kind),
        };

        enter(&mut result, Stage::Searching);
        match self.search.search(&request).await {
            Ok(hits) => result.search_results = hits,
            Err(failure) => return fail(result, RunFailureKind::SearchUnavailable(failure.to_string())),
        }

        enter(&mut result, Stage::Scraping);
        let urls: Vec<String> = result.search_results.iter().map(|hit| hit.url.clone()).collect();
        let batch = self.scraper.scrape(&urls).await;
        info!(
            "Run {}: {} of {} sources extracted",
            result.run_id,
            batch.documents.len(),
            urls.len()
        );
        result.documents = batch.documents;
        result.scrape_outcomes = batch.outcomes;

        if result.documents.is_empty() {
            return fail(result, RunFailureKind::NoContentAvailable);
        }

        // completion order is arbitrary; number sources by search rank
        let ranks: HashMap<&str, usize> = result
            .search_results
            .iter()
            .map(|hit| (hit.url.as_str(), hit.rank))
            .collect();
        let mut documents = std::mem::take(&mut result.documents);
        documents.sort_by_key(|doc| ranks.get(doc.source_url.as_str()).copied().unwrap_or(usize::MAX));
        result.documents = documents;

        enter(&mut result, Stage::Synthesizing);
        let prompt = self.prompts.build(&request, &result.documents);
        if prompt.sources.len() < result.documents.len() {
            let omitted = result.documents.split_off(prompt.sources.len());
            info!(
                "Run {}: {} source(s) left out of the prompt by its size budget",
                result.run_id,
                omitted.len()
            );
            result.omitted_sources = omitted.into_iter().map(|doc| doc.source_url).collect();
        }
        match self.router.route(&prompt).await {
            Ok(routed) => {
                result.synthesis = Some(routed.response);
                result.llm_attempts = routed.attempts;
            }
            Err(failure) => {
                result.llm_attempts = failure.attempts;
                return fail(result, RunFailureKind::SynthesisUnavailable);
            }
        }

        enter(&mut result, Stage::Completed);
        result.status = RunStatus::Completed;
        result.finished_at = Some(Utc::now());
        info!(
            "Run {} completed via {} after {} provider attempt(s)",
            result.run_id,
            result.synthesis.as_ref().map_or("?", |response| response.provider_id.as_str()),
            result.llm_attempts.len()
        );
        result
    }

    /// Closes the browser if this orchestrator launched one.
    pub async fn shutdown(&self) {
        if let Some(ref browser) = self.browser {
            if let Err(e) = browser.shutdown().await {
                warn!("Browser shutdown failed: {}", e);
            }
        }
    }
}

fn enter(result: &mut ResearchResult, stage: Stage) {
    info!("Run {} -> {:?}", result.run_id, stage);
    result.stages.push(stage);
}

fn fail(mut result: ResearchResult, kind: RunFailureKind) -> ResearchResult {
    error!("Run {} failed: {}", result.run_id, kind);
    result.stages.push(Stage::Failed);
    result.status = RunStatus::Failed(kind);
    result.finished_at = Some(Utc::now());
    result
}
