use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::browser::UserAgentGenerator;
use crate::error::{ResearchError, Result, SearchFailure};
use crate::model::SearchResult;
use crate::search::{SearchEngine, SearchRequest};

pub const DEFAULT_BASE_URL: &str = "https://html.duckduckgo.com";

/// Search through DuckDuckGo's no-script HTML endpoint
pub struct DuckDuckGoEngine {
    client: Client,
    base_url: String,
    result_selector: Selector,
    link_selector: Selector,
    snippet_selector: Selector,
}

impl DuckDuckGoEngine {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(UserAgentGenerator::new().default_user_agent())
            .build()
            .map_err(|e| ResearchError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        let parse = |css: &str| {
            Selector::parse(css).map_err(|e| ResearchError::ParseError(format!("Invalid selector '{}': {}", css, e)))
        };

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            result_selector: parse("div.result:not(.result--ad)")?,
            link_selector: parse("a.result__a")?,
            snippet_selector: parse(".result__snippet")?,
        })
    }

    /// `kl` region code for a two-letter language
    fn region_for(language: &str) -> String {
        match language {
            "en" => "us-en".to_string(),
            other => format!("{other}-{other}"),
        }
    }

    /// Result links point at a `/l/?uddg=<target>` redirect; unwrap it.
    pub fn decode_result_url(href: &str) -> Option<String> {
        let absolute = if href.starts_with("//") {
            format!("https:{href}")
        } else {
            href.to_string()
        };
        let parsed = Url::parse(&absolute).ok()?;

        if parsed.path().starts_with("/l/") {
            return parsed
                .query_pairs()
                .find(|(key, _)| key == "uddg")
                .map(|(_, target)| target.into_owned());
        }

        matches!(parsed.scheme(), "http" | "https").then(|| parsed.to_string())
    }

    pub fn parse_results(&self, html: &str) -> Vec<SearchResult> {
        let document = Html::parse_document(html);
        let mut results = Vec::new();

        for block in document.select(&self.result_selector) {
            let Some(link) = block.select(&self.link_selector).next() else {
                continue;
            };
            let Some(url) = link.value().attr("href").and_then(Self::decode_result_url) else {
                continue;
            };

            let title = link.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ");
            let snippet = block
                .select(&self.snippet_selector)
                .next()
                .map(|s| s.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" "))
                .unwrap_or_default();

            results.push(SearchResult {
                url,
                title,
                snippet,
                rank: results.len() + 1,
            });
        }

        results
    }
}

#[async_trait]
impl SearchEngine for DuckDuckGoEngine {
    async fn search(&self, request: &SearchRequest) -> std::result::Result<Vec<SearchResult>, SearchFailure> {
        let mut params = vec![("q", request.query.clone())];
        if let Some(ref language) = request.language {
            params.push(("kl", Self::region_for(language)));
        }

        let response = self
            .client
            .get(format!("{}/html/", self.base_url))
            .query(&params)
            .send()
            .await
            .map_err(|e| SearchFailure::ProviderError(e.to_string()))?;

        let status = response.status().as_u16();
        // DuckDuckGo answers 202 with an anomaly page when it throttles
        if status == 429 || status == 202 {
            return Err(SearchFailure::RateLimited);
        }
        if !response.status().is_success() {
            return Err(SearchFailure::ProviderError(format!("HTTP {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SearchFailure::ProviderError(e.to_string()))?;

        let results = self.parse_results(&body);
        debug!("DuckDuckGo returned {} results", results.len());
        Ok(results)
    }
}
