use async_trait::async_trait;
use reqwest::header::{ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::browser::{ProfileConfig, UserAgentGenerator};
use crate::error::{FetchFailure, ResearchError, Result};
use crate::model::RawPage;
use crate::scrape::{classify_status, looks_blocked, PageRenderer};

/// Plain HTTP renderer. Does not execute scripts, so it is only suitable for
/// static pages or hosts without a browser.
pub struct HttpRenderer {
    client: Client,
}

impl HttpRenderer {
    pub fn new(profile: &ProfileConfig, request_timeout: Duration) -> Result<Self> {
        let agents = UserAgentGenerator::new();
        let user_agent = if profile.randomize_user_agents {
            agents.random_user_agent()
        } else {
            agents.default_user_agent()
        };

        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| ResearchError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn classify_transport_error(err: &reqwest::Error) -> FetchFailure {
        if err.is_timeout() {
            FetchFailure::timeout(err.to_string())
        } else if err.is_redirect() {
            FetchFailure::blocked(format!("Redirect loop: {}", err))
        } else {
            FetchFailure::network(err.to_string())
        }
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    fn name(&self) -> &str {
        "http"
    }

    async fn render(&self, url: &Url) -> std::result::Result<RawPage, FetchFailure> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| Self::classify_transport_error(&e))?;

        let status = response.status().as_u16();
        if let Some(failure) = classify_status(status) {
            return Err(failure);
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let html = response
            .text()
            .await
            .map_err(|e| Self::classify_transport_error(&e))?;

        if looks_blocked(&html) {
            return Err(FetchFailure::blocked("Bot challenge page"));
        }

        debug!("HTTP {} for {} ({} bytes)", status, url, html.len());
        Ok(RawPage {
            url: url.to_string(),
            final_url,
            html,
            status: Some(status),
            content_type,
        })
    }
}
