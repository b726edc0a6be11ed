//! LLM vendor clients and the fallback router.
//!
//! Every vendor sits behind [`LlmProvider`] and reports failures in the shared
//! [`LlmFailureKind`] taxonomy, so the router never looks at vendor-specific
//! status codes or payloads:
//! - **OpenAI-compatible**: `/chat/completions` (OpenAI, DeepSeek, local gateways)
//! - **Anthropic**: Messages API
//! - **Google**: Gemini `generateContent`

pub mod anthropic;
pub mod google;
pub mod openai;
pub mod router;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{LlmFailure, LlmFailureKind, ResearchError, Result};
use crate::model::{LlmResponse, SynthesisPrompt};

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use openai::OpenAiProvider;
pub use router::{LlmRouter, RouteFailure, Routed, RouterSettings};

pub const DEFAULT_MAX_TOKENS: u32 = 8000;
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Per-call overrides; `None` falls back to the provider's configured value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerateOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Identifier used in the fallback chain, attempt logs and rate-limit keys
    fn id(&self) -> &str;

    async fn generate(&self, prompt: &SynthesisPrompt, options: &GenerateOptions) -> std::result::Result<LlmResponse, LlmFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderKind {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Google => "https://generativelanguage.googleapis.com",
        }
    }
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

/// One entry of `[[llm.providers]]`. The key itself never lives in the
/// config file, only the name of the environment variable holding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

/// What every vendor client needs, resolved from a [`ProviderConfig`].
#[derive(Clone)]
pub struct VendorSettings {
    pub id: String,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl VendorSettings {
    pub fn from_config(config: &ProviderConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            warn!(
                "No API key in ${} for provider {}; it will fail with AuthError",
                config.api_key_env, config.id
            );
        }

        Self {
            id: config.id.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// The configured key, or an `AuthError` raised before any network call.
    pub(crate) fn require_key(&self) -> std::result::Result<&str, LlmFailure> {
        self.api_key
            .as_deref()
            .ok_or_else(|| LlmFailure::new(&self.id, LlmFailureKind::AuthError, "API key not configured"))
    }

    pub(crate) fn max_tokens(&self, options: &GenerateOptions) -> u32 {
        options.max_tokens.unwrap_or(self.max_tokens)
    }

    pub(crate) fn temperature(&self, options: &GenerateOptions) -> f32 {
        options.temperature.unwrap_or(self.temperature)
    }

    // api keys must not leak into Debug output
    fn redacted(&self) -> &'static str {
        if self.api_key.is_some() {
            "<set>"
        } else {
            "<missing>"
        }
    }
}

impl std::fmt::Debug for VendorSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorSettings")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.redacted())
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

pub fn build_http_client(request_timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(request_timeout)
        .build()
        .map_err(|e| ResearchError::NetworkError(format!("Failed to create HTTP client: {}", e)).into())
}

/// Instantiates the vendor variant named by `config.kind`.
pub fn build_provider(config: &ProviderConfig, request_timeout: Duration) -> Result<Arc<dyn LlmProvider>> {
    let settings = VendorSettings::from_config(config);
    let client = build_http_client(request_timeout)?;
    debug!("Building {:?} provider {:?}", config.kind, settings);

    let provider: Arc<dyn LlmProvider> = match config.kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(settings, client)),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(settings, client)),
        ProviderKind::Google => Arc::new(GoogleProvider::new(settings, client)),
    };
    Ok(provider)
}

/// Maps an HTTP error status (and its body) onto the shared taxonomy.
pub fn classify_status(status: u16, body: &str) -> LlmFailureKind {
    let body = body.to_lowercase();
    let mentions_filter = ["content_filter", "content_policy", "content policy", "safety", "blocked by"]
        .iter()
        .any(|marker| body.contains(marker));
    let mentions_bad_key = ["api_key_invalid", "invalid_api_key", "invalid x-api-key", "authentication_error"]
        .iter()
        .any(|marker| body.contains(marker));

    match status {
        401 | 403 => LlmFailureKind::AuthError,
        408 => LlmFailureKind::Timeout,
        429 => LlmFailureKind::RateLimited,
        400..=499 if mentions_bad_key => LlmFailureKind::AuthError,
        400..=499 if mentions_filter => LlmFailureKind::ContentFiltered,
        _ => LlmFailureKind::ProviderUnavailable,
    }
}

fn transport_failure(provider: &str, error: reqwest::Error) -> LlmFailure {
    if error.is_timeout() {
        LlmFailure::new(provider, LlmFailureKind::Timeout, format!("Request timed out: {}", error))
    } else {
        LlmFailure::new(
            provider,
            LlmFailureKind::ProviderUnavailable,
            format!("Request failed: {}", error),
        )
    }
}

/// Sends a vendor request and decodes the JSON body, classifying every
/// failure on the way.
pub(crate) async fn send_json<T: DeserializeOwned>(provider: &str, request: RequestBuilder) -> std::result::Result<T, LlmFailure> {
    let response = request.send().await.map_err(|e| transport_failure(provider, e))?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let kind = classify_status(status.as_u16(), &body);
        let snippet: String = body.chars().take(300).collect();
        return Err(LlmFailure::new(
            provider,
            kind,
            format!("HTTP {}: {}", status.as_u16(), snippet),
        ));
    }

    response.json::<T>().await.map_err(|e| {
        if e.is_timeout() {
            transport_failure(provider, e)
        } else {
            LlmFailure::new(
                provider,
                LlmFailureKind::ProviderUnavailable,
                format!("Malformed response body: {}", e),
            )
        }
    })
}

/// A success status with no generated text is treated as an outage.
pub(crate) fn require_text(provider: &str, text: String) -> std::result::Result<String, LlmFailure> {
    if text.trim().is_empty() {
        Err(LlmFailure::new(
            provider,
            LlmFailureKind::ProviderUnavailable,
            "No content received",
        ))
    } else {
        Ok(text)
    }
}
