use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{LlmFailure, LlmFailureKind};
use crate::llm::{require_text, send_json, GenerateOptions, LlmProvider, VendorSettings};
use crate::model::{LlmResponse, SynthesisPrompt, TokenUsage};

/// OpenAI chat-completions contract. Also serves DeepSeek and any other
/// endpoint speaking the same protocol via `base_url`.
pub struct OpenAiProvider {
    settings: VendorSettings,
    client: Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(settings: VendorSettings, client: Client) -> Self {
        Self { settings, client }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.settings.id
    }

    async fn generate(&self, prompt: &SynthesisPrompt, options: &GenerateOptions) -> Result<LlmResponse, LlmFailure> {
        let id = self.id();
        let api_key = self.settings.require_key()?;

        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            max_tokens: self.settings.max_tokens(options),
            temperature: self.settings.temperature(options),
        };

        let started = Instant::now();
        let request = self
            .client
            .post(format!("{}/chat/completions", self.settings.base_url))
            .bearer_auth(api_key)
            .json(&body);
        let response: ChatResponse = send_json(id, request).await?;
        let latency = started.elapsed();

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmFailure::new(id, LlmFailureKind::ProviderUnavailable, "Response has no choices"))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(LlmFailure::new(
                id,
                LlmFailureKind::ContentFiltered,
                "Completion stopped by content filter",
            ));
        }

        let text = require_text(id, choice.message.content.unwrap_or_default())?;
        let usage = response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        debug!("{} answered in {:?} ({} tokens)", id, latency, usage.total_tokens);
        Ok(LlmResponse {
            provider_id: id.to_string(),
            model: response.model.unwrap_or_else(|| self.settings.model.clone()),
            text,
            usage,
            latency,
        })
    }
}
