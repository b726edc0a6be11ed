use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{LlmFailure, LlmFailureKind};
use crate::llm::{require_text, send_json, GenerateOptions, LlmProvider, VendorSettings};
use crate::model::{LlmResponse, SynthesisPrompt, TokenUsage};

pub const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API client
pub struct AnthropicProvider {
    settings: VendorSettings,
    client: Client,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(settings: VendorSettings, client: Client) -> Self {
        Self { settings, client }
    }

    fn extract_text(content: &[ContentBlock]) -> String {
        content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.settings.id
    }

    async fn generate(&self, prompt: &SynthesisPrompt, options: &GenerateOptions) -> Result<LlmResponse, LlmFailure> {
        let id = self.id();
        let api_key = self.settings.require_key()?;

        let body = MessagesRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens(options),
            temperature: self.settings.temperature(options),
            system: &prompt.system,
            messages: vec![Message {
                role: "user",
                content: &prompt.user,
            }],
        };

        let started = Instant::now();
        let request = self
            .client
            .post(format!("{}/v1/messages", self.settings.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);
        let response: MessagesResponse = send_json(id, request).await?;
        let latency = started.elapsed();

        if response.stop_reason.as_deref() == Some("refusal") {
            return Err(LlmFailure::new(
                id,
                LlmFailureKind::ContentFiltered,
                "Model refused to answer",
            ));
        }

        let text = require_text(id, Self::extract_text(&response.content))?;
        let usage = response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: &str) -> AnthropicProvider {
        AnthropicProvider::new(
            VendorSettings {
                id: "claude".to_string(),
                model: "claude-3-5-sonnet-latest".to_string(),
                base_url: base_url.to_string(),
                api_key: Some("ant-test".to_string()),
                max_tokens: 8000,
                temperature: 0.3,
            },
            Client::new(),
        )
    }

    fn prompt() -> SynthesisPrompt {
        SynthesisPrompt {
            system: "system text".to_string(),
            user: "user text".to_string(),
            sources: vec![],
        }
    }

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "ant-test"))
            .and(header("anthropic-version", API_VERSION))
            .and(body_partial_json(json!({
                "model": "claude-3-5-sonnet-latest",
                "system": "system text",
                "max_tokens": 1024
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "claude-3-5-sonnet-latest",
                "content": [
                    {"type": "text", "text": "Part one. "},
                    {"type": "text", "text": "Part two."}
                ],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 30, "output_tokens": 8}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let options = GenerateOptions {
            max_tokens: Some(1024),
            temperature: None,
        };
        let response = provider(&server.uri()).generate(&prompt(), &options).await.unwrap();

        assert_eq!(response.text, "Part one. Part two.");
        assert_eq!(response.usage.total_tokens, 38);
        assert_eq!(response.provider_id, "claude");
    }

    #[tokio::test]
    async fn test_overloaded_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_json(json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .mount(&server)
            .await;

        let failure = provider(&server.uri())
            .generate(&prompt(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, LlmFailureKind::ProviderUnavailable);
    }

    #[tokio::test]
    async fn test_refusal_is_content_filtered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [],
                "stop_reason": "refusal"
            })))
            .mount(&server)
            .await;

        let failure = provider(&server.uri())
            .generate(&prompt(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, LlmFailureKind::ContentFiltered);
    }
}
