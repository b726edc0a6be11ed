use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{LlmFailure, LlmFailureKind};
use crate::llm::{require_text, send_json, GenerateOptions, LlmProvider, VendorSettings};
use crate::model::{LlmResponse, SynthesisPrompt, TokenUsage};

/// Gemini `generateContent` client
pub struct GoogleProvider {
    settings: VendorSettings,
    client: Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

const FILTER_REASONS: [&str; 4] = ["SAFETY", "RECITATION", "BLOCKLIST", "PROHIBITED_CONTENT"];

impl GoogleProvider {
    pub fn new(settings: VendorSettings, client: Client) -> Self {
        Self { settings, client }
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    fn id(&self) -> &str {
        &self.settings.id
    }

    async fn generate(&self, prompt: &SynthesisPrompt, options: &GenerateOptions) -> Result<LlmResponse, LlmFailure> {
        let id = self.id();
        let api_key = self.settings.require_key()?;

        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: &prompt.system }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: &prompt.user }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.settings.max_tokens(options),
                temperature: self.settings.temperature(options),
            },
        };

        let started = Instant::now();
        let request = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.settings.base_url, self.settings.model
            ))
            .header("x-goog-api-key", api_key)
            .json(&body);
        let response: GenerateResponse = send_json(id, request).await?;
        let latency = started.elapsed();

        if let Some(reason) = response.prompt_feedback.and_then(|feedback| feedback.block_reason) {
            return Err(LlmFailure::new(
                id,
                LlmFailureKind::ContentFiltered,
                format!("Prompt blocked: {}", reason),
            ));
        }

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmFailure::new(id, LlmFailureKind::ProviderUnavailable, "Response has no candidates"))?;

        if let Some(ref reason) = candidate.finish_reason {
            if FILTER_REASONS.contains(&reason.as_str()) {
                return Err(LlmFailure::new(
                    id,
                    LlmFailureKind::ContentFiltered,
                    format!("Generation stopped: {}", reason),
                ));
            }
        }

        let text = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let text = require_text(id, text)?;

        let usage = response
            .usage_metadata
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            })
            .unwrap_or_default();

        debug!("{} answered in {:?} ({} tokens)", id, latency, usage.total_tokens);
        Ok(LlmResponse {
            provider_id: id.to_string(),
            model: response.model_version.unwrap_or_else(|| self.settings.model.clone()),
            text,
            usage,
            latency,
        })
    }
}
