use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{LlmFailureKind, RunFailureKind, ScrapeFailureKind};

/// Optional limits the caller can put on a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConstraints {
    pub max_sources: Option<usize>,
    pub language: Option<String>,
}

/// The research question, consumed once per orchestration run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub constraints: QueryConstraints,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            constraints: QueryConstraints::default(),
        }
    }

    pub fn with_max_sources(mut self, max_sources: usize) -> Self {
        self.constraints.max_sources = Some(max_sources);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.constraints.language = Some(language.into());
        self
    }
}

/// One hit from the search engine. `rank` is 1-based engine order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed(ScrapeFailureKind),
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed(_))
    }
}

/// Scrape bookkeeping for a single URL. Status only ever moves forward:
/// Pending -> InFlight -> Succeeded | Failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeTask {
    pub url: String,
    pub attempts: u32,
    pub status: TaskStatus,
    pub last_error: Option<String>,
}

impl ScrapeTask {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            attempts: 0,
            status: TaskStatus::Pending,
            last_error: None,
        }
    }

    /// Count a new attempt. Returns false if the task is already terminal.
    pub fn begin_attempt(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskStatus::InFlight;
        self.attempts += 1;
        true
    }

    pub fn succeed(&mut self) {
        if !self.status.is_terminal() {
            self.status = TaskStatus::Succeeded;
            self.last_error = None;
        }
    }

    pub fn fail(&mut self, kind: ScrapeFailureKind, message: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = TaskStatus::Failed(kind);
            self.last_error = Some(message.into());
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }
}

/// Rendered page content as returned by a renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    /// URL that was requested
    pub url: String,
    /// URL after redirects, used as the base for resolving links
    pub final_url: String,
    pub html: String,
    pub status: Option<u16>,
    pub content_type: Option<String>,
}

impl RawPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            html: html.into(),
            status: None,
            content_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub source_url: String,
    pub title: String,
    pub body: String,
    pub links: Vec<String>,
}

/// Prompt handed to the LLM router. Built once per run from the documents
/// that extracted successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisPrompt {
    pub system: String,
    pub user: String,
    /// Source URLs in the order they are numbered inside `user`
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub provider_id: String,
    pub model: String,
    pub text: String,
    pub usage: TokenUsage,
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(LlmFailureKind),
    /// Never attempted because the chain deadline ran out first
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider_id: String,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Planning,
    Searching,
    Scraping,
    Synthesizing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    Failed(RunFailureKind),
}

/// Terminal artifact of a run, handed to the document writers. It is
/// returned for failed runs as well so gathered work is never discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub run_id: Uuid,
    pub query: Query,
    pub status: RunStatus,
    pub stages: Vec<Stage>,
    pub search_results: Vec<SearchResult>,
    /// Documents the synthesis prompt was built from
    pub documents: Vec<ExtractedDocument>,
    /// Extracted but left out of the prompt by its size budget
    #[serde(default)]
    pub omitted_sources: Vec<String>,
    pub scrape_outcomes: Vec<ScrapeTask>,
    pub synthesis: Option<LlmResponse>,
    pub llm_attempts: Vec<ProviderAttempt>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ResearchResult {
    pub fn new(query: Query) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            query,
            status: RunStatus::Completed,
            stages: Vec::new(),
            search_results: Vec::new(),
            documents: Vec::new(),
            omitted_sources: Vec::new(),
            scrape_outcomes: Vec::new(),
            synthesis: None,
            llm_attempts: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn synthesized_text(&self) -> Option<&str> {
        self.synthesis.as_ref().map(|response| response.text.as_str())
    }

    pub fn failure(&self) -> Option<&RunFailureKind> {
        match &self.status {
            RunStatus::Failed(kind) => Some(kind),
            RunStatus::Completed => None,
        }
    }

    pub fn failed_llm_attempts(&self) -> usize {
        self.llm_attempts
            .iter()
            .filter(|attempt| matches!(attempt.outcome, AttemptOutcome::Failed(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_moves_forward_only() {
        let mut task = ScrapeTask::new("https://example.com");
        assert_eq!(task.status, TaskStatus::Pending);

        assert!(task.begin_attempt());
        assert_eq!(task.status, TaskStatus::InFlight);
        assert_eq!(task.attempts, 1);

        task.fail(ScrapeFailureKind::Blocked, "403");
        assert_eq!(task.status, TaskStatus::Failed(ScrapeFailureKind::Blocked));

        // terminal tasks ignore further transitions
        assert!(!task.begin_attempt());
        task.succeed();
        assert_eq!(task.status, TaskStatus::Failed(ScrapeFailureKind::Blocked));
        assert_eq!(task.attempts, 1);
    }

    #[test]
    fn test_query_builder() {
        let query = Query::new("impact of X on Y")
            .with_max_sources(5)
            .with_language("en");
        assert_eq!(query.constraints.max_sources, Some(5));
        assert_eq!(query.constraints.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_result_serializes_with_readable_latency() {
        let mut result = ResearchResult::new(Query::new("q"));
        result.llm_attempts.push(ProviderAttempt {
            provider_id: "openai".to_string(),
            attempt: 1,
            outcome: AttemptOutcome::Failed(LlmFailureKind::RateLimited),
            latency: Duration::from_millis(1500),
            message: None,
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["llm_attempts"][0]["latency"], "1s 500ms");
        assert_eq!(result.failed_llm_attempts(), 1);
    }
}
