use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Errors raised while wiring the pipeline together (config, browser, output).
/// Failures inside a run are reported through the typed kinds below instead.
#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Browser error: {0}")]
    BrowserError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Output error: {0}")]
    OutputError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Transient: retry the same unit after a backoff delay.
    RetryWithBackoff,
    /// Permanent for this unit: record it and move on.
    Abandon,
}

/// Anything that knows whether it is worth another attempt.
pub trait Recoverable {
    fn recovery_strategy(&self) -> RecoveryStrategy;

    fn is_transient(&self) -> bool {
        self.recovery_strategy() == RecoveryStrategy::RetryWithBackoff
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchFailureKind {
    Timeout,
    Network,
    Blocked,
    RenderError,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct FetchFailure {
    pub kind: FetchFailureKind,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: FetchFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchFailureKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FetchFailureKind::Network, message)
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new(FetchFailureKind::Blocked, message)
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::new(FetchFailureKind::RenderError, message)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractFailure {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Body too short after stripping boilerplate ({length} < {minimum} chars)")]
    EmptyBody { length: usize, minimum: usize },
}

/// Per-URL failure as seen by the scrape manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScrapeFailureKind {
    Timeout,
    Network,
    Blocked,
    RenderError,
    ParseError,
    EmptyBody,
    DeadlineExceeded,
}

impl From<FetchFailureKind> for ScrapeFailureKind {
    fn from(kind: FetchFailureKind) -> Self {
        match kind {
            FetchFailureKind::Timeout => ScrapeFailureKind::Timeout,
            FetchFailureKind::Network => ScrapeFailureKind::Network,
            FetchFailureKind::Blocked => ScrapeFailureKind::Blocked,
            FetchFailureKind::RenderError => ScrapeFailureKind::RenderError,
        }
    }
}

impl From<&ExtractFailure> for ScrapeFailureKind {
    fn from(failure: &ExtractFailure) -> Self {
        match failure {
            ExtractFailure::ParseError(_) => ScrapeFailureKind::ParseError,
            ExtractFailure::EmptyBody { .. } => ScrapeFailureKind::EmptyBody,
        }
    }
}

impl Recoverable for ScrapeFailureKind {
    fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            ScrapeFailureKind::Timeout | ScrapeFailureKind::Network => {
                RecoveryStrategy::RetryWithBackoff
            }
            ScrapeFailureKind::Blocked
            | ScrapeFailureKind::RenderError
            | ScrapeFailureKind::ParseError
            | ScrapeFailureKind::EmptyBody
            | ScrapeFailureKind::DeadlineExceeded => RecoveryStrategy::Abandon,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchFailure {
    #[error("Search returned no results")]
    NoResults,

    #[error("Search provider error: {0}")]
    ProviderError(String),

    #[error("Search provider rate limited the request")]
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LlmFailureKind {
    AuthError,
    RateLimited,
    Timeout,
    ContentFiltered,
    ProviderUnavailable,
}

impl Recoverable for LlmFailureKind {
    fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            LlmFailureKind::RateLimited
            | LlmFailureKind::Timeout
            | LlmFailureKind::ProviderUnavailable => RecoveryStrategy::RetryWithBackoff,
            LlmFailureKind::AuthError | LlmFailureKind::ContentFiltered => {
                RecoveryStrategy::Abandon
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{provider} {kind:?}: {message}")]
pub struct LlmFailure {
    pub provider: String,
    pub kind: LlmFailureKind,
    pub message: String,
}

impl LlmFailure {
    pub fn new(provider: impl Into<String>, kind: LlmFailureKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Terminal-for-run failures, i.e. the `Failed` states of the orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunFailureKind {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("no content available from any source")]
    NoContentAvailable,

    #[error("synthesis unavailable: every provider in the fallback chain failed")]
    SynthesisUnavailable,
}

// Conversion implementations for common error types
impl From<std::io::Error> for ResearchError {
    fn from(err: std::io::Error) -> Self {
        ResearchError::OutputError(err.to_string())
    }
}

impl From<serde_json::Error> for ResearchError {
    fn from(err: serde_json::Error) -> Self {
        ResearchError::ParseError(err.to_string())
    }
}

impl From<toml::de::Error> for ResearchError {
    fn from(err: toml::de::Error) -> Self {
        ResearchError::ConfigError(err.to_string())
    }
}

impl From<toml::ser::Error> for ResearchError {
    fn from(err: toml::ser::Error) -> Self {
        ResearchError::ConfigError(err.to_string())
    }
}

impl From<config::ConfigError> for ResearchError {
    fn from(err: config::ConfigError) -> Self {
        ResearchError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for ResearchError {
    fn from(err: reqwest::Error) -> Self {
        ResearchError::NetworkError(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for ResearchError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ResearchError::BrowserError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrape_failure_classification() {
        assert!(ScrapeFailureKind::Timeout.is_transient());
        assert!(ScrapeFailureKind::Network.is_transient());
        assert!(!ScrapeFailureKind::Blocked.is_transient());
        assert!(!ScrapeFailureKind::ParseError.is_transient());
        assert!(!ScrapeFailureKind::EmptyBody.is_transient());
        assert!(!ScrapeFailureKind::RenderError.is_transient());
        assert!(!ScrapeFailureKind::DeadlineExceeded.is_transient());
    }

    #[test]
    fn test_llm_failure_classification() {
        assert!(LlmFailureKind::RateLimited.is_transient());
        assert!(LlmFailureKind::Timeout.is_transient());
        assert!(LlmFailureKind::ProviderUnavailable.is_transient());
        assert!(!LlmFailureKind::AuthError.is_transient());
        assert!(!LlmFailureKind::ContentFiltered.is_transient());
    }

    #[test]
    fn test_fetch_kind_maps_onto_scrape_kind() {
        assert_eq!(
            ScrapeFailureKind::from(FetchFailureKind::Blocked),
            ScrapeFailureKind::Blocked
        );
        let empty = ExtractFailure::EmptyBody {
            length: 3,
            minimum: 200,
        };
        assert_eq!(ScrapeFailureKind::from(&empty), ScrapeFailureKind::EmptyBody);
    }
}
