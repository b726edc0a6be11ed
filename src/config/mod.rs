use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::browser::BrowserSettings;
use crate::error::{ResearchError, Result};
use crate::extract::DEFAULT_MIN_BODY_CHARS;
use crate::llm::{GenerateOptions, ProviderConfig, ProviderKind, RouterSettings, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::output::OutputFormat;
use crate::ratelimit::RateLimit;
use crate::research::prompt::{PromptSettings, DEFAULT_SYSTEM_PROMPT};
use crate::retry::RetryPolicy;
use crate::scrape::{RendererKind, ScrapeSettings};
use crate::search::duckduckgo;

/// Prefix for environment overrides, e.g. `RESEARCH__SCRAPING__MAX_PARALLEL=8`
pub const ENV_PREFIX: &str = "RESEARCH";
pub const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    pub search: SearchConfig,
    pub scraping: ScrapingConfig,
    pub llm: LlmConfig,
    pub rate_limits: RateLimitConfig,
    pub research: ResearchConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SearchConfig {
    pub engine: String,
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ScrapingConfig {
    pub renderer: RendererKind,
    pub max_parallel: usize,
    pub max_attempts_per_url: u32,
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_cap: Duration,
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub overall_deadline: Duration,
    pub min_body_chars: usize,
    pub browser: BrowserSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider ids, tried in order
    pub fallback_chain: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub per_attempt_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub total_chain_deadline: Duration,
    pub attempts_per_provider: u32,
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_cap: Duration,
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Applied to every scraped domain without its own entry
    pub per_domain: Option<RateLimit>,
    #[serde(default)]
    pub domains: HashMap<String, RateLimit>,
    pub search: RateLimit,
    /// Keyed by provider id
    #[serde(default)]
    pub providers: HashMap<String, RateLimit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResearchConfig {
    pub default_max_sources: usize,
    pub max_chars_per_document: usize,
    pub max_prompt_chars: usize,
    pub system_prompt: String,
    pub custom_instruction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub directory: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let provider = |id: &str, kind: ProviderKind, model: &str, base_url: &str, api_key_env: &str| ProviderConfig {
            id: id.to_string(),
            kind,
            model: model.to_string(),
            base_url: base_url.to_string(),
            api_key_env: api_key_env.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        };

        Self {
            search: SearchConfig {
                engine: "duckduckgo".to_string(),
                base_url: duckduckgo::DEFAULT_BASE_URL.to_string(),
                timeout: Duration::from_secs(15),
            },
            scraping: ScrapingConfig {
                renderer: RendererKind::Chromium,
                max_parallel: 4,
                max_attempts_per_url: 3,
                backoff_base: Duration::from_millis(500),
                backoff_cap: Duration::from_secs(8),
                fetch_timeout: Duration::from_secs(20),
                overall_deadline: Duration::from_secs(90),
                min_body_chars: DEFAULT_MIN_BODY_CHARS,
                browser: BrowserSettings::default(),
            },
            llm: LlmConfig {
                fallback_chain: vec![
                    "deepseek".to_string(),
                    "openai".to_string(),
                    "anthropic".to_string(),
                    "gemini".to_string(),
                ],
                per_attempt_timeout: Duration::from_secs(90),
                total_chain_deadline: Duration::from_secs(240),
                attempts_per_provider: 1,
                backoff_base: Duration::from_secs(1),
                backoff_cap: Duration::from_secs(16),
                providers: vec![
                    provider("deepseek", ProviderKind::OpenAi, "deepseek-chat", "https://api.deepseek.com", "DEEPSEEK_API_KEY"),
                    provider("openai", ProviderKind::OpenAi, "gpt-4o-mini", ProviderKind::OpenAi.default_base_url(), "OPENAI_API_KEY"),
                    provider(
                        "anthropic",
                        ProviderKind::Anthropic,
                        "claude-3-5-sonnet-latest",
                        ProviderKind::Anthropic.default_base_url(),
                        "ANTHROPIC_API_KEY",
                    ),
                    provider("gemini", ProviderKind::Google, "gemini-1.5-flash", ProviderKind::Google.default_base_url(), "GEMINI_API_KEY"),
                ],
            },
            rate_limits: RateLimitConfig {
                per_domain: Some(RateLimit::new(2, Duration::from_secs(1))),
                domains: HashMap::new(),
                search: RateLimit::new(1, Duration::from_secs(2)),
                providers: HashMap::new(),
            },
            research: ResearchConfig {
                default_max_sources: 8,
                max_chars_per_document: 4000,
                max_prompt_chars: 48_000,
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
                custom_instruction: None,
            },
            output: OutputConfig {
                format: OutputFormat::Markdown,
                directory: PathBuf::from("./research_output"),
            },
        }
    }
}

impl ScrapingConfig {
    pub fn settings(&self) -> ScrapeSettings {
        ScrapeSettings {
            max_parallel: self.max_parallel,
            retry: RetryPolicy::new(self.max_attempts_per_url, self.backoff_base, self.backoff_cap),
            fetch_timeout: self.fetch_timeout,
            overall_deadline: self.overall_deadline,
        }
    }
}

impl LlmConfig {
    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            per_attempt_timeout: self.per_attempt_timeout,
            total_chain_deadline: self.total_chain_deadline,
            retry: RetryPolicy::new(self.attempts_per_provider, self.backoff_base, self.backoff_cap),
            options: GenerateOptions::default(),
        }
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|provider| provider.id == id)
    }
}

impl ResearchConfig {
    pub fn prompt_settings(&self) -> PromptSettings {
        PromptSettings {
            system_prompt: self.system_prompt.clone(),
            max_chars_per_document: self.max_chars_per_document,
            max_prompt_chars: self.max_prompt_chars,
            custom_instruction: self.custom_instruction.clone(),
        }
    }
}

#[async_trait::async_trait]
pub trait ConfigManager {
    async fn load_config(&self) -> Result<Config>;
    async fn save_config(&self, config: &Config) -> Result<()>;
    fn validate_config(&self, config: &Config) -> Result<()>;
}

pub struct FileConfigManager {
    config_path: PathBuf,
}

impl FileConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }
}

fn invalid(message: impl Into<String>) -> Box<dyn std::error::Error + Send + Sync> {
    ResearchError::ConfigError(message.into()).into()
}

#[async_trait::async_trait]
impl ConfigManager for FileConfigManager {
    async fn load_config(&self) -> Result<Config> {
        info!("Loading configuration from {:?}", self.config_path);

        if !self.config_path.exists() {
            warn!("Configuration file not found, creating default config at {:?}", self.config_path);
            self.create_default_config().await?;
        }

        // file first, then RESEARCH__SECTION__KEY environment overrides
        let layered = config::Config::builder()
            .add_source(config::File::from(self.config_path.as_path()).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ResearchError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Config = layered
            .try_deserialize()
            .map_err(|e| ResearchError::ConfigError(format!("Failed to parse config: {}", e)))?;

        self.validate_config(&config)?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    fn validate_config(&self, config: &Config) -> Result<()> {
        debug!("Validating configuration");

        // search
        if config.search.engine != "duckduckgo" {
            return Err(invalid(format!("Unsupported search engine '{}'", config.search.engine)));
        }
        check_url("search.base_url", &config.search.base_url)?;
        if config.search.timeout.is_zero() {
            return Err(invalid("search.timeout must be greater than 0"));
        }

        // scraping
        let scraping = &config.scraping;
        if !(1..=64).contains(&scraping.max_parallel) {
            return Err(invalid("scraping.max_parallel must be between 1 and 64"));
        }
        if !(1..=10).contains(&scraping.max_attempts_per_url) {
            return Err(invalid("scraping.max_attempts_per_url must be between 1 and 10"));
        }
        check_backoff("scraping", scraping.backoff_base, scraping.backoff_cap)?;
        if scraping.fetch_timeout.is_zero() {
            return Err(invalid("scraping.fetch_timeout must be greater than 0"));
        }
        if scraping.browser.max_pages == 0 {
            return Err(invalid("scraping.browser.max_pages must be greater than 0"));
        }

        // llm
        let llm = &config.llm;
        let mut ids = HashSet::new();
        for provider in &llm.providers {
            if provider.id.trim().is_empty() {
                return Err(invalid("Provider id cannot be empty"));
            }
            if !ids.insert(provider.id.as_str()) {
                return Err(invalid(format!("Duplicate provider id '{}'", provider.id)));
            }
            if provider.model.trim().is_empty() {
                return Err(invalid(format!("Provider '{}' has no model", provider.id)));
            }
            if provider.api_key_env.trim().is_empty() {
                return Err(invalid(format!("Provider '{}' has no api_key_env", provider.id)));
            }
            if provider.max_tokens == 0 {
                return Err(invalid(format!("Provider '{}' max_tokens must be greater than 0", provider.id)));
            }
            if !(0.0..=2.0).contains(&provider.temperature) {
                return Err(invalid(format!("Provider '{}' temperature must be between 0 and 2", provider.id)));
            }
            check_url(&format!("provider '{}' base_url", provider.id), &provider.base_url)?;
        }

        if llm.fallback_chain.is_empty() {
            return Err(invalid("llm.fallback_chain cannot be empty"));
        }
        for id in &llm.fallback_chain {
            if !ids.contains(id.as_str()) {
                return Err(invalid(format!("Fallback chain names unknown provider '{}'", id)));
            }
        }
        if llm.per_attempt_timeout.is_zero() {
            return Err(invalid("llm.per_attempt_timeout must be greater than 0"));
        }
        if llm.total_chain_deadline.is_zero() {
            return Err(invalid("llm.total_chain_deadline must be greater than 0"));
        }
        if !(1..=10).contains(&llm.attempts_per_provider) {
            return Err(invalid("llm.attempts_per_provider must be between 1 and 10"));
        }
        check_backoff("llm", llm.backoff_base, llm.backoff_cap)?;

        // rate limits
        let limits = &config.rate_limits;
        let all_limits = limits
            .per_domain
            .iter()
            .map(|limit| ("per_domain", limit))
            .chain(std::iter::once(("search", &limits.search)))
            .chain(limits.domains.iter().map(|(key, limit)| (key.as_str(), limit)))
            .chain(limits.providers.iter().map(|(key, limit)| (key.as_str(), limit)));
        for (key, limit) in all_limits {
            if limit.requests == 0 || limit.window.is_zero() {
                return Err(invalid(format!("Rate limit '{}' must allow at least 1 request per non-zero window", key)));
            }
        }

        // research
        let research = &config.research;
        if !(1..=50).contains(&research.default_max_sources) {
            return Err(invalid("research.default_max_sources must be between 1 and 50"));
        }
        if research.max_chars_per_document == 0 || research.max_prompt_chars < research.max_chars_per_document {
            return Err(invalid(
                "research.max_prompt_chars must be at least research.max_chars_per_document, which must be greater than 0",
            ));
        }
        if research.system_prompt.trim().is_empty() {
            return Err(invalid("research.system_prompt cannot be empty"));
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    async fn save_config(&self, config: &Config) -> Result<()> {
        info!("Saving configuration to {:?}", self.config_path);

        let toml_content = toml::to_string_pretty(config)
            .map_err(|e| ResearchError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(&self.config_path, toml_content)
            .map_err(|e| ResearchError::ConfigError(format!("Failed to write config file: {}", e)))?;

        info!("Configuration saved successfully");
        Ok(())
    }
}

impl FileConfigManager {
    async fn create_default_config(&self) -> Result<()> {
        let toml_content = toml::to_string_pretty(&Config::default())
            .map_err(|e| ResearchError::ConfigError(format!("Failed to serialize default config: {}", e)))?;

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ResearchError::ConfigError(format!("Failed to create config directory: {}", e)))?;
        }

        fs::write(&self.config_path, toml_content)
            .map_err(|e| ResearchError::ConfigError(format!("Failed to write default config: {}", e)))?;

        info!("Default configuration file created at {:?}", self.config_path);
        Ok(())
    }
}

fn check_url(field: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(invalid(format!("{} must start with http:// or https://", field)))
    }
}

fn check_backoff(section: &str, base: Duration, cap: Duration) -> Result<()> {
    if base.is_zero() {
        return Err(invalid(format!("{}.backoff_base must be greater than 0", section)));
    }
    if base > cap {
        return Err(invalid(format!("{}.backoff_base cannot exceed {}.backoff_cap", section, section)));
    }
    Ok(())
}
