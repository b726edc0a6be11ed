use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub randomize_user_agents: bool,
    pub viewport_randomization: bool,
    pub block_media: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            randomize_user_agents: true,
            viewport_randomization: true,
            block_media: true,
        }
    }
}

pub struct UserAgentGenerator {
    user_agents: Vec<String>,
}

impl Default for UserAgentGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl UserAgentGenerator {
    pub fn new() -> Self {
        let user_agents = vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:125.0) Gecko/20100101 Firefox/125.0".to_string(),
        ];

        Self { user_agents }
    }

    pub fn random_user_agent(&self) -> &str {
        let index = rand::thread_rng().gen_range(0..self.user_agents.len());
        &self.user_agents[index]
    }

    /// First entry; used when randomization is off.
    pub fn default_user_agent(&self) -> &str {
        &self.user_agents[0]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

const VIEWPORTS: [ViewportSize; 5] = [
    ViewportSize { width: 1920, height: 1080 },
    ViewportSize { width: 1366, height: 768 },
    ViewportSize { width: 1536, height: 864 },
    ViewportSize { width: 1440, height: 900 },
    ViewportSize { width: 1280, height: 720 },
];

/// Per-page browsing profile
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub user_agent: String,
    pub viewport: ViewportSize,
    pub accept_language: String,
}

impl BrowserProfile {
    pub fn generate(config: &ProfileConfig, agents: &UserAgentGenerator, language: Option<&str>) -> Self {
        let user_agent = if config.randomize_user_agents {
            agents.random_user_agent()
        } else {
            agents.default_user_agent()
        };

        let viewport = if config.viewport_randomization {
            VIEWPORTS[rand::thread_rng().gen_range(0..VIEWPORTS.len())]
        } else {
            VIEWPORTS[0]
        };

        let accept_language = match language {
            Some(lang) if lang != "en" => format!("{lang},en;q=0.8"),
            _ => "en-US,en;q=0.9".to_string(),
        };

        Self {
            user_agent: user_agent.to_string(),
            viewport,
            accept_language,
        }
    }
}

/// Stops audio/video from loading; rendered text is all we keep.
pub fn generate_media_block_script() -> &'static str {
    r#"
    (function() {
        function stopMedia() {
            document.querySelectorAll('video, audio').forEach(function(el) {
                el.pause();
                el.removeAttribute('src');
                el.load();
            });
        }
        document.addEventListener('DOMContentLoaded', stopMedia);
        new MutationObserver(stopMedia).observe(document, { childList: true, subtree: true });
    })();
    "#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_generation() {
        let generator = UserAgentGenerator::new();
        let user_agent = generator.random_user_agent();

        assert!(!user_agent.is_empty());
        assert!(user_agent.contains("Mozilla"));
    }

    #[test]
    fn test_profile_without_randomization_is_stable() {
        let config = ProfileConfig {
            randomize_user_agents: false,
            viewport_randomization: false,
            block_media: false,
        };
        let agents = UserAgentGenerator::new();
        let first = BrowserProfile::generate(&config, &agents, None);
        let second = BrowserProfile::generate(&config, &agents, None);

        assert_eq!(first.user_agent, second.user_agent);
        assert_eq!(first.viewport, ViewportSize { width: 1920, height: 1080 });
        assert_eq!(first.accept_language, "en-US,en;q=0.9");
    }

    #[test]
    fn test_profile_language_preference() {
        let profile = BrowserProfile::generate(&ProfileConfig::default(), &UserAgentGenerator::new(), Some("de"));
        assert_eq!(profile.accept_language, "de,en;q=0.8");
    }

    #[test]
    fn test_media_block_script() {
        let script = generate_media_block_script();
        assert!(script.contains("video"));
        assert!(script.contains("pause"));
    }
}
