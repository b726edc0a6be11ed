use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::browser::profile::{generate_media_block_script, BrowserProfile, ProfileConfig, UserAgentGenerator};
use crate::error::{FetchFailure, ResearchError, Result};
use crate::model::RawPage;
use crate::scrape::{classify_status, looks_blocked, PageRenderer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Upper bound on simultaneously open tabs
    pub max_pages: usize,
    /// Time given to client-side scripts after navigation completes
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    pub executable: Option<PathBuf>,
    pub profile: ProfileConfig,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            max_pages: 4,
            settle_delay: Duration::from_millis(1500),
            executable: None,
            profile: ProfileConfig::default(),
        }
    }
}

/// Closes the tab when dropped, including when the render future is
/// abandoned by a timeout.
struct PageGuard {
    page: Option<Page>,
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            tokio::spawn(async move {
                if let Err(e) = page.close().await {
                    debug!("Failed to close page: {}", e);
                }
            });
        }
    }
}

/// Headless chromium renderer. Pages are opened per fetch and closed
/// afterwards; `max_pages` bounds how many are open at once.
pub struct BrowserManager {
    browser: Mutex<Browser>,
    pages: Arc<Semaphore>,
    settings: BrowserSettings,
    user_agents: UserAgentGenerator,
}

impl BrowserManager {
    pub async fn launch(settings: BrowserSettings) -> Result<Self> {
        let browser = Self::create_browser(&settings).await?;

        Ok(Self {
            browser: Mutex::new(browser),
            pages: Arc::new(Semaphore::new(settings.max_pages.max(1))),
            settings,
            user_agents: UserAgentGenerator::new(),
        })
    }

    async fn create_browser(settings: &BrowserSettings) -> Result<Browser> {
        info!("Launching headless browser (max {} pages)", settings.max_pages);

        // unique profile dir so parallel runs don't fight over the singleton lock
        let user_data_dir = std::env::temp_dir().join(format!(
            "research-pipeline-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg(format!("--user-data-dir={}", user_data_dir.display()))
            .args([
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--disable-extensions",
                "--mute-audio",
                "--no-first-run",
                "--disable-default-apps",
                "--disable-sync",
                "--disable-background-networking",
                "--disable-background-timer-throttling",
                "--disable-renderer-backgrounding",
                "--log-level=3",
            ]);

        if let Some(ref executable) = settings.executable {
            builder = builder.chrome_executable(executable);
        }

        let browser_config = builder
            .build()
            .map_err(|e| ResearchError::BrowserError(format!("Failed to create browser config: {}", e)))?;

        let mut last_error = None;
        for attempt in 1..=3 {
            match Browser::launch(browser_config.clone()).await {
                Ok((browser, mut handler)) => {
                    info!("Browser launched on attempt {}", attempt);

                    tokio::spawn(async move {
                        while let Some(event) = handler.next().await {
                            if let Err(e) = event {
                                let message = e.to_string();
                                // chromium emits events chromiumoxide has no type for
                                if message.contains("data did not match any variant") {
                                    debug!("Ignoring unknown CDP message: {}", message);
                                } else {
                                    warn!("Browser handler error: {}", message);
                                }
                            }
                        }
                        debug!("Browser handler task ended");
                    });

                    return Ok(browser);
                }
                Err(e) => {
                    error!("Browser launch attempt {} failed: {}", attempt, e);
                    last_error = Some(e.to_string());
                    if attempt < 3 {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }

        Err(ResearchError::BrowserError(format!(
            "Failed to launch browser after 3 attempts: {}",
            last_error.unwrap_or_default()
        ))
        .into())
    }

    async fn open_page(&self) -> std::result::Result<Page, FetchFailure> {
        let browser = self.browser.lock().await;
        browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchFailure::render(format!("Failed to open page: {}", e)))
    }

    async fn prepare_page(&self, page: &Page) -> std::result::Result<(), FetchFailure> {
        let profile = BrowserProfile::generate(&self.settings.profile, &self.user_agents, None);

        let device_metrics = SetDeviceMetricsOverrideParams::builder()
            .width(profile.viewport.width as i64)
            .height(profile.viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| FetchFailure::render(format!("Failed to build device metrics: {}", e)))?;
        page.execute(device_metrics)
            .await
            .map_err(|e| FetchFailure::render(format!("Failed to set viewport: {}", e)))?;

        let user_agent = SetUserAgentOverrideParams::builder()
            .user_agent(&profile.user_agent)
            .accept_language(&profile.accept_language)
            .build()
            .map_err(|e| FetchFailure::render(format!("Failed to build user agent params: {}", e)))?;
        page.execute(user_agent)
            .await
            .map_err(|e| FetchFailure::render(format!("Failed to set user agent: {}", e)))?;

        if self.settings.profile.block_media {
            let script = AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(generate_media_block_script())
                .build()
                .map_err(|e| FetchFailure::render(format!("Failed to build media script: {}", e)))?;
            page.execute(script)
                .await
                .map_err(|e| FetchFailure::render(format!("Failed to install media script: {}", e)))?;
        }

        Ok(())
    }

    async fn load(&self, page: &Page, url: &Url) -> std::result::Result<RawPage, FetchFailure> {
        page.goto(url.as_str())
            .await
            .map_err(|e| classify_navigation_error(&e.to_string()))?;

        // chromium completes navigation for error pages too
        let navigation = page
            .wait_for_navigation_response()
            .await
            .map_err(|e| classify_navigation_error(&e.to_string()))?;
        let response = navigation.as_ref().and_then(|request| request.response.as_ref());
        let status = check_navigation_status(response.map(|r| r.status)).map_err(|failure| {
            debug!("Navigation to {} answered {}", url, failure);
            failure
        })?;
        let content_type = response
            .map(|r| r.mime_type.clone())
            .filter(|mime| !mime.is_empty())
            .unwrap_or_else(|| "text/html".to_string());

        // give client-side rendering a chance to fill in the DOM
        tokio::time::sleep(self.settings.settle_delay).await;

        let html = page
            .content()
            .await
            .map_err(|e| FetchFailure::render(format!("Failed to read page content: {}", e)))?;

        if looks_blocked(&html) {
            return Err(FetchFailure::blocked("Bot challenge page"));
        }

        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        Ok(RawPage {
            url: url.to_string(),
            final_url,
            html,
            status,
            content_type: Some(content_type),
        })
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down browser");
        let mut browser = self.browser.lock().await;
        browser
            .close()
            .await
            .map_err(|e| ResearchError::BrowserError(format!("Failed to close browser: {}", e)))?;
        let _ = browser.wait().await;
        Ok(())
    }
}

#[async_trait]
impl PageRenderer for BrowserManager {
    fn name(&self) -> &str {
        "chromium"
    }

    async fn render(&self, url: &Url) -> std::result::Result<RawPage, FetchFailure> {
        let _slot = self
            .pages
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FetchFailure::render("Browser page pool closed"))?;

        let page = self.open_page().await?;
        let guard = PageGuard {
            page: Some(page.clone()),
        };

        self.prepare_page(&page).await?;
        let result = self.load(&page, url).await;
        drop(guard);
        result
    }
}

/// Status of the main-frame response. Navigations without one (data: URLs,
/// cache hits) pass; error statuses map through [`classify_status`].
pub fn check_navigation_status(status: Option<i64>) -> std::result::Result<Option<u16>, FetchFailure> {
    let Some(status) = status else {
        return Ok(None);
    };
    let status = u16::try_from(status).map_err(|_| FetchFailure::render(format!("Invalid HTTP status {status}")))?;
    match classify_status(status) {
        Some(failure) => Err(failure),
        None => Ok(Some(status)),
    }
}

/// Chromium reports navigation failures as `net::ERR_*` strings.
pub fn classify_navigation_error(message: &str) -> FetchFailure {
    if message.contains("ERR_TIMED_OUT") || message.contains("ERR_CONNECTION_TIMED_OUT") {
        FetchFailure::timeout(message)
    } else if message.contains("ERR_BLOCKED") || message.contains("ERR_ACCESS_DENIED") {
        FetchFailure::blocked(message)
    } else if message.contains("net::ERR_") {
        FetchFailure::network(message)
    } else {
        FetchFailure::render(message)
    }
}

impl Drop for BrowserManager {
    fn drop(&mut self) {
        info!("Browser manager dropped");
    }
}
