pub mod client;
pub mod http;
pub mod manager;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::FetchFailure;
use crate::model::RawPage;

pub use client::ScrapeClient;
pub use http::HttpRenderer;
pub use manager::{ScrapeBatch, ScrapeManager, ScrapeSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// Headless chromium; runs client-side scripts
    Chromium,
    /// Plain HTTP GET
    Http,
}

/// Loads a page and hands back its rendered HTML. Implementations own the
/// transport (headless browser, plain HTTP); timeouts and rate limiting are
/// applied by [`ScrapeClient`].
#[async_trait]
pub trait PageRenderer: Send + Sync {
    fn name(&self) -> &str;

    async fn render(&self, url: &Url) -> Result<RawPage, FetchFailure>;
}

const CHALLENGE_MARKERS: [&str; 6] = [
    "cf-browser-verification",
    "challenge-platform",
    "g-recaptcha",
    "h-captcha",
    "Attention Required! | Cloudflare",
    "Access denied</title>",
];

/// Map an HTTP status onto a fetch failure, `None` for success.
/// 408, 429 and 5xx are transient; any other 4xx means the site refused us.
pub fn classify_status(status: u16) -> Option<FetchFailure> {
    match status {
        200..=399 => None,
        408 | 429 => Some(FetchFailure::network(format!("HTTP {status}"))),
        400..=499 => Some(FetchFailure::blocked(format!("HTTP {status}"))),
        _ => Some(FetchFailure::network(format!("HTTP {status}"))),
    }
}

/// Bot-wall / captcha interstitial instead of real content
pub fn looks_blocked(html: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|marker| html.contains(marker))
}
