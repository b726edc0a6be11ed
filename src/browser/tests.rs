#[cfg(test)]
mod tests {
    use crate::browser::{check_navigation_status, classify_navigation_error, BrowserManager, BrowserSettings};
    use crate::error::FetchFailureKind;
    use crate::scrape::PageRenderer;
    use std::time::Duration;
    use url::Url;

    #[test]
    fn test_browser_settings_default() {
        let settings = BrowserSettings::default();

        assert_eq!(settings.max_pages, 4);
        assert_eq!(settings.settle_delay, Duration::from_millis(1500));
        assert!(settings.executable.is_none());
        assert!(settings.profile.randomize_user_agents);
        assert!(settings.profile.block_media);
    }

    #[test]
    fn test_navigation_error_classification() {
        assert_eq!(
            classify_navigation_error("net::ERR_NAME_NOT_RESOLVED").kind,
            FetchFailureKind::Network
        );
        assert_eq!(
            classify_navigation_error("net::ERR_CONNECTION_TIMED_OUT").kind,
            FetchFailureKind::Timeout
        );
        assert_eq!(
            classify_navigation_error("net::ERR_BLOCKED_BY_RESPONSE").kind,
            FetchFailureKind::Blocked
        );
        assert_eq!(
            classify_navigation_error("Target closed").kind,
            FetchFailureKind::RenderError
        );
    }

    #[test]
    fn test_navigation_status_follows_fetch_taxonomy() {
        assert_eq!(check_navigation_status(Some(200)).unwrap(), Some(200));
        assert_eq!(check_navigation_status(Some(301)).unwrap(), Some(301));
        assert_eq!(check_navigation_status(None).unwrap(), None);

        assert_eq!(check_navigation_status(Some(403)).unwrap_err().kind, FetchFailureKind::Blocked);
        assert_eq!(check_navigation_status(Some(404)).unwrap_err().kind, FetchFailureKind::Blocked);
        assert_eq!(check_navigation_status(Some(429)).unwrap_err().kind, FetchFailureKind::Network);
        assert_eq!(check_navigation_status(Some(502)).unwrap_err().kind, FetchFailureKind::Network);
        assert_eq!(check_navigation_status(Some(-1)).unwrap_err().kind, FetchFailureKind::RenderError);
    }

    #[test]
    fn test_settings_round_trip_through_toml() {
        let settings = BrowserSettings::default();
        let text = toml::to_string(&settings).unwrap();
        assert!(text.contains("settle_delay = \"1s 500ms\""));

        let parsed: BrowserSettings = toml::from_str(&text).unwrap();
        assert_eq!(parsed.settle_delay, settings.settle_delay);
    }

    // needs a local chromium install
    #[tokio::test]
    #[ignore]
    async fn test_render_data_url() {
        let manager = BrowserManager::launch(BrowserSettings {
            settle_delay: Duration::from_millis(100),
            ..BrowserSettings::default()
        })
        .await
        .expect("chromium should launch");

        let url = Url::parse("data:text/html,<html><body><p id=x></p><script>document.getElementById('x').textContent='rendered by script'</script></body></html>").unwrap();
        let page = manager.render(&url).await.unwrap();
        assert!(page.html.contains("rendered by script"));

        manager.shutdown().await.unwrap();
    }
}
