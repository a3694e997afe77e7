//! Script-executing fetch fallback
//!
//! Profile pages build their power-grid card client-side, so the plain
//! HTTP body lacks the computed values. This module drives a headless
//! browser to execute the page's scripts and returns the rendered HTML.
//! Callers fall back to the plain fetch on any failure here.

use crate::fetch::FetchError;

/// How long to wait for the page (and the awaited selector) to render
pub const RENDER_TIMEOUT_SECS: u64 = 15;

/// Fetches a page with scripts executed, waiting for `wait_selector`
/// before capturing the document
#[cfg(feature = "browser")]
pub async fn fetch_rendered(url: &str, wait_selector: &str) -> Result<String, FetchError> {
    use chromiumoxide::{Browser, BrowserConfig};
    use futures::StreamExt;
    use std::time::Duration;

    let render_err = |message: String| FetchError::Render {
        url: url.to_string(),
        message,
    };

    let config = BrowserConfig::builder()
        .arg("--no-sandbox")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .build()
        .map_err(|e| render_err(format!("browser config: {}", e)))?;

    let (mut browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| render_err(format!("launch: {}", e)))?;

    // Drive the CDP connection until the browser goes away
    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });

    let timeout = Duration::from_secs(RENDER_TIMEOUT_SECS);
    let result = async {
        let page = browser
            .new_page(url)
            .await
            .map_err(|e| render_err(format!("navigate: {}", e)))?;

        let _ = page.wait_for_navigation().await;

        // The awaited selector appears once the page scripts have run;
        // pages without it still return whatever rendered
        if let Err(e) = tokio::time::timeout(timeout, page.find_element(wait_selector)).await {
            tracing::debug!("Selector '{}' not rendered for {}: {}", wait_selector, url, e);
        }

        page.content()
            .await
            .map_err(|e| render_err(format!("content: {}", e)))
    }
    .await;

    let _ = browser.close().await;
    handler_task.abort();

    result
}

/// Built without the `browser` feature: always reports failure so callers
/// take the plain-fetch fallback
#[cfg(not(feature = "browser"))]
pub async fn fetch_rendered(url: &str, _wait_selector: &str) -> Result<String, FetchError> {
    Err(FetchError::Render {
        url: url.to_string(),
        message: "browser feature disabled".to_string(),
    })
}
