//! Administrative-export client for dump-sync
//!
//! Drives the forum's admin control panel to produce a targeted SQL dump:
//! login yields an `adsess` token, the dump is initialized and then each
//! requested table part is paged through, and finally the generated SQL
//! file is polled for and returned as text. This path is independent of
//! the HTML scraping pipelines and never runs as guest: a login that does
//! not yield a token is an authentication failure, terminal for the sync.

use crate::fetch::FetchError;
use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;

/// Export part number of the members table
pub const PART_MEMBERS: &str = "21";
/// Export part number of the topics table
pub const PART_TOPICS: &str = "23";
/// Export part number of the posts table
pub const PART_POSTS: &str = "32";

/// Table parts dump-sync requests by default
pub const DEFAULT_TABLE_PARTS: &[&str] = &[PART_MEMBERS, PART_TOPICS, PART_POSTS];

/// Safety bound on pagination pages consumed per table part
const MAX_PAGES_PER_PART: u32 = 200;

/// Increasing waits while polling for the generated SQL file
const SQL_POLL_WAITS_SECS: &[u64] = &[2, 5, 10, 15, 30];

fn adsess_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"adsess=([a-f0-9]+)").unwrap_or_else(|_| unreachable!()))
}

fn next_page_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)admin\.php\?[^'"]*act=mysql[^'"]*code=dump[^'"]*line=(\d+)[^'"]*part=(\d+)"#,
        )
        .unwrap_or_else(|_| unreachable!())
    })
}

/// Client for the admin control panel's SQL dump flow
pub struct AdminClient {
    client: Client,
    base_url: String,
    forum_name: String,
    username: String,
    password: String,
    token: Option<String>,
}

impl AdminClient {
    /// Builds the client; `base_url` is the forum base, credentials the
    /// admin account
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (compatible; Watchtower/1.0)")
            .timeout(Duration::from_secs(120))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        // The generated SQL file is named after the forum's host label
        let forum_name = url::Url::parse(base_url)
            .ok()
            .and_then(|u| {
                u.host_str()
                    .and_then(|h| h.split('.').next().map(str::to_string))
            })
            .unwrap_or_default();

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            forum_name,
            username: username.to_string(),
            password: password.to_string(),
            token: None,
        })
    }

    /// Logs in and stores the `adsess` token
    ///
    /// Surfaces [`FetchError::Auth`] when no token is granted; there is no
    /// guest mode on this surface.
    pub async fn login(&mut self) -> Result<(), FetchError> {
        let login_url = format!("{}/admin.php", self.base_url);
        let response = self
            .client
            .get(&login_url)
            .query(&[
                ("login", "yes"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Http {
                url: login_url.clone(),
                source: e,
            })?;

        // Success redirects to a URL carrying the token; some installs
        // put it in the response body instead
        let location = response
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_default();

        if let Some(caps) = adsess_re().captures(&location) {
            self.token = Some(caps[1].to_string());
            tracing::info!("Admin login succeeded");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if let Some(caps) = adsess_re().captures(&body) {
            self.token = Some(caps[1].to_string());
            tracing::info!("Admin login succeeded (token in body)");
            return Ok(());
        }

        Err(FetchError::Auth {
            username: self.username.clone(),
        })
    }

    /// Logs in if needed, then produces and returns the dump text for the
    /// given table parts
    pub async fn fetch_dump(&mut self, parts: &[&str]) -> Result<String, FetchError> {
        if self.token.is_none() {
            self.login().await?;
        }
        self.dump_tables(parts).await
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Http {
                url: url.to_string(),
                source: e,
            })?;
        response.text().await.map_err(|e| FetchError::Http {
            url: url.to_string(),
            source: e,
        })
    }

    async fn dump_tables(&self, parts: &[&str]) -> Result<String, FetchError> {
        let token = self.token.as_deref().ok_or(FetchError::Auth {
            username: self.username.clone(),
        })?;
        let base = &self.base_url;

        // Clear the previous backup; a failure here only means a stale
        // file may linger
        let clear_url = format!(
            "{}/admin.php?act=mysql&code=backup&erase=1&adsess={}",
            base, token
        );
        if let Err(e) = self.get_text(&clear_url).await {
            tracing::warn!("Backup clear failed: {}", e);
        }

        tokio::time::sleep(Duration::from_secs(1)).await;

        // Initialize the dump job
        let init_url = format!(
            "{}/admin.php?act=mysql&code=dump&step1=1&adsess={}",
            base, token
        );
        self.get_text(&init_url).await?;

        // Request each table part, following the export's own pagination
        // until the part number changes or no next link is offered
        let mut total_pages = 0u32;
        for part in parts {
            let mut line = 0u64;
            let mut current_part = part.to_string();
            let mut page_count = 0u32;

            while current_part == *part && page_count < MAX_PAGES_PER_PART {
                let page_url = format!(
                    "{}/admin.php?act=mysql&adsess={}&code=dump&line={}&part={}",
                    base, token, line, current_part
                );
                let html = match self.get_text(&page_url).await {
                    Ok(html) => html,
                    Err(e) => {
                        tracing::warn!("Dump page failed (part {}): {}", part, e);
                        break;
                    }
                };

                page_count += 1;
                total_pages += 1;

                match next_page_re().captures(&html) {
                    Some(caps) => {
                        line = caps[1].parse().unwrap_or(0);
                        current_part = caps[2].to_string();
                    }
                    None => break,
                }

                tokio::time::sleep(Duration::from_millis(300)).await;
            }

            if page_count > 1 {
                tracing::debug!("Dump part {}: {} pages", part, page_count);
            }
        }
        tracing::info!(
            "Dump requested: {} tables, {} pages",
            parts.len(),
            total_pages
        );

        // Poll for the generated SQL file
        let sql_url = format!("{}/sqls/{}-{}_.sql", base, token, self.forum_name);
        for wait in SQL_POLL_WAITS_SECS {
            tokio::time::sleep(Duration::from_secs(*wait)).await;
            match self.client.get(&sql_url).send().await {
                Ok(response) if response.status().is_success() => {
                    let text = response.text().await.unwrap_or_default();
                    if text.len() > 100 {
                        tracing::info!("SQL dump retrieved ({} bytes)", text.len());
                        return Ok(text);
                    }
                }
                Ok(response) => {
                    tracing::debug!("SQL file not ready: status {}", response.status());
                }
                Err(e) => {
                    tracing::debug!("SQL file not ready: {}", e);
                }
            }
        }

        Err(FetchError::Timeout { url: sql_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forum_name_from_base_url() {
        let client = AdminClient::new("https://shadowfen.example.net", "admin", "pw").unwrap();
        assert_eq!(client.forum_name, "shadowfen");
    }

    #[test]
    fn test_adsess_extraction() {
        let caps = adsess_re()
            .captures("https://x.net/admin.php?adsess=0123abcd&code=dump")
            .unwrap();
        assert_eq!(&caps[1], "0123abcd");
    }

    #[test]
    fn test_next_page_link_extraction() {
        let html = r#"<a href="admin.php?act=mysql&code=dump&line=500&part=32&adsess=ff00">next</a>"#;
        let caps = next_page_re().captures(html).unwrap();
        assert_eq!(&caps[1], "500");
        assert_eq!(&caps[2], "32");
    }
}
