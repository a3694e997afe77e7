//! The shared HTTP fetch client
//!
//! One instance is shared by every crawl operation. It owns the cookie
//! jar (and with it the forum session), paces outbound requests through a
//! rate limiter, bounds in-flight concurrency with a semaphore, and
//! retries cooldown responses with exponential backoff.

use crate::config::Config;
use crate::fetch::FetchError;
use crate::parse::is_board_message;
use governor::{Quota, RateLimiter};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Client;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use url::Url;

/// Cookie names that prove an authenticated forum session
const SESSION_COOKIE_MARKERS: &[&str] = &["member_id", "session_id", "pass_hash"];

/// Base delay for the exponential cooldown backoff
const BACKOFF_BASE: Duration = Duration::from_secs(2);

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Observable authentication state of the shared session
///
/// `Guest` means no bot credentials were configured; `Failed` means
/// credentials were configured but the login did not establish a verified
/// session. The two are never conflated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Guest,
    Bot,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthSlot {
    NotAttempted,
    Guest,
    Bot,
    Failed,
}

/// Outcome of one page within a concurrent batch fetch
///
/// One failing page never discards successfully fetched siblings; `Stop`
/// marks the terminal cooldown/board-message condition, distinct from an
/// error.
#[derive(Debug)]
pub enum PageOutcome {
    Page(String),
    Stop,
    Failed(FetchError),
}

/// Cookie-bearing HTTP client with pacing, retry and a shared
/// concurrency limiter
pub struct FetchClient {
    client: Client,
    jar: Arc<Jar>,
    base_url: String,
    limiter: Option<DirectRateLimiter>,
    semaphore: Arc<Semaphore>,
    max_retries: u32,
    credentials: Option<(String, String)>,
    auth: Mutex<AuthSlot>,
}

impl FetchClient {
    /// Builds the client from configuration
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (compatible; Watchtower/1.0)")
            .timeout(Duration::from_secs(config.crawler.fetch_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .cookie_provider(jar.clone())
            .gzip(true)
            .brotli(true)
            .build()?;

        let limiter = per_request_quota(config.crawler.request_delay_ms).map(RateLimiter::direct);

        let credentials = config
            .auth
            .bot_credentials()
            .map(|(u, p)| (u.to_string(), p.to_string()));
        let auth = Mutex::new(if credentials.is_some() {
            AuthSlot::NotAttempted
        } else {
            AuthSlot::Guest
        });

        Ok(Self {
            client,
            jar,
            base_url: config.forum.base_url.clone(),
            limiter,
            semaphore: Arc::new(Semaphore::new(
                config.crawler.max_concurrent_requests as usize,
            )),
            max_retries: config.crawler.max_retries,
            credentials,
            auth,
        })
    }

    /// The configured forum base URL (no trailing slash)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Current authentication state, for operator visibility
    pub async fn auth_state(&self) -> AuthState {
        match *self.auth.lock().await {
            AuthSlot::Bot => AuthState::Bot,
            AuthSlot::Failed => AuthState::Failed,
            _ => AuthState::Guest,
        }
    }

    fn absolute(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Fetches a page, retrying transient failures and cooldown responses
    /// with exponential backoff up to the configured attempt count
    pub async fn fetch(&self, path: &str) -> Result<String, FetchError> {
        let url = self.absolute(path);

        // Bound in-flight fetches process-wide; an unavailable semaphore
        // only happens at shutdown
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Timeout { url: url.clone() })?;

        self.ensure_authenticated().await;

        let mut last_err = None;
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            match self.fetch_once(&url).await {
                Ok(body) => {
                    if is_board_message(&body) {
                        tracing::debug!(
                            "Cooldown page from {} (attempt {}/{})",
                            url,
                            attempt + 1,
                            self.max_retries
                        );
                        last_err = Some(FetchError::Cooldown {
                            url: url.clone(),
                            attempts: attempt + 1,
                        });
                        continue;
                    }
                    return Ok(body);
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(
                        "Transient fetch failure for {} (attempt {}/{}): {}",
                        url,
                        attempt + 1,
                        self.max_retries,
                        e
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(FetchError::Timeout { url }))
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Http {
                    url: url.to_string(),
                    source: e,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| FetchError::Http {
            url: url.to_string(),
            source: e,
        })
    }

    /// Fetches several pages concurrently through the shared limiter,
    /// returning per-page outcomes in input order
    pub async fn fetch_many(&self, paths: &[String]) -> Vec<PageOutcome> {
        let futures = paths.iter().map(|path| async move {
            match self.fetch(path).await {
                Ok(body) => PageOutcome::Page(body),
                Err(FetchError::Cooldown { .. }) => PageOutcome::Stop,
                Err(e) => PageOutcome::Failed(e),
            }
        });
        futures::future::join_all(futures).await
    }

    /// Logs in when credentials are configured and no attempt was made yet
    ///
    /// A failed login is recorded as [`AuthState::Failed`] and the run
    /// proceeds as guest with that state visible; it is never reported as
    /// a plain guest session.
    async fn ensure_authenticated(&self) {
        let mut slot = self.auth.lock().await;
        if *slot != AuthSlot::NotAttempted {
            return;
        }

        match self.login().await {
            Ok(()) => {
                *slot = AuthSlot::Bot;
            }
            Err(e) => {
                tracing::warn!("Bot login failed, continuing as guest: {}", e);
                *slot = AuthSlot::Failed;
            }
        }
    }

    /// Performs the login form POST and verifies the session
    ///
    /// Authentication is successful only when the post-login cookie jar
    /// carries a session marker. A redirect without one is a failure.
    async fn login(&self) -> Result<(), FetchError> {
        let (username, password) = match &self.credentials {
            Some(creds) => creds,
            None => return Ok(()),
        };

        let login_url = format!("{}/index.php?act=Login&CODE=01", self.base_url);
        let form = [
            ("UserName", username.as_str()),
            ("PassWord", password.as_str()),
            ("CookieDate", "1"),
            ("Privacy", "0"),
        ];

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        self.client
            .post(&login_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| FetchError::Http {
                url: login_url.clone(),
                source: e,
            })?;

        if self.has_session_cookie() {
            tracing::info!("Authenticated as bot account '{}'", username);
            Ok(())
        } else {
            Err(FetchError::Auth {
                username: username.clone(),
            })
        }
    }

    fn has_session_cookie(&self) -> bool {
        let url = match Url::parse(&self.base_url) {
            Ok(u) => u,
            Err(_) => return false,
        };
        let header = match self.jar.cookies(&url) {
            Some(h) => h,
            None => return false,
        };
        let cookies = header.to_str().unwrap_or("");
        SESSION_COOKIE_MARKERS
            .iter()
            .any(|marker| cookies.contains(marker))
    }
}

fn per_request_quota(delay_ms: u64) -> Option<Quota> {
    if delay_ms == 0 {
        return None;
    }
    // One cell per delay window with no burst allowance, so consecutive
    // requests are actually spaced, not just averaged
    Quota::with_period(Duration::from_millis(delay_ms))
        .map(|quota| quota.allow_burst(NonZeroU32::MIN))
}

fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.saturating_pow(attempt.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, CrawlerConfig, ForumConfig, ScheduleConfig, StorageConfig};

    fn test_config() -> Config {
        Config {
            forum: ForumConfig {
                base_url: "https://rp.example.net".to_string(),
                complete_forum_id: "49".to_string(),
                incomplete_forum_id: "59".to_string(),
                comms_forum_id: "31".to_string(),
                excluded_forum_ids: vec![],
                excluded_names: vec![],
            },
            crawler: CrawlerConfig::default(),
            schedule: ScheduleConfig::default(),
            storage: StorageConfig {
                database_path: ":memory:".to_string(),
            },
            auth: AuthConfig::default(),
        }
    }

    #[test]
    fn test_client_builds() {
        assert!(FetchClient::new(&test_config()).is_ok());
    }

    #[tokio::test]
    async fn test_guest_state_without_credentials() {
        let client = FetchClient::new(&test_config()).unwrap();
        assert_eq!(client.auth_state().await, AuthState::Guest);
    }

    #[test]
    fn test_absolute_url_joining() {
        let client = FetchClient::new(&test_config()).unwrap();
        assert_eq!(
            client.absolute("/index.php?showuser=42"),
            "https://rp.example.net/index.php?showuser=42"
        );
        assert_eq!(
            client.absolute("https://other.example.net/x"),
            "https://other.example.net/x"
        );
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_zero_delay_disables_limiter() {
        assert!(per_request_quota(0).is_none());
        assert!(per_request_quota(2000).is_some());
    }
}
