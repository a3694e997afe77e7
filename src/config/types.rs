use serde::Deserialize;
use std::collections::HashSet;

/// Main configuration structure for watchtower
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub forum: ForumConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Target forum configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ForumConfig {
    /// Base URL of the forum (no trailing slash)
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Forum id whose threads are categorized as complete
    #[serde(rename = "complete-forum-id")]
    pub complete_forum_id: String,

    /// Forum id whose threads are categorized as incomplete
    #[serde(rename = "incomplete-forum-id")]
    pub incomplete_forum_id: String,

    /// Forum id whose threads are categorized as comms
    #[serde(rename = "comms-forum-id")]
    pub comms_forum_id: String,

    /// Forum ids that are never surfaced as threads
    #[serde(rename = "excluded-forum-ids", default)]
    pub excluded_forum_ids: Vec<String>,

    /// Member names (staff/bot accounts) skipped during discovery
    #[serde(rename = "excluded-names", default)]
    pub excluded_names: Vec<String>,
}

impl ForumConfig {
    /// Returns true if the given forum id is on the exclusion list
    pub fn is_forum_excluded(&self, forum_id: &str) -> bool {
        self.excluded_forum_ids.iter().any(|id| id == forum_id)
    }

    /// Case-insensitive set of excluded member names
    pub fn excluded_name_set(&self) -> HashSet<String> {
        self.excluded_names
            .iter()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect()
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Minimum delay between consecutive outbound requests (milliseconds)
    #[serde(rename = "request-delay-ms", default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Maximum number of concurrent in-flight requests
    #[serde(rename = "max-concurrent-requests", default = "default_max_concurrent")]
    pub max_concurrent_requests: u32,

    /// Per-request timeout (seconds)
    #[serde(rename = "fetch-timeout-secs", default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Bounded retry attempts for transient failures and cooldowns
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Minimum word count for a bold run to qualify as a quote
    #[serde(rename = "quote-min-words", default = "default_quote_min_words")]
    pub quote_min_words: usize,

    /// Threads per quote-crawl cycle (0 = all unscraped threads)
    #[serde(rename = "quote-batch-size", default = "default_quote_batch_size")]
    pub quote_batch_size: usize,

    /// Delay before acting on a webhook event, letting the origin site
    /// commit the triggering action (seconds)
    #[serde(rename = "webhook-settle-secs", default = "default_webhook_settle_secs")]
    pub webhook_settle_secs: u64,
}

fn default_request_delay_ms() -> u64 {
    2000
}

fn default_max_concurrent() -> u32 {
    5
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_quote_min_words() -> usize {
    3
}

fn default_quote_batch_size() -> usize {
    25
}

fn default_webhook_settle_secs() -> u64 {
    5
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: default_request_delay_ms(),
            max_concurrent_requests: default_max_concurrent(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_retries: default_max_retries(),
            quote_min_words: default_quote_min_words(),
            quote_batch_size: default_quote_batch_size(),
            webhook_settle_secs: default_webhook_settle_secs(),
        }
    }
}

/// Periodic job intervals in minutes; zero or negative disables a job
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(rename = "thread-crawl-minutes", default = "default_thread_crawl_minutes")]
    pub thread_crawl_minutes: i64,

    #[serde(rename = "profile-crawl-minutes", default = "default_profile_crawl_minutes")]
    pub profile_crawl_minutes: i64,

    #[serde(rename = "discovery-minutes", default = "default_discovery_minutes")]
    pub discovery_minutes: i64,

    /// Dump-sync requires admin credentials; disabled by default
    #[serde(rename = "dump-sync-minutes", default)]
    pub dump_sync_minutes: i64,
}

fn default_thread_crawl_minutes() -> i64 {
    60
}

fn default_profile_crawl_minutes() -> i64 {
    1440
}

fn default_discovery_minutes() -> i64 {
    1440
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            thread_crawl_minutes: default_thread_crawl_minutes(),
            profile_crawl_minutes: default_profile_crawl_minutes(),
            discovery_minutes: default_discovery_minutes(),
            dump_sync_minutes: 0,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Optional forum credentials
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Bot account used for authenticated page fetches
    #[serde(rename = "bot-username", default)]
    pub bot_username: Option<String>,

    #[serde(rename = "bot-password", default)]
    pub bot_password: Option<String>,

    /// Admin account used by the dump-sync pipeline
    #[serde(rename = "admin-username", default)]
    pub admin_username: Option<String>,

    #[serde(rename = "admin-password", default)]
    pub admin_password: Option<String>,
}

impl AuthConfig {
    /// Bot credentials if both parts are configured and non-empty
    pub fn bot_credentials(&self) -> Option<(&str, &str)> {
        match (self.bot_username.as_deref(), self.bot_password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }

    /// Admin credentials if both parts are configured and non-empty
    pub fn admin_credentials(&self) -> Option<(&str, &str)> {
        match (self.admin_username.as_deref(), self.admin_password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}
