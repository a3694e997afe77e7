use crate::config::types::{Config, CrawlerConfig, ForumConfig, ScheduleConfig, StorageConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_forum_config(&config.forum)?;
    validate_crawler_config(&config.crawler)?;
    validate_schedule_config(&config.schedule)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

/// Validates the forum section
fn validate_forum_config(config: &ForumConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.base_url.ends_with('/') {
        return Err(ConfigError::Validation(
            "base-url must not have a trailing slash".to_string(),
        ));
    }

    let special = [
        ("complete-forum-id", &config.complete_forum_id),
        ("incomplete-forum-id", &config.incomplete_forum_id),
        ("comms-forum-id", &config.comms_forum_id),
    ];

    for (name, id) in &special {
        if id.is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }

    // The three special ids must be pairwise distinct or categorization
    // becomes order-dependent
    for i in 0..special.len() {
        for j in (i + 1)..special.len() {
            if special[i].1 == special[j].1 {
                return Err(ConfigError::Validation(format!(
                    "{} and {} must differ, both are '{}'",
                    special[i].0, special[j].0, special[i].1
                )));
            }
        }
    }

    Ok(())
}

/// Validates the crawler section
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_requests < 1 || config.max_concurrent_requests > 32 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-requests must be between 1 and 32, got {}",
            config.max_concurrent_requests
        )));
    }

    if config.fetch_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "fetch-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.max_retries == 0 {
        return Err(ConfigError::Validation(
            "max-retries must be >= 1".to_string(),
        ));
    }

    if config.quote_min_words == 0 {
        return Err(ConfigError::Validation(
            "quote-min-words must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates the schedule section
fn validate_schedule_config(config: &ScheduleConfig) -> Result<(), ConfigError> {
    // Any interval <= 0 just disables the job; only absurd values are rejected
    const MAX_MINUTES: i64 = 60 * 24 * 365;

    for (name, minutes) in [
        ("thread-crawl-minutes", config.thread_crawl_minutes),
        ("profile-crawl-minutes", config.profile_crawl_minutes),
        ("discovery-minutes", config.discovery_minutes),
        ("dump-sync-minutes", config.dump_sync_minutes),
    ] {
        if minutes > MAX_MINUTES {
            return Err(ConfigError::Validation(format!(
                "{} must be at most {} minutes, got {}",
                name, MAX_MINUTES, minutes
            )));
        }
    }

    Ok(())
}

/// Validates the storage section
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
