//! Watchtower: a forum character-cache crawler
//!
//! This crate continuously crawls a configured discussion forum, extracts
//! structured entities (character profiles, threads, dialogue quotes, member
//! lists) from rendered markup, and maintains a queryable SQLite cache of
//! that data for downstream consumers.

pub mod config;
pub mod crawl;
pub mod fetch;
pub mod parse;
pub mod sched;
pub mod store;

use thiserror::Error;

/// Main error type for watchtower operations
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("Parse error: {0}")]
    Parse(#[from] parse::ParseError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Unknown crawl type: {0}")]
    UnknownCrawlType(String),
}

/// Result type alias for watchtower operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawl::{Activity, ActivityIndicator, CrawlKind, Orchestrator};
pub use parse::{categorize, Category};
pub use sched::Tracker;
