//! Transactional persistence of crawled entities
//!
//! All writes are idempotent upserts so they are safe under retry and
//! under a second writer observing a partially-applied first write. Every
//! public operation commits its own transaction; callers never depend on
//! a prior call leaving one open.

pub mod schema;
pub mod sqlite;

use thiserror::Error;

pub use sqlite::CacheStore;

/// Storage-layer errors; an item's failed write is surfaced, counted and
/// never aborts a multi-item operation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Character not found: {0}")]
    CharacterNotFound(String),
}

/// Result type alias for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A tracked character row
#[derive(Debug, Clone)]
pub struct CharacterRecord {
    pub id: String,
    pub name: String,
    pub profile_url: String,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub avatar_url: Option<String>,
    pub last_profile_crawl: Option<String>,
    pub last_thread_crawl: Option<String>,
}

/// Character attributes written by a profile crawl
#[derive(Debug, Clone)]
pub struct CharacterUpsert {
    pub id: String,
    pub name: String,
    pub profile_url: String,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Thread attributes written by a thread crawl
#[derive(Debug, Clone)]
pub struct ThreadUpsert {
    pub id: String,
    pub title: String,
    pub url: String,
    pub forum_id: Option<String>,
    pub forum_name: Option<String>,
    pub category: crate::parse::Category,
    pub last_poster_id: Option<String>,
    pub last_poster_name: Option<String>,
    pub last_poster_avatar: Option<String>,
}

/// A stored thread row
#[derive(Debug, Clone)]
pub struct ThreadRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    pub forum_id: Option<String>,
    pub forum_name: Option<String>,
    pub category: String,
    pub last_poster_id: Option<String>,
    pub last_poster_name: Option<String>,
}

/// A character-thread association row
#[derive(Debug, Clone)]
pub struct LinkUpsert {
    pub character_id: String,
    pub thread_id: String,
    pub category: crate::parse::Category,
    pub is_last_poster: bool,
    pub post_count: i64,
}

/// A stored quote row
#[derive(Debug, Clone)]
pub struct QuoteRecord {
    pub character_id: String,
    pub quote_text: String,
    pub source_thread_id: Option<String>,
    pub source_thread_title: Option<String>,
}

/// One post-activity row written by dump-sync or thread crawls
#[derive(Debug, Clone)]
pub struct PostUpsert {
    pub character_id: String,
    pub thread_id: String,
    /// ISO date; rows lacking one are purged at the next process start
    pub posted_at: Option<String>,
}
