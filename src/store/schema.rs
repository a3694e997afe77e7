//! Database schema definitions
//!
//! All entity tables of the cache plus the two pieces of cross-restart
//! bookkeeping the core needs: the quote-crawl log and the crawl-state
//! key/value table.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Tracked characters, the primary entity of the cache
CREATE TABLE IF NOT EXISTS characters (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    profile_url TEXT NOT NULL,
    group_id TEXT,
    group_name TEXT,
    avatar_url TEXT,
    last_profile_crawl TEXT,
    last_thread_crawl TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Free-form profile fields, replaced wholesale on each profile crawl
CREATE TABLE IF NOT EXISTS profile_fields (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    character_id TEXT NOT NULL REFERENCES characters(id),
    field_key TEXT NOT NULL,
    field_value TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(character_id, field_key)
);

CREATE INDEX IF NOT EXISTS idx_profile_fields_character
    ON profile_fields(character_id);

-- Observed threads; category is recomputed on every observation
CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    forum_id TEXT,
    forum_name TEXT,
    category TEXT NOT NULL DEFAULT 'ongoing',
    last_poster_id TEXT,
    last_poster_name TEXT,
    last_poster_avatar TEXT,
    last_crawled TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_threads_category ON threads(category);

-- Character-thread association; upserted per crawl, never deleted
CREATE TABLE IF NOT EXISTS character_threads (
    character_id TEXT NOT NULL REFERENCES characters(id),
    thread_id TEXT NOT NULL REFERENCES threads(id),
    category TEXT NOT NULL DEFAULT 'ongoing',
    is_last_poster INTEGER NOT NULL DEFAULT 0,
    post_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (character_id, thread_id)
);

CREATE INDEX IF NOT EXISTS idx_character_threads_thread
    ON character_threads(thread_id);

-- Dialogue quotes, append-only, unique per (character, normalized text)
CREATE TABLE IF NOT EXISTS quotes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    character_id TEXT NOT NULL REFERENCES characters(id),
    quote_text TEXT NOT NULL,
    source_thread_id TEXT,
    source_thread_title TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(character_id, quote_text)
);

CREATE INDEX IF NOT EXISTS idx_quotes_character ON quotes(character_id);

-- Threads already processed by the quote crawl; cleared only by explicit reset
CREATE TABLE IF NOT EXISTS quote_crawl_log (
    thread_id TEXT PRIMARY KEY,
    crawled_at TEXT NOT NULL
);

-- Individual post activity records; dump-sync populates these with
-- authoritative dates, undated rows are purged at process start
CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    character_id TEXT NOT NULL,
    thread_id TEXT NOT NULL,
    posted_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_character_date
    ON posts(character_id, posted_at);
CREATE INDEX IF NOT EXISTS idx_posts_thread ON posts(thread_id);

-- Cross-cycle bookkeeping (config hash, dump-sync watermark)
CREATE TABLE IF NOT EXISTS crawl_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
