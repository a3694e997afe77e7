//! SQLite cache store implementation

use crate::store::schema::initialize_schema;
use crate::store::{
    CharacterRecord, CharacterUpsert, LinkUpsert, PostUpsert, QuoteRecord, StoreResult,
    ThreadRecord, ThreadUpsert,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// SQLite-backed cache of crawled entities
pub struct CacheStore {
    conn: Connection,
}

impl CacheStore {
    /// Opens (or creates) the database at the given path
    ///
    /// Undated post rows are purged here: they are low-confidence
    /// HTML-only estimates that must not linger across restarts.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        let mut store = Self { conn };
        let purged = store.purge_undated_posts()?;
        if purged > 0 {
            tracing::info!("Purged {} undated post rows at startup", purged);
        }
        Ok(store)
    }

    /// Creates an in-memory database (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn now() -> String {
        Utc::now().to_rfc3339()
    }

    // ===== Characters =====

    /// Creates a character row if absent; idempotent
    ///
    /// The placeholder name is replaced by the first profile crawl.
    pub fn ensure_character(&mut self, id: &str, profile_url: &str) -> StoreResult<bool> {
        let now = Self::now();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO characters (id, name, profile_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![id, "Unknown", profile_url, now],
        )?;
        Ok(inserted > 0)
    }

    /// Creates or updates a character from a profile crawl
    pub fn upsert_character(&mut self, character: &CharacterUpsert) -> StoreResult<()> {
        let now = Self::now();
        self.conn.execute(
            "INSERT INTO characters
                (id, name, profile_url, group_id, group_name, avatar_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                profile_url = excluded.profile_url,
                group_id = excluded.group_id,
                group_name = excluded.group_name,
                avatar_url = excluded.avatar_url,
                updated_at = excluded.updated_at",
            params![
                character.id,
                character.name,
                character.profile_url,
                character.group_id,
                character.group_name,
                character.avatar_url,
                now
            ],
        )?;
        Ok(())
    }

    pub fn get_character(&self, id: &str) -> StoreResult<Option<CharacterRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, name, profile_url, group_id, group_name, avatar_url,
                        last_profile_crawl, last_thread_crawl
                 FROM characters WHERE id = ?1",
                params![id],
                |row| {
                    Ok(CharacterRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        profile_url: row.get(2)?,
                        group_id: row.get(3)?,
                        group_name: row.get(4)?,
                        avatar_url: row.get(5)?,
                        last_profile_crawl: row.get(6)?,
                        last_thread_crawl: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// All tracked character ids
    pub fn character_ids(&self) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM characters ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Map of character id to display name for every tracked character
    pub fn character_names(&self) -> StoreResult<HashMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM characters")?;
        let map = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<String, String>, _>>()?;
        Ok(map)
    }

    /// Replaces a character's profile fields wholesale in one transaction
    pub fn replace_profile_fields(
        &mut self,
        character_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> StoreResult<()> {
        let now = Self::now();
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM profile_fields WHERE character_id = ?1",
            params![character_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO profile_fields (character_id, field_key, field_value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (key, value) in fields {
                stmt.execute(params![character_id, key, value, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn profile_fields(&self, character_id: &str) -> StoreResult<BTreeMap<String, String>> {
        let mut stmt = self.conn.prepare(
            "SELECT field_key, field_value FROM profile_fields WHERE character_id = ?1",
        )?;
        let fields = stmt
            .query_map(params![character_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<BTreeMap<String, String>, _>>()?;
        Ok(fields)
    }

    /// Stamps the last profile-crawl time
    pub fn touch_profile_crawl(&mut self, character_id: &str) -> StoreResult<()> {
        let now = Self::now();
        self.conn.execute(
            "UPDATE characters SET last_profile_crawl = ?1, updated_at = ?1 WHERE id = ?2",
            params![now, character_id],
        )?;
        Ok(())
    }

    /// Stamps the last thread-crawl time
    pub fn touch_thread_crawl(&mut self, character_id: &str) -> StoreResult<()> {
        let now = Self::now();
        self.conn.execute(
            "UPDATE characters SET last_thread_crawl = ?1, updated_at = ?1 WHERE id = ?2",
            params![now, character_id],
        )?;
        Ok(())
    }

    // ===== Threads =====

    /// Creates or updates a thread; category is always the freshly
    /// recomputed value, never accumulated
    pub fn upsert_thread(&mut self, thread: &ThreadUpsert) -> StoreResult<()> {
        let now = Self::now();
        self.conn.execute(
            "INSERT INTO threads
                (id, title, url, forum_id, forum_name, category,
                 last_poster_id, last_poster_name, last_poster_avatar,
                 last_crawled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?10)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                url = excluded.url,
                forum_id = excluded.forum_id,
                forum_name = excluded.forum_name,
                category = excluded.category,
                last_poster_id = excluded.last_poster_id,
                last_poster_name = excluded.last_poster_name,
                last_poster_avatar = excluded.last_poster_avatar,
                last_crawled = excluded.last_crawled,
                updated_at = excluded.updated_at",
            params![
                thread.id,
                thread.title,
                thread.url,
                thread.forum_id,
                thread.forum_name,
                thread.category.to_db_string(),
                thread.last_poster_id,
                thread.last_poster_name,
                thread.last_poster_avatar,
                now
            ],
        )?;
        Ok(())
    }

    pub fn get_thread(&self, id: &str) -> StoreResult<Option<ThreadRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, title, url, forum_id, forum_name, category,
                        last_poster_id, last_poster_name
                 FROM threads WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ThreadRecord {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        url: row.get(2)?,
                        forum_id: row.get(3)?,
                        forum_name: row.get(4)?,
                        category: row.get(5)?,
                        last_poster_id: row.get(6)?,
                        last_poster_name: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Refreshes a thread's last-poster columns from authoritative dump
    /// data without touching the scraped title, avatar or category;
    /// returns whether the thread existed
    pub fn update_thread_poster(
        &mut self,
        thread_id: &str,
        last_poster_id: Option<&str>,
        last_poster_name: Option<&str>,
    ) -> StoreResult<bool> {
        let now = Self::now();
        let updated = self.conn.execute(
            "UPDATE threads SET last_poster_id = ?1, last_poster_name = ?2, updated_at = ?3
             WHERE id = ?4",
            params![last_poster_id, last_poster_name, now, thread_id],
        )?;
        Ok(updated > 0)
    }

    /// All stored thread ids
    pub fn thread_ids(&self) -> StoreResult<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM threads")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(ids)
    }

    // ===== Character-thread links =====

    /// Upserts a character-thread association; links are never deleted
    pub fn link_character_thread(&mut self, link: &LinkUpsert) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO character_threads
                (character_id, thread_id, category, is_last_poster, post_count)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(character_id, thread_id) DO UPDATE SET
                category = excluded.category,
                is_last_poster = excluded.is_last_poster,
                post_count = excluded.post_count",
            params![
                link.character_id,
                link.thread_id,
                link.category.to_db_string(),
                link.is_last_poster as i64,
                link.post_count
            ],
        )?;
        Ok(())
    }

    pub fn link_post_count(&self, character_id: &str, thread_id: &str) -> StoreResult<Option<i64>> {
        let count = self
            .conn
            .query_row(
                "SELECT post_count FROM character_threads
                 WHERE character_id = ?1 AND thread_id = ?2",
                params![character_id, thread_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count)
    }

    /// Corrects a link's post count from authoritative dump data; returns
    /// whether a link row existed
    pub fn set_link_post_count(
        &mut self,
        character_id: &str,
        thread_id: &str,
        post_count: i64,
    ) -> StoreResult<bool> {
        let updated = self.conn.execute(
            "UPDATE character_threads SET post_count = ?1
             WHERE character_id = ?2 AND thread_id = ?3",
            params![post_count, character_id, thread_id],
        )?;
        Ok(updated > 0)
    }

    /// Thread counts by category for a character
    pub fn thread_counts(&self, character_id: &str) -> StoreResult<HashMap<String, i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT category, COUNT(*) FROM character_threads
             WHERE character_id = ?1 GROUP BY category",
        )?;
        let counts = stmt
            .query_map(params![character_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<String, i64>, _>>()?;
        Ok(counts)
    }

    // ===== Quotes =====

    /// Appends a quote; a duplicate (character, text) pair is a no-op
    ///
    /// Returns true when a new row was inserted.
    pub fn add_quote(&mut self, quote: &QuoteRecord) -> StoreResult<bool> {
        let now = Self::now();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO quotes
                (character_id, quote_text, source_thread_id, source_thread_title, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                quote.character_id,
                quote.quote_text,
                quote.source_thread_id,
                quote.source_thread_title,
                now
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn quote_count(&self, character_id: &str) -> StoreResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM quotes WHERE character_id = ?1",
            params![character_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ===== Quote-crawl log =====

    pub fn is_quote_logged(&self, thread_id: &str) -> StoreResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM quote_crawl_log WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Marks a thread as quote-scraped; set once per thread per cycle
    pub fn log_quote_crawl(&mut self, thread_id: &str) -> StoreResult<()> {
        let now = Self::now();
        self.conn.execute(
            "INSERT OR IGNORE INTO quote_crawl_log (thread_id, crawled_at) VALUES (?1, ?2)",
            params![thread_id, now],
        )?;
        Ok(())
    }

    /// Clears the quote-crawl log; the only way log entries go away
    pub fn reset_quote_log(&mut self) -> StoreResult<usize> {
        let deleted = self.conn.execute("DELETE FROM quote_crawl_log", [])?;
        Ok(deleted)
    }

    /// Up to `limit` thread ids not yet quote-scraped, oldest first
    /// (limit 0 = all)
    pub fn unlogged_thread_ids(&self, limit: usize) -> StoreResult<Vec<String>> {
        let limit = if limit == 0 { -1 } else { limit as i64 };
        let mut stmt = self.conn.prepare(
            "SELECT id FROM threads
             WHERE id NOT IN (SELECT thread_id FROM quote_crawl_log)
             ORDER BY created_at ASC, id ASC
             LIMIT ?1",
        )?;
        let ids = stmt
            .query_map(params![limit], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    // ===== Posts =====

    /// Replaces a thread's post records in one transaction
    pub fn replace_thread_posts(
        &mut self,
        thread_id: &str,
        posts: &[PostUpsert],
    ) -> StoreResult<()> {
        let now = Self::now();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM posts WHERE thread_id = ?1", params![thread_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO posts (character_id, thread_id, posted_at, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for post in posts {
                stmt.execute(params![post.character_id, thread_id, post.posted_at, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Deletes post rows whose timestamp never resolved
    pub fn purge_undated_posts(&mut self) -> StoreResult<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM posts WHERE posted_at IS NULL", [])?;
        Ok(deleted)
    }

    pub fn post_count_for_thread(&self, thread_id: &str) -> StoreResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ===== Crawl state =====

    pub fn state_get(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM crawl_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn state_set(&mut self, key: &str, value: &str) -> StoreResult<()> {
        let now = Self::now();
        self.conn.execute(
            "INSERT INTO crawl_state (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }
}
