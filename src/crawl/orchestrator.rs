//! Crawl orchestrator: the five crawl operations
//!
//! Each operation is a bounded pipeline over the shared fetch client, the
//! pure parsers and the cache store. Failure policy: transient fetch
//! failures are retried inside the client and then surface as per-item
//! failures; a parse failure on one item is logged and skipped; a store
//! failure fails only that item's write and is counted in the report. A
//! cancellation flag is checked between items so shutdown completes
//! within one item's latency.

use crate::config::Config;
use crate::crawl::{ActivityIndicator, CrawlKind, SingleFlight};
use crate::fetch::admin::DEFAULT_TABLE_PARTS;
use crate::fetch::{render, AdminClient, FetchClient, PageOutcome};
use crate::parse::member::MEMBER_PAGE_SIZE;
use crate::parse::thread::{LastPoster, PostRecord, THREAD_PAGE_SIZE};
use crate::parse::{self, categorize, Category, MemberRow, SearchHit};
use crate::store::{
    CacheStore, CharacterUpsert, LinkUpsert, PostUpsert, QuoteRecord, ThreadUpsert,
};
use crate::{ConfigError, Result};
use chrono::{NaiveDate, Utc};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Selector the rendered fetch waits for on profile pages; it appears
/// once the power-grid card has been built client-side
const PROFILE_STAT_SELECTOR: &str = ".profile-stat";

/// Crawl-state key holding the dump-sync watermark
const DUMP_SYNC_WATERMARK_KEY: &str = "last_dump_sync";

/// Summary counts of one crawl operation
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub characters: usize,
    pub threads: usize,
    pub quotes_added: usize,
    pub registered: usize,
    pub already_tracked: usize,
    pub skipped: usize,
    pub posts_synced: usize,
    pub fetch_failures: usize,
    pub parse_failures: usize,
    pub store_failures: usize,
}

impl CrawlReport {
    fn merge(&mut self, other: &CrawlReport) {
        self.characters += other.characters;
        self.threads += other.threads;
        self.quotes_added += other.quotes_added;
        self.registered += other.registered;
        self.already_tracked += other.already_tracked;
        self.skipped += other.skipped;
        self.posts_synced += other.posts_synced;
        self.fetch_failures += other.fetch_failures;
        self.parse_failures += other.parse_failures;
        self.store_failures += other.store_failures;
    }

    /// True when any per-item write was lost
    pub fn has_failures(&self) -> bool {
        self.fetch_failures > 0 || self.parse_failures > 0 || self.store_failures > 0
    }
}

/// Everything learned about one thread before the store-write phase
struct ThreadOutcome {
    hit: SearchHit,
    category: Category,
    last_poster: Option<LastPoster>,
    last_poster_avatar: Option<String>,
    author_ids: HashSet<String>,
    post_records: Vec<PostRecord>,
    post_counts: HashMap<String, i64>,
    quotes_by_character: HashMap<String, Vec<String>>,
    quotes_extracted: bool,
    fetch_failures: usize,
}

enum ThreadResult {
    Done(Box<ThreadOutcome>),
    FetchFailed,
    Cancelled,
}

/// Pages of one thread plus which page the last poster is read from
struct ThreadPages {
    pages: Vec<String>,
    poster_index: usize,
    fetch_failures: usize,
}

/// Pure analysis over a thread's fetched pages
struct ThreadAnalysis {
    last_poster: Option<LastPoster>,
    author_ids: HashSet<String>,
    post_records: Vec<PostRecord>,
    post_counts: HashMap<String, i64>,
    quotes_by_character: HashMap<String, Vec<String>>,
}

/// Composes fetch client, parsers and store into crawl operations
pub struct Orchestrator {
    config: Arc<Config>,
    client: Arc<FetchClient>,
    store: Arc<Mutex<CacheStore>>,
    activity: ActivityIndicator,
    cancel: Arc<AtomicBool>,
    render_disabled: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        client: Arc<FetchClient>,
        store: Arc<Mutex<CacheStore>>,
        activity: ActivityIndicator,
    ) -> Self {
        Self {
            config,
            client,
            store,
            activity,
            cancel: Arc::new(AtomicBool::new(false)),
            render_disabled: AtomicBool::new(false),
        }
    }

    /// The flag a shutdown handler sets to stop crawls between items
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// The activity cell collaborators read
    pub fn activity(&self) -> &ActivityIndicator {
        &self.activity
    }

    // ===== URL builders =====

    fn profile_url(&self, character_id: &str) -> String {
        format!(
            "{}/index.php?showuser={}",
            self.client.base_url(),
            character_id
        )
    }

    fn search_url(&self, character_id: &str) -> String {
        format!(
            "{}/index.php?act=Search&CODE=getalluser&mid={}&type=posts",
            self.client.base_url(),
            character_id
        )
    }

    fn thread_url(&self, thread_id: &str) -> String {
        format!(
            "{}/index.php?showtopic={}",
            self.client.base_url(),
            thread_id
        )
    }

    fn member_list_url(&self) -> String {
        format!(
            "{}/index.php?act=Members&max_results={}",
            self.client.base_url(),
            MEMBER_PAGE_SIZE
        )
    }

    // ===== Operation dispatch =====

    /// Runs one crawl operation to completion
    ///
    /// For profile and thread crawls, a missing character id means "all
    /// tracked characters".
    pub async fn run(&self, kind: CrawlKind, character_id: Option<&str>) -> Result<CrawlReport> {
        let result = match (kind, character_id) {
            (CrawlKind::Profile, Some(id)) => self.crawl_profile(id).await,
            (CrawlKind::Threads, Some(id)) => self.crawl_threads(id).await,
            (CrawlKind::Profile, None) | (CrawlKind::Threads, None) => self.crawl_all(kind).await,
            (CrawlKind::Quotes, _) => {
                self.crawl_quotes(self.config.crawler.quote_batch_size).await
            }
            (CrawlKind::Discovery, _) => self.discover().await,
            (CrawlKind::DumpSync, _) => self.sync_dump().await,
        };
        self.activity.clear();
        result
    }

    /// Creates a character row if absent; idempotent
    pub async fn register(&self, character_id: &str) -> Result<bool> {
        let mut store = self.store.lock().await;
        Ok(store.ensure_character(character_id, &self.profile_url(character_id))?)
    }

    async fn crawl_all(&self, kind: CrawlKind) -> Result<CrawlReport> {
        let ids = { self.store.lock().await.character_ids()? };
        tracing::info!("Running {} crawl for {} characters", kind, ids.len());

        let mut report = CrawlReport::default();
        for id in ids {
            if self.cancelled() {
                tracing::info!("Cancellation requested, stopping {} crawl", kind);
                break;
            }
            let result = match kind {
                CrawlKind::Profile => self.crawl_profile(&id).await,
                CrawlKind::Threads => self.crawl_threads(&id).await,
                other => {
                    tracing::error!("{} crawl has no per-character form", other);
                    break;
                }
            };
            match result {
                Ok(r) => report.merge(&r),
                Err(e) => {
                    tracing::error!("{} crawl failed for character {}: {}", kind, id, e);
                    report.fetch_failures += 1;
                }
            }
        }
        Ok(report)
    }

    // ===== Profile crawl =====

    /// Fetches and stores one character's profile, fields and power grid
    pub async fn crawl_profile(&self, character_id: &str) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();
        let profile_url = self.profile_url(character_id);

        self.activity.set(
            CrawlKind::Profile,
            format!("Crawling profile #{}", character_id),
            Some(character_id),
            None,
        );
        tracing::info!("Starting profile crawl for character {}", character_id);

        let html = self.fetch_profile_page(&profile_url).await?;
        let profile = parse::profile::parse_profile(&html, character_id)?;

        self.activity.set(
            CrawlKind::Profile,
            format!("Crawling profile for {}", profile.name),
            Some(character_id),
            Some(&profile.name),
        );

        let field_count = profile.fields.len();
        {
            let mut store = self.store.lock().await;
            store.upsert_character(&CharacterUpsert {
                id: profile.character_id.clone(),
                name: profile.name.clone(),
                profile_url,
                group_id: profile.group_id.clone(),
                group_name: profile.group_name.clone(),
                avatar_url: profile.avatar_url.clone(),
            })?;
            store.replace_profile_fields(character_id, &profile.fields)?;
            store.touch_profile_crawl(character_id)?;
        }

        report.characters = 1;
        tracing::info!(
            "Profile crawl complete for {}: {} fields",
            profile.name,
            field_count
        );
        Ok(report)
    }

    /// Rendered fetch with plain-HTTP fallback
    ///
    /// Profile power grids are computed client-side, so the rendered mode
    /// is preferred; any rendering failure falls back to the plain fetch,
    /// and an environment without a usable browser stops being probed
    /// after the first launch failure.
    async fn fetch_profile_page(&self, url: &str) -> Result<String> {
        if !self.render_disabled.load(Ordering::Relaxed) {
            match render::fetch_rendered(url, PROFILE_STAT_SELECTOR).await {
                Ok(html) => return Ok(html),
                Err(e) => {
                    tracing::warn!("Rendered fetch failed, using plain fetch: {}", e);
                    let message = e.to_string();
                    if message.contains("launch") || message.contains("browser") {
                        self.render_disabled.store(true, Ordering::Relaxed);
                    }
                }
            }
        }
        Ok(self.client.fetch(url).await?)
    }

    // ===== Thread crawl =====

    /// Crawls every thread a character has posted in via the forum search
    pub async fn crawl_threads(&self, character_id: &str) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();
        let base = self.client.base_url().to_string();

        let (character_name, tracked) = {
            let mut store = self.store.lock().await;
            store.ensure_character(character_id, &self.profile_url(character_id))?;
            let names = store.character_names()?;
            let name = names
                .get(character_id)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string());
            (name, names)
        };

        self.activity.set(
            CrawlKind::Threads,
            format!("Crawling threads for {}", character_name),
            Some(character_id),
            Some(&character_name),
        );
        tracing::info!(
            "Starting thread crawl for {} ({})",
            character_name,
            character_id
        );

        // Search for all posts by the character, following the
        // interstitial redirect when one is returned
        let mut html = self.client.fetch(&self.search_url(character_id)).await?;
        if let Some(redirect) = parse::search::parse_search_redirect(&html, &base) {
            tracing::debug!("Following search redirect");
            html = self.client.fetch(&redirect).await?;
        }

        let first = parse::search::parse_search_results(&html, &base, &self.config.forum);
        let mut hits = first.hits;
        let mut seen: HashSet<String> = hits.iter().map(|h| h.thread_id.clone()).collect();

        if !first.page_urls.is_empty() {
            for outcome in self.client.fetch_many(&first.page_urls).await {
                match outcome {
                    PageOutcome::Page(page_html) => {
                        let page =
                            parse::search::parse_search_results(&page_html, &base, &self.config.forum);
                        for hit in page.hits {
                            if seen.insert(hit.thread_id.clone()) {
                                hits.push(hit);
                            }
                        }
                    }
                    PageOutcome::Stop => {
                        tracing::warn!(
                            "Search pagination hit a cooldown page; keeping pages already fetched"
                        );
                        report.fetch_failures += 1;
                    }
                    PageOutcome::Failed(e) => {
                        tracing::warn!("Search result page failed: {}", e);
                        report.fetch_failures += 1;
                    }
                }
            }
        }

        tracing::info!("Found {} threads for {}", hits.len(), character_name);
        self.activity.set(
            CrawlKind::Threads,
            format!(
                "Crawling threads for {} ({} threads found)",
                character_name,
                hits.len()
            ),
            Some(character_id),
            Some(&character_name),
        );

        // Which of these threads still need quote extraction
        let needs_quotes: HashSet<String> = {
            let store = self.store.lock().await;
            hits.iter()
                .filter(|hit| !store.is_quote_logged(&hit.thread_id).unwrap_or(true))
                .map(|hit| hit.thread_id.clone())
                .collect()
        };

        let avatars: SingleFlight<String, Option<String>> = SingleFlight::new();
        let today = Utc::now().date_naive();
        let concurrency = self.config.crawler.max_concurrent_requests as usize;

        let results: Vec<ThreadResult> = futures::stream::iter(hits.into_iter().map(|hit| {
            let avatars = avatars.clone();
            let extract_quotes = needs_quotes.contains(&hit.thread_id);
            let tracked = &tracked;
            async move {
                if self.cancelled() {
                    return ThreadResult::Cancelled;
                }
                self.process_thread(hit, tracked, &avatars, extract_quotes, today)
                    .await
            }
        }))
        .buffer_unordered(concurrency)
        .collect()
        .await;

        // Store-write phase; each item's write failure is counted, never
        // propagated
        {
            let mut store = self.store.lock().await;
            for result in results {
                let outcome = match result {
                    ThreadResult::Done(outcome) => outcome,
                    ThreadResult::FetchFailed => {
                        report.fetch_failures += 1;
                        continue;
                    }
                    ThreadResult::Cancelled => {
                        report.skipped += 1;
                        continue;
                    }
                };
                report.fetch_failures += outcome.fetch_failures;
                self.persist_thread_outcome(
                    &mut store,
                    &outcome,
                    character_id,
                    &character_name,
                    &tracked,
                    &mut report,
                );
            }
            store.touch_thread_crawl(character_id)?;
        }

        tracing::info!(
            "Thread crawl complete for {}: {} threads, {} quotes added",
            character_name,
            report.threads,
            report.quotes_added
        );
        Ok(report)
    }

    /// Fetches and analyzes one thread; never fails the whole operation
    async fn process_thread(
        &self,
        hit: SearchHit,
        tracked: &HashMap<String, String>,
        avatars: &SingleFlight<String, Option<String>>,
        extract_quotes: bool,
        today: NaiveDate,
    ) -> ThreadResult {
        let category = match categorize(hit.forum_id.as_deref(), &self.config.forum) {
            Some(category) => category,
            // Excluded forums are dropped by the search parser already
            None => return ThreadResult::Cancelled,
        };

        let first_html = match self.client.fetch(&hit.url).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("Failed to fetch thread {}: {}", hit.thread_id, e);
                return ThreadResult::FetchFailed;
            }
        };

        let pages = self.fetch_thread_pages(&hit.url, first_html).await;
        let analysis = analyze_thread_pages(
            &pages,
            tracked,
            extract_quotes,
            self.config.crawler.quote_min_words,
            today,
        );

        let last_poster_avatar = match &analysis.last_poster {
            Some(LastPoster {
                user_id: Some(user_id),
                ..
            }) => {
                let url = self.profile_url(user_id);
                let client = self.client.clone();
                avatars
                    .get_or_fetch(user_id.clone(), || async move {
                        match client.fetch(&url).await {
                            Ok(html) => parse::profile::parse_avatar(&html),
                            Err(e) => {
                                tracing::debug!("Avatar fetch failed: {}", e);
                                None
                            }
                        }
                    })
                    .await
            }
            _ => None,
        };

        ThreadResult::Done(Box::new(ThreadOutcome {
            hit,
            category,
            last_poster: analysis.last_poster,
            last_poster_avatar,
            author_ids: analysis.author_ids,
            post_records: analysis.post_records,
            post_counts: analysis.post_counts,
            quotes_by_character: analysis.quotes_by_character,
            quotes_extracted: extract_quotes,
            fetch_failures: pages.fetch_failures,
        }))
    }

    /// Resolves a thread's remaining pages; the poster page is the final
    /// pagination offset, falling back to the latest page that fetched
    async fn fetch_thread_pages(&self, thread_url: &str, first_html: String) -> ThreadPages {
        let max_offset = parse::thread::parse_thread_pagination(&first_html);
        let mut pages = vec![first_html];
        let mut fetch_failures = 0;
        let mut poster_index = 0;

        if max_offset > 0 {
            let sep = if thread_url.contains('?') { '&' } else { '?' };
            let urls: Vec<String> = (1..=max_offset / THREAD_PAGE_SIZE)
                .map(|n| format!("{}{}st={}", thread_url, sep, n * THREAD_PAGE_SIZE))
                .collect();

            let outcomes = self.client.fetch_many(&urls).await;
            let final_index = outcomes.len().saturating_sub(1);
            for (i, outcome) in outcomes.into_iter().enumerate() {
                match outcome {
                    PageOutcome::Page(html) => {
                        pages.push(html);
                        if i == final_index {
                            poster_index = pages.len() - 1;
                        }
                    }
                    PageOutcome::Stop | PageOutcome::Failed(_) => {
                        fetch_failures += 1;
                    }
                }
            }
            if poster_index == 0 {
                poster_index = pages.len() - 1;
            }
        }

        ThreadPages {
            pages,
            poster_index,
            fetch_failures,
        }
    }

    /// Writes one analyzed thread to the store, counting per-item failures
    fn persist_thread_outcome(
        &self,
        store: &mut CacheStore,
        outcome: &ThreadOutcome,
        character_id: &str,
        character_name: &str,
        tracked: &HashMap<String, String>,
        report: &mut CrawlReport,
    ) {
        let thread_id = &outcome.hit.thread_id;

        let upsert = ThreadUpsert {
            id: thread_id.clone(),
            title: outcome.hit.title.clone(),
            url: outcome.hit.url.clone(),
            forum_id: outcome.hit.forum_id.clone(),
            forum_name: outcome.hit.forum_name.clone(),
            category: outcome.category,
            last_poster_id: outcome
                .last_poster
                .as_ref()
                .and_then(|p| p.user_id.clone()),
            last_poster_name: outcome.last_poster.as_ref().map(|p| p.name.clone()),
            last_poster_avatar: outcome.last_poster_avatar.clone(),
        };
        if let Err(e) = store.upsert_thread(&upsert) {
            tracing::error!("Failed to store thread {}: {}", thread_id, e);
            report.store_failures += 1;
            return;
        }

        let is_last = poster_matches(outcome.last_poster.as_ref(), character_id, character_name);
        let link = LinkUpsert {
            character_id: character_id.to_string(),
            thread_id: thread_id.clone(),
            category: outcome.category,
            is_last_poster: is_last,
            post_count: outcome.post_counts.get(character_id).copied().unwrap_or(0),
        };
        if let Err(e) = store.link_character_thread(&link) {
            tracing::error!("Failed to link {} to thread {}: {}", character_id, thread_id, e);
            report.store_failures += 1;
        }

        // Threads already fetched carry every tracked author's presence;
        // linking them now saves each a full search crawl later
        for author_id in &outcome.author_ids {
            if author_id == character_id || !tracked.contains_key(author_id) {
                continue;
            }
            let author_is_last = outcome
                .last_poster
                .as_ref()
                .and_then(|p| p.user_id.as_deref())
                == Some(author_id.as_str());
            let link = LinkUpsert {
                character_id: author_id.clone(),
                thread_id: thread_id.clone(),
                category: outcome.category,
                is_last_poster: author_is_last,
                post_count: outcome.post_counts.get(author_id).copied().unwrap_or(0),
            };
            if let Err(e) = store.link_character_thread(&link) {
                tracing::error!("Failed to link {} to thread {}: {}", author_id, thread_id, e);
                report.store_failures += 1;
            }
        }

        if !outcome.post_records.is_empty() {
            let posts: Vec<PostUpsert> = outcome
                .post_records
                .iter()
                .map(|record| PostUpsert {
                    character_id: record.character_id.clone(),
                    thread_id: thread_id.clone(),
                    posted_at: record.posted_at.clone(),
                })
                .collect();
            if let Err(e) = store.replace_thread_posts(thread_id, &posts) {
                tracing::error!("Failed to store posts for thread {}: {}", thread_id, e);
                report.store_failures += 1;
            }
        }

        for (quote_character, quotes) in &outcome.quotes_by_character {
            for text in quotes {
                let record = QuoteRecord {
                    character_id: quote_character.clone(),
                    quote_text: text.clone(),
                    source_thread_id: Some(thread_id.clone()),
                    source_thread_title: Some(outcome.hit.title.clone()),
                };
                match store.add_quote(&record) {
                    Ok(true) => report.quotes_added += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!("Failed to store quote: {}", e);
                        report.store_failures += 1;
                    }
                }
            }
        }

        if outcome.quotes_extracted {
            if let Err(e) = store.log_quote_crawl(thread_id) {
                tracing::error!("Failed to log quote crawl for {}: {}", thread_id, e);
                report.store_failures += 1;
            }
        }

        report.threads += 1;
    }

    // ===== Targeted single-thread re-crawl =====

    /// Re-crawls one thread without a search pass; used by webhook events
    pub async fn recrawl_thread(
        &self,
        thread_id: &str,
        forum_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();
        let url = self.thread_url(thread_id);

        self.activity.set(
            CrawlKind::Threads,
            format!("Targeted crawl: thread {}", thread_id),
            user_id,
            None,
        );
        tracing::info!("Targeted crawl for thread {}", thread_id);

        let first_html = self.client.fetch(&url).await?;

        let title = parse::thread::parse_thread_title(&first_html)
            .unwrap_or_else(|| "Unknown Thread".to_string());
        let (page_forum_id, forum_name) = parse::thread::parse_thread_forum(&first_html);
        let forum_id = forum_id.map(str::to_string).or(page_forum_id);

        let category = match categorize(forum_id.as_deref(), &self.config.forum) {
            Some(category) => category,
            None => {
                tracing::info!("Thread {} is in an excluded forum, skipping", thread_id);
                self.activity.clear();
                return Ok(report);
            }
        };

        let (tracked, extract_quotes) = {
            let store = self.store.lock().await;
            let tracked = store.character_names()?;
            let extract_quotes = !store.is_quote_logged(thread_id)?;
            (tracked, extract_quotes)
        };

        let pages = self.fetch_thread_pages(&url, first_html).await;
        report.fetch_failures += pages.fetch_failures;
        let analysis = analyze_thread_pages(
            &pages,
            &tracked,
            extract_quotes,
            self.config.crawler.quote_min_words,
            Utc::now().date_naive(),
        );

        let avatars: SingleFlight<String, Option<String>> = SingleFlight::new();
        let outcome = ThreadOutcome {
            hit: SearchHit {
                thread_id: thread_id.to_string(),
                title,
                url,
                forum_id,
                forum_name,
            },
            category,
            last_poster_avatar: match &analysis.last_poster {
                Some(LastPoster {
                    user_id: Some(poster_id),
                    ..
                }) => {
                    let profile_url = self.profile_url(poster_id);
                    let client = self.client.clone();
                    avatars
                        .get_or_fetch(poster_id.clone(), || async move {
                            match client.fetch(&profile_url).await {
                                Ok(html) => parse::profile::parse_avatar(&html),
                                Err(_) => None,
                            }
                        })
                        .await
                }
                _ => None,
            },
            last_poster: analysis.last_poster,
            author_ids: analysis.author_ids,
            post_records: analysis.post_records,
            post_counts: analysis.post_counts,
            quotes_by_character: analysis.quotes_by_character,
            quotes_extracted: extract_quotes,
            fetch_failures: 0,
        };

        let crawling_for = user_id.unwrap_or("");
        let crawling_name = tracked.get(crawling_for).cloned().unwrap_or_default();
        {
            let mut store = self.store.lock().await;
            // Without a requesting character, persist for tracked authors only
            if user_id.is_some() && tracked.contains_key(crawling_for) {
                self.persist_thread_outcome(
                    &mut store,
                    &outcome,
                    crawling_for,
                    &crawling_name,
                    &tracked,
                    &mut report,
                );
            } else if let Some(first_author) = outcome
                .author_ids
                .iter()
                .find(|id| tracked.contains_key(*id))
            {
                let name = tracked.get(first_author).cloned().unwrap_or_default();
                let author = first_author.clone();
                self.persist_thread_outcome(&mut store, &outcome, &author, &name, &tracked, &mut report);
            } else {
                tracing::info!("Thread {} has no tracked authors, nothing to link", thread_id);
            }
        }

        self.activity.clear();
        tracing::info!(
            "Targeted crawl complete for thread {}: {} quotes added",
            thread_id,
            report.quotes_added
        );
        Ok(report)
    }

    // ===== Quote crawl =====

    /// Extracts quotes from up to `batch` not-yet-scraped threads
    async fn crawl_quotes(&self, batch: usize) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();

        let (thread_ids, tracked) = {
            let store = self.store.lock().await;
            (store.unlogged_thread_ids(batch)?, store.character_names()?)
        };
        tracing::info!("Quote crawl: {} unscraped threads queued", thread_ids.len());

        let today = Utc::now().date_naive();
        for thread_id in thread_ids {
            if self.cancelled() {
                tracing::info!("Cancellation requested, stopping quote crawl");
                break;
            }

            let thread = {
                let store = self.store.lock().await;
                store.get_thread(&thread_id)?
            };
            let thread = match thread {
                Some(thread) => thread,
                None => continue,
            };

            self.activity.set(
                CrawlKind::Quotes,
                format!("Extracting quotes: {}", thread.title),
                None,
                None,
            );

            let first_html = match self.client.fetch(&thread.url).await {
                Ok(html) => html,
                Err(e) => {
                    // Not logged, so the thread is retried next cycle
                    tracing::warn!("Failed to fetch thread {} for quotes: {}", thread_id, e);
                    report.fetch_failures += 1;
                    continue;
                }
            };

            let pages = self.fetch_thread_pages(&thread.url, first_html).await;
            report.fetch_failures += pages.fetch_failures;
            let analysis = analyze_thread_pages(
                &pages,
                &tracked,
                true,
                self.config.crawler.quote_min_words,
                today,
            );

            let mut store = self.store.lock().await;
            for (character_id, quotes) in &analysis.quotes_by_character {
                for text in quotes {
                    let record = QuoteRecord {
                        character_id: character_id.clone(),
                        quote_text: text.clone(),
                        source_thread_id: Some(thread_id.clone()),
                        source_thread_title: Some(thread.title.clone()),
                    };
                    match store.add_quote(&record) {
                        Ok(true) => report.quotes_added += 1,
                        Ok(false) => {}
                        Err(e) => {
                            tracing::error!("Failed to store quote: {}", e);
                            report.store_failures += 1;
                        }
                    }
                }
            }

            // Finding no quotes is a valid terminal state; the thread is
            // logged either way so it is not re-scraped every cycle
            if let Err(e) = store.log_quote_crawl(&thread_id) {
                tracing::error!("Failed to log quote crawl for {}: {}", thread_id, e);
                report.store_failures += 1;
            }
            report.threads += 1;
        }

        tracing::info!(
            "Quote crawl complete: {} threads, {} quotes added",
            report.threads,
            report.quotes_added
        );
        Ok(report)
    }

    // ===== Discovery crawl =====

    /// Walks the member list end-to-end, registering unknown members
    async fn discover(&self) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();

        self.activity
            .set(CrawlKind::Discovery, "Discovering characters", None, None);
        tracing::info!("Starting discovery via member list");

        let excluded = self.config.forum.excluded_name_set();
        let mut existing: HashSet<String> = {
            let store = self.store.lock().await;
            store.character_ids()?.into_iter().collect()
        };

        let list_url = self.member_list_url();
        let first_html = self.client.fetch(&list_url).await?;
        let max_offset = parse::member::parse_member_list_pagination(&first_html);
        let total_pages = max_offset / MEMBER_PAGE_SIZE + 1;
        tracing::info!("Member list has {} pages", total_pages);

        let mut first_html = Some(first_html);
        'pages: for page in 0..total_pages {
            if self.cancelled() {
                break;
            }

            self.activity.set(
                CrawlKind::Discovery,
                format!("Discovering characters (page {}/{})", page + 1, total_pages),
                None,
                None,
            );

            let html = match first_html.take() {
                Some(html) => html,
                None => {
                    let url = format!("{}&st={}", list_url, page * MEMBER_PAGE_SIZE);
                    match self.client.fetch(&url).await {
                        Ok(html) => html,
                        Err(e) => {
                            tracing::warn!("Member list page {} failed: {}", page + 1, e);
                            report.fetch_failures += 1;
                            continue;
                        }
                    }
                }
            };

            for member in parse::member::parse_member_list(&html) {
                if self.cancelled() {
                    break 'pages;
                }
                if excluded.contains(&member.name.to_lowercase()) {
                    report.skipped += 1;
                    continue;
                }
                if existing.contains(&member.member_id) {
                    report.already_tracked += 1;
                    continue;
                }

                // Individual member failures are logged and skipped; the
                // walk continues
                match self.register_member(&member).await {
                    Ok(()) => {
                        existing.insert(member.member_id.clone());
                        report.registered += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Could not register member {} ({}): {}",
                            member.name,
                            member.member_id,
                            e
                        );
                        report.skipped += 1;
                    }
                }
            }
        }

        tracing::info!(
            "Discovery complete: {} new, {} already tracked, {} skipped",
            report.registered,
            report.already_tracked,
            report.skipped
        );
        Ok(report)
    }

    /// Fetches a discovered member's profile and stores the character
    async fn register_member(&self, member: &MemberRow) -> Result<()> {
        let profile_url = self.profile_url(&member.member_id);
        let html = self.client.fetch(&profile_url).await?;
        let profile = parse::profile::parse_profile(&html, &member.member_id)?;

        tracing::info!("Discovered {} (id {})", profile.name, member.member_id);
        self.activity.set(
            CrawlKind::Discovery,
            format!("Discovered {}", profile.name),
            Some(&member.member_id),
            Some(&profile.name),
        );

        let mut store = self.store.lock().await;
        store.upsert_character(&CharacterUpsert {
            id: profile.character_id.clone(),
            name: profile.name.clone(),
            profile_url,
            group_id: profile.group_id.clone(),
            group_name: profile.group_name.clone(),
            avatar_url: profile.avatar_url.clone(),
        })?;
        store.replace_profile_fields(&member.member_id, &profile.fields)?;
        store.touch_profile_crawl(&member.member_id)?;
        Ok(())
    }

    // ===== Dump-sync crawl =====

    /// Reconciles post activity from the administrative export
    ///
    /// This pipeline never runs as guest: a failed admin login is
    /// terminal for the sync run.
    async fn sync_dump(&self) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();

        let (username, password) = self.config.auth.admin_credentials().ok_or_else(|| {
            ConfigError::Validation("dump-sync requires admin credentials".to_string())
        })?;

        self.activity.set(
            CrawlKind::DumpSync,
            "Syncing from administrative export",
            None,
            None,
        );
        tracing::info!("Starting dump-sync");

        let mut admin = AdminClient::new(self.client.base_url(), username, password)?;
        let sql = admin.fetch_dump(DEFAULT_TABLE_PARTS).await?;

        let tables = parse::dump::parse_dump(&sql);
        let posts = parse::dump::extract_posts(&tables);
        let topics = parse::dump::extract_topics(&tables);
        tracing::info!(
            "Dump parsed: {} posts, {} topics",
            posts.len(),
            topics.len()
        );

        let mut store = self.store.lock().await;
        let tracked_characters: HashSet<String> =
            store.character_ids()?.into_iter().collect();
        let tracked_threads = store.thread_ids()?;

        // Authoritative last-poster refresh for threads already cached
        for topic in &topics {
            if !tracked_threads.contains(&topic.thread_id) {
                continue;
            }
            if let Err(e) = store.update_thread_poster(
                &topic.thread_id,
                topic.last_poster_id.as_deref(),
                topic.last_poster_name.as_deref(),
            ) {
                tracing::error!("Failed to refresh thread {}: {}", topic.thread_id, e);
                report.store_failures += 1;
            }
        }

        // Keep only posts joining a tracked character to a tracked thread
        let mut by_thread: HashMap<String, Vec<PostUpsert>> = HashMap::new();
        let mut link_counts: HashMap<(String, String), i64> = HashMap::new();
        for post in &posts {
            let thread_id = match &post.thread_id {
                Some(id) if tracked_threads.contains(id) => id.clone(),
                _ => continue,
            };
            if !tracked_characters.contains(&post.character_id) {
                continue;
            }

            by_thread.entry(thread_id.clone()).or_default().push(PostUpsert {
                character_id: post.character_id.clone(),
                thread_id: thread_id.clone(),
                posted_at: post.posted_at.clone(),
            });
            *link_counts
                .entry((post.character_id.clone(), thread_id))
                .or_default() += 1;
        }

        for (thread_id, thread_posts) in &by_thread {
            match store.replace_thread_posts(thread_id, thread_posts) {
                Ok(()) => {
                    report.threads += 1;
                    report.posts_synced += thread_posts.len();
                }
                Err(e) => {
                    tracing::error!("Failed to sync posts for thread {}: {}", thread_id, e);
                    report.store_failures += 1;
                }
            }
        }

        for ((character_id, thread_id), count) in &link_counts {
            if let Err(e) = store.set_link_post_count(character_id, thread_id, *count) {
                tracing::error!(
                    "Failed to update post count for {} in {}: {}",
                    character_id,
                    thread_id,
                    e
                );
                report.store_failures += 1;
            }
        }

        store.state_set(DUMP_SYNC_WATERMARK_KEY, &Utc::now().to_rfc3339())?;

        tracing::info!(
            "Dump-sync complete: {} posts across {} threads",
            report.posts_synced,
            report.threads
        );
        Ok(report)
    }
}

/// True when the last poster is the given character, matched by id first
/// and display name second
fn poster_matches(poster: Option<&LastPoster>, character_id: &str, character_name: &str) -> bool {
    match poster {
        Some(poster) => match &poster.user_id {
            Some(user_id) => user_id == character_id,
            None => poster.name.eq_ignore_ascii_case(character_name),
        },
        None => false,
    }
}

/// Pure analysis over a thread's fetched pages: last poster, authors,
/// post records and per-character quotes
fn analyze_thread_pages(
    pages: &ThreadPages,
    tracked: &HashMap<String, String>,
    extract_quotes: bool,
    quote_min_words: usize,
    today: NaiveDate,
) -> ThreadAnalysis {
    let poster_page = &pages.pages[pages.poster_index];
    let last_poster = parse::thread::parse_last_poster(poster_page);

    let mut author_ids = HashSet::new();
    let mut post_records = Vec::new();
    for page in &pages.pages {
        author_ids.extend(parse::thread::extract_thread_authors(page));
        post_records.extend(parse::thread::extract_post_records(page, today));
    }

    let mut post_counts: HashMap<String, i64> = HashMap::new();
    for record in &post_records {
        *post_counts.entry(record.character_id.clone()).or_default() += 1;
    }

    let mut quotes_by_character: HashMap<String, Vec<String>> = HashMap::new();
    if extract_quotes {
        for (character_id, name) in tracked {
            let mut quotes = Vec::new();
            for page in &pages.pages {
                quotes.extend(parse::quote::extract_quotes(page, name, quote_min_words));
            }
            if !quotes.is_empty() {
                quotes_by_character.insert(character_id.clone(), quotes);
            }
        }
    }

    ThreadAnalysis {
        last_poster,
        author_ids,
        post_records,
        post_counts,
        quotes_by_character,
    }
}
