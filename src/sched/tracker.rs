//! The operation surface external collaborators call into
//!
//! The API layer and dashboards are collaborators outside this crate;
//! everything they may do to the core goes through [`Tracker`]:
//! idempotent registration, asynchronous crawl triggers, event
//! submission and the read-only activity snapshot. Triggers always
//! acknowledge immediately; the activity indicator and logs are the only
//! visibility into in-progress work.

use crate::config::Config;
use crate::crawl::{
    resolve_event, Activity, ActivityIndicator, CrawlKind, CrawlReport, EventKind, InboundEvent,
    Orchestrator, ResolvedAction,
};
use crate::fetch::FetchClient;
use crate::sched::Scheduler;
use crate::store::CacheStore;
use crate::{ConfigError, ConfigResult, Result};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Crawl-state key recording the configuration content hash
const CONFIG_HASH_KEY: &str = "config_hash";

/// Handle composing the store, fetch client, orchestrator and scheduler
pub struct Tracker {
    config: Arc<Config>,
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<Scheduler>,
    store: Arc<Mutex<CacheStore>>,
}

impl Tracker {
    /// Builds the full stack, opening (or creating) the database at the
    /// configured path
    pub fn new(config: Config) -> Result<Self> {
        let store = CacheStore::open(Path::new(&config.storage.database_path))?;
        Self::with_store(config, store)
    }

    /// Builds the stack over an already-open store (used by tests)
    pub fn with_store(config: Config, store: CacheStore) -> Result<Self> {
        let config = Arc::new(config);
        let store = Arc::new(Mutex::new(store));
        let client = Arc::new(FetchClient::new(&config)?);
        let activity = ActivityIndicator::new();
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            client,
            store.clone(),
            activity,
        ));
        let scheduler = Arc::new(Scheduler::new(config.clone(), orchestrator.clone()));

        Ok(Self {
            config,
            orchestrator,
            scheduler,
            store,
        })
    }

    /// Records the loaded configuration's content hash so operators can
    /// see when a config change took effect
    pub async fn record_config_hash(&self, hash: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        match store.state_get(CONFIG_HASH_KEY)? {
            Some(previous) if previous != hash => {
                tracing::info!("Configuration changed since last run");
            }
            _ => {}
        }
        store.state_set(CONFIG_HASH_KEY, hash)?;
        Ok(())
    }

    /// Creates a character if absent; idempotent. Returns whether a new
    /// row was created.
    pub async fn register(&self, character_id: &str) -> Result<bool> {
        self.orchestrator.register(character_id).await
    }

    /// Triggers a crawl asynchronously, acknowledging immediately
    ///
    /// An unknown crawl type is an input error rejected synchronously.
    /// For profile and thread crawls, omitting the character id crawls
    /// every tracked character.
    pub fn trigger_crawl(
        &self,
        crawl_type: &str,
        character_id: Option<&str>,
    ) -> ConfigResult<&'static str> {
        let kind = CrawlKind::parse(crawl_type)
            .ok_or_else(|| ConfigError::UnknownCrawlType(crawl_type.to_string()))?;

        self.scheduler
            .trigger(kind, character_id.map(str::to_string), Duration::ZERO);
        Ok(kind.as_str())
    }

    /// Resolves an inbound event and runs the resulting action
    /// asynchronously, returning the action name immediately
    ///
    /// Event-driven crawls wait out the configured settle delay first so
    /// the origin site has committed the triggering action.
    pub fn submit_event(
        &self,
        event: &str,
        thread_id: Option<&str>,
        forum_id: Option<&str>,
        user_id: Option<&str>,
    ) -> &'static str {
        let inbound = InboundEvent {
            event: EventKind::parse(event),
            thread_id: thread_id.map(str::to_string),
            forum_id: forum_id.map(str::to_string),
            user_id: user_id.map(str::to_string),
        };

        let action = resolve_event(&inbound);
        let name = action.name();
        let settle = Duration::from_secs(self.config.crawler.webhook_settle_secs);

        match action {
            ResolvedAction::ProfileCrawl { character_id } => {
                self.scheduler
                    .trigger(CrawlKind::Profile, Some(character_id), settle);
            }
            ResolvedAction::ThreadRecrawl {
                thread_id,
                forum_id,
                user_id,
            } => {
                self.scheduler
                    .trigger_recrawl(thread_id, forum_id, user_id, settle);
            }
            ResolvedAction::FullThreadCrawl { character_id } => {
                self.scheduler
                    .trigger(CrawlKind::Threads, Some(character_id), settle);
            }
            ResolvedAction::None => {}
        }

        name
    }

    /// Current crawl activity: `None` when idle
    pub fn read_activity(&self) -> Option<Activity> {
        self.orchestrator.activity().snapshot()
    }

    /// Runs the periodic scheduler until shutdown
    pub async fn run_scheduler(&self) {
        self.scheduler.clone().run().await;
    }

    /// Runs one crawl operation to completion (CLI one-shot mode)
    pub async fn run_once(
        &self,
        kind: CrawlKind,
        character_id: Option<&str>,
    ) -> Result<CrawlReport> {
        self.orchestrator.run(kind, character_id).await
    }

    /// Requests cooperative shutdown; running operations stop at the
    /// next item boundary
    pub fn shutdown(&self) {
        self.orchestrator.cancel_flag().store(true, Ordering::Relaxed);
    }

    /// Clears the quote-crawl log so the next quote crawl revisits
    /// every thread
    pub async fn reset_quote_log(&self) -> Result<usize> {
        let mut store = self.store.lock().await;
        Ok(store.reset_quote_log()?)
    }

    /// Shared store handle for read-only collaborators
    pub fn store(&self) -> Arc<Mutex<CacheStore>> {
        self.store.clone()
    }

    /// The scheduler handle, for collaborators wiring their own triggers
    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }
}
