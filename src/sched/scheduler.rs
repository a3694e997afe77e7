//! Periodic jobs and trigger entry points
//!
//! Three periodic jobs (thread crawl for all characters, profile crawl
//! for all characters, discovery) plus the optional dump-sync job, each
//! on its own configurable interval. Every crawl invocation, scheduled
//! or triggered, first takes its job-type token; an overlapping
//! invocation of the same type is skipped with a logged notice, never
//! queued. Different job types run concurrently and compete only for the
//! fetch client's shared concurrency limiter.

use crate::config::Config;
use crate::crawl::{CrawlKind, Orchestrator};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Drives periodic crawl jobs and on-demand triggers
pub struct Scheduler {
    config: Arc<Config>,
    orchestrator: Arc<Orchestrator>,
    locks: HashMap<CrawlKind, Arc<Mutex<()>>>,
}

impl Scheduler {
    pub fn new(config: Arc<Config>, orchestrator: Arc<Orchestrator>) -> Self {
        let locks = CrawlKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::new(Mutex::new(()))))
            .collect();
        Self {
            config,
            orchestrator,
            locks,
        }
    }

    fn lock_for(&self, kind: CrawlKind) -> Arc<Mutex<()>> {
        // Locks are built for every kind in new(); the fallback only
        // guards against a future kind missing from ALL
        self.locks
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(())))
    }

    /// Runs a job now unless the same job type is already running
    pub async fn execute(&self, kind: CrawlKind, character_id: Option<String>) {
        let lock = self.lock_for(kind);
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::info!("{} crawl already running, skipping this invocation", kind);
                return;
            }
        };

        match self.orchestrator.run(kind, character_id.as_deref()).await {
            Ok(report) => tracing::info!("{} crawl finished: {:?}", kind, report),
            Err(e) => tracing::error!("{} crawl failed: {}", kind, e),
        }
    }

    /// Runs a targeted single-thread re-crawl under the thread-crawl token
    pub async fn execute_recrawl(
        &self,
        thread_id: String,
        forum_id: Option<String>,
        user_id: Option<String>,
    ) {
        let lock = self.lock_for(CrawlKind::Threads);
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::info!(
                    "threads crawl already running, skipping re-crawl of thread {}",
                    thread_id
                );
                return;
            }
        };

        match self
            .orchestrator
            .recrawl_thread(&thread_id, forum_id.as_deref(), user_id.as_deref())
            .await
        {
            Ok(report) => tracing::info!("Thread {} re-crawl finished: {:?}", thread_id, report),
            Err(e) => tracing::error!("Thread {} re-crawl failed: {}", thread_id, e),
        }
        // A failed re-crawl must not leave the activity cell set
        self.orchestrator.activity().clear();
    }

    /// Spawns a job asynchronously after an optional settle delay,
    /// returning immediately
    pub fn trigger(self: &Arc<Self>, kind: CrawlKind, character_id: Option<String>, settle: Duration) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
            scheduler.execute(kind, character_id).await;
        });
    }

    /// Spawns a targeted re-crawl asynchronously after a settle delay
    pub fn trigger_recrawl(
        self: &Arc<Self>,
        thread_id: String,
        forum_id: Option<String>,
        user_id: Option<String>,
        settle: Duration,
    ) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
            scheduler.execute_recrawl(thread_id, forum_id, user_id).await;
        });
    }

    /// Runs the periodic jobs until the process is stopped
    ///
    /// Each job's first run fires at startup; an interval of zero or less
    /// disables the job entirely.
    pub async fn run(self: Arc<Self>) {
        let jobs = [
            (CrawlKind::Threads, self.config.schedule.thread_crawl_minutes),
            (CrawlKind::Profile, self.config.schedule.profile_crawl_minutes),
            (CrawlKind::Discovery, self.config.schedule.discovery_minutes),
            (CrawlKind::DumpSync, self.config.schedule.dump_sync_minutes),
        ];

        let mut handles = Vec::new();
        for (kind, minutes) in jobs {
            if minutes <= 0 {
                tracing::info!("{} job disabled (interval {} minutes)", kind, minutes);
                continue;
            }

            tracing::info!("{} job scheduled every {} minutes", kind, minutes);
            let scheduler = self.clone();
            handles.push(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(minutes as u64 * 60));
                loop {
                    interval.tick().await;
                    scheduler.execute(kind, None).await;
                }
            }));
        }

        if handles.is_empty() {
            tracing::warn!("All periodic jobs are disabled; only triggers will run crawls");
            // Park so triggers spawned elsewhere keep a live runtime
            std::future::pending::<()>().await;
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}
