//! Crawl orchestration
//!
//! [`CrawlEngine`] wires the frontier, worker pool, politeness cache,
//! rate governor, and stores together and drives them through the
//! lifecycle state machine: Idle, Running, Paused, Stopping, Stopped.
//! Stopping is cooperative; workers observe it at the dequeue boundary
//! and finish their in-flight page first.

use crate::config::Config;
use crate::crawler::pool::{WorkerContext, WorkerPool};
use crate::crawler::stats::{CrawlStats, StatsSnapshot};
use crate::crawler::{Annotator, Fetcher, Frontier, HtmlParser, HttpFetcher, NoopAnnotator, Parser, Submission};
use crate::politeness::PolitenessCache;
use crate::ratelimit::RateGovernor;
use crate::state::CrawlerState;
use crate::storage::{ContentStore, PageStore};
use crate::url::{extract_domain, normalize_url};
use crate::{CrawlError, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// The crawl state machine plus the condvar workers and callers wait on
pub(crate) struct Lifecycle {
    state: Mutex<CrawlerState>,
    changed: Condvar,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: Mutex::new(CrawlerState::Idle),
            changed: Condvar::new(),
        }
    }

    pub fn state(&self) -> CrawlerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Atomically moves `from` to `to`; on mismatch returns the actual state
    pub fn compare_and_set(
        &self,
        from: CrawlerState,
        to: CrawlerState,
    ) -> std::result::Result<(), CrawlerState> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == from {
            *state = to;
            self.changed.notify_all();
            Ok(())
        } else {
            Err(*state)
        }
    }

    /// Parks the calling worker until the state leaves Paused
    pub fn block_while_paused(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while *state == CrawlerState::Paused {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn is_stopping(&self) -> bool {
        matches!(
            self.state(),
            CrawlerState::Stopping | CrawlerState::Stopped
        )
    }

    /// Moves Running or Paused to Stopping; a no-op from anywhere else
    pub fn begin_stopping(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*state, CrawlerState::Running | CrawlerState::Paused) {
            *state = CrawlerState::Stopping;
            self.changed.notify_all();
        }
    }

    pub fn mark_stopped(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != CrawlerState::Stopped {
            *state = CrawlerState::Stopped;
            self.changed.notify_all();
        }
    }

    /// Waits up to `timeout` for the state to reach Stopped
    pub fn wait_for_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        while *state != CrawlerState::Stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
        true
    }

    /// Waits up to `timeout` for shutdown to begin; true once it has
    pub fn wait_stopping_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        loop {
            if matches!(*state, CrawlerState::Stopping | CrawlerState::Stopped) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }
}

/// Threads and stores that exist only while a crawl is running
struct RunningCrawl {
    pool: WorkerPool,
    housekeeper: JoinHandle<()>,
    page_store: Arc<PageStore>,
    content_store: Arc<ContentStore>,
}

/// The crawl orchestrator
///
/// `start` seeds the frontier and spawns the pool, `pause`/`resume`
/// gate the workers, and `stop` (or natural completion when the
/// frontier empties) drives the run to Stopped. Starting again from
/// Stopped begins a fresh run: counters and the visited set reset,
/// while the durable stores keep accumulating.
pub struct CrawlEngine {
    config: Config,
    lifecycle: Arc<Lifecycle>,
    frontier: Arc<Frontier>,
    governor: Arc<RateGovernor>,
    politeness: Arc<PolitenessCache>,
    stats: Arc<CrawlStats>,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn Parser>,
    annotator: Arc<dyn Annotator>,
    resume_queue: bool,
    running: Mutex<Option<RunningCrawl>>,
}

impl CrawlEngine {
    /// Builds an engine with the HTTP fetcher and HTML parser
    pub fn new(config: Config) -> Result<Self> {
        let fetcher: Arc<dyn Fetcher> =
            Arc::new(HttpFetcher::new(&config).map_err(|e| CrawlError::Fetch(e.to_string()))?);
        Ok(Self::assemble(
            config,
            fetcher,
            Arc::new(HtmlParser::new()),
            Arc::new(NoopAnnotator),
        ))
    }

    /// Builds an engine around caller-supplied collaborators
    pub(crate) fn with_collaborators(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn Parser>,
        annotator: Arc<dyn Annotator>,
    ) -> Self {
        Self::assemble(config, fetcher, parser, annotator)
    }

    fn assemble(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn Parser>,
        annotator: Arc<dyn Annotator>,
    ) -> Self {
        let frontier = Arc::new(Frontier::new(
            config.crawler.max_depth,
            config.crawler.max_pages,
            config.pool.queue_capacity,
            config.filters.clone(),
        ));
        let governor = Arc::new(RateGovernor::new(&config.politeness, &config.limits));
        let politeness = Arc::new(PolitenessCache::new(&config, Arc::clone(&fetcher)));

        Self {
            config,
            lifecycle: Arc::new(Lifecycle::new()),
            frontier,
            governor,
            politeness,
            stats: Arc::new(CrawlStats::new()),
            fetcher,
            parser,
            annotator,
            resume_queue: false,
            running: Mutex::new(None),
        }
    }

    /// Restores Queued and Processing rows from a previous run at startup
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume_queue = resume;
        self
    }

    /// Seeds the frontier and spawns the worker pool
    ///
    /// Legal from Idle and from Stopped; a start from Stopped resets the
    /// counters and the frontier and begins a fresh run. Store open
    /// failures are fatal here; nothing is spawned if either store
    /// cannot be opened.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());

        let state = self.lifecycle.state();
        if !state.can_start() {
            return Err(CrawlError::InvalidTransition {
                from: state,
                to: CrawlerState::Running,
            });
        }
        if state == CrawlerState::Stopped {
            self.frontier.reset();
            self.stats.reset();
        }

        let page_store = Arc::new(PageStore::open(Path::new(
            &self.config.storage.database_path,
        ))?);
        let content_store = Arc::new(ContentStore::open(Path::new(
            &self.config.storage.content_dir,
        ))?);

        self.seed(&page_store)?;
        if self.resume_queue {
            self.restore_pending(&page_store)?;
        }

        if let Err(actual) = self.lifecycle.compare_and_set(state, CrawlerState::Running) {
            return Err(CrawlError::InvalidTransition {
                from: actual,
                to: CrawlerState::Running,
            });
        }

        let ctx = Arc::new(WorkerContext {
            config: self.config.clone(),
            lifecycle: Arc::clone(&self.lifecycle),
            frontier: Arc::clone(&self.frontier),
            governor: Arc::clone(&self.governor),
            politeness: Arc::clone(&self.politeness),
            page_store: Arc::clone(&page_store),
            content_store: Arc::clone(&content_store),
            fetcher: Arc::clone(&self.fetcher),
            parser: Arc::clone(&self.parser),
            annotator: Arc::clone(&self.annotator),
            stats: Arc::clone(&self.stats),
        });

        let pool = WorkerPool::start(Arc::clone(&ctx), self.config.pool.workers)?;
        let housekeeper = self.spawn_housekeeper(ctx)?;

        info!(
            workers = self.config.pool.workers,
            seeds = self.config.crawler.seed_urls.len(),
            "crawl started"
        );

        *running = Some(RunningCrawl {
            pool,
            housekeeper,
            page_store,
            content_store,
        });
        Ok(())
    }

    /// Submits the configured seeds, then any sitemap URLs their
    /// robots.txt files advertise
    fn seed(&self, page_store: &PageStore) -> Result<()> {
        let mut seed_domains = Vec::new();

        for seed in &self.config.crawler.seed_urls {
            match self.frontier.submit(seed, 0) {
                Submission::Accepted => {
                    self.stats.record_discovered();
                    if let Ok(url) = normalize_url(seed) {
                        page_store.enqueue(url.as_str(), 0, 0)?;
                        if let Some(domain) = extract_domain(&url) {
                            seed_domains.push((domain, url));
                        }
                    }
                }
                outcome => warn!(url = seed, ?outcome, "seed URL not admitted"),
            }
        }

        if self.config.crawler.respect_robots_txt {
            let mut visited_domains = HashSet::new();
            for (domain, url) in seed_domains {
                if !visited_domains.insert(domain.clone()) {
                    continue;
                }
                // Populates the robots cache for this domain as a side effect
                self.politeness.is_allowed(&url, &self.config.user_agent.name);

                for sitemap_url in self.politeness.sitemap_urls(&domain) {
                    for entry in self.politeness.sitemap_entries(&sitemap_url) {
                        if self.frontier.submit(entry.url.as_str(), 0) == Submission::Accepted {
                            self.stats.record_discovered();
                            if let Ok(normalized) = normalize_url(entry.url.as_str()) {
                                page_store.enqueue(normalized.as_str(), 0, 0)?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-admits Queued and Processing rows left over from an earlier run
    fn restore_pending(&self, page_store: &PageStore) -> Result<()> {
        let mut restored = 0u64;
        for (url, depth, _priority) in page_store.pending_urls()? {
            if self.frontier.submit(&url, depth) == Submission::Accepted {
                self.stats.record_discovered();
                restored += 1;
            }
            // Processing rows belong to a run that no longer exists
            page_store.requeue(&url)?;
        }
        if restored > 0 {
            info!(restored, "restored pending URLs from previous run");
        }
        Ok(())
    }

    fn spawn_housekeeper(&self, ctx: Arc<WorkerContext>) -> std::io::Result<JoinHandle<()>> {
        let interval = Duration::from_secs(self.config.crawler.status_interval_seconds.max(1));

        thread::Builder::new()
            .name("crawl-housekeeper".to_string())
            .spawn(move || {
                while !ctx.lifecycle.wait_stopping_for(interval) {
                    let snap = ctx
                        .stats
                        .snapshot(ctx.frontier.len(), ctx.frontier.in_flight());
                    let limit = ctx.config.crawler.max_pages as u64;
                    let percent = if limit > 0 {
                        (snap.crawled * 100) / limit
                    } else {
                        0
                    };
                    info!(
                        crawled = snap.crawled,
                        failed = snap.failed,
                        queued = snap.queued,
                        in_flight = snap.in_flight,
                        percent,
                        "crawl progress"
                    );
                    ctx.governor.reclaim();
                }
            })
    }

    /// Pauses the crawl; only legal from Running
    ///
    /// Workers finish their in-flight page and then park until `resume`.
    pub fn pause(&self) -> Result<()> {
        self.lifecycle
            .compare_and_set(CrawlerState::Running, CrawlerState::Paused)
            .map_err(|from| CrawlError::InvalidTransition {
                from,
                to: CrawlerState::Paused,
            })?;
        info!("crawl paused");
        Ok(())
    }

    /// Resumes a paused crawl; only legal from Paused
    pub fn resume(&self) -> Result<()> {
        self.lifecycle
            .compare_and_set(CrawlerState::Paused, CrawlerState::Running)
            .map_err(|from| CrawlError::InvalidTransition {
                from,
                to: CrawlerState::Running,
            })?;
        info!("crawl resumed");
        Ok(())
    }

    /// Stops the crawl and finalizes the stores; idempotent
    ///
    /// From Idle this is a no-op straight to Stopped. Otherwise it drains
    /// the frontier, joins every worker, flushes the content store, and
    /// optimizes the database.
    pub fn stop(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());

        let Some(run) = running.take() else {
            let _ = self
                .lifecycle
                .compare_and_set(CrawlerState::Idle, CrawlerState::Stopped);
            return Ok(());
        };

        self.lifecycle.begin_stopping();
        self.frontier.drain();

        run.pool.join();
        if run.housekeeper.join().is_err() {
            warn!("housekeeping thread panicked");
        }
        if let Err(e) = run.content_store.flush_all() {
            warn!(error = %e, "content flush failed");
        }
        if let Err(e) = run.page_store.optimize() {
            warn!(error = %e, "database optimize failed");
        }
        self.lifecycle.mark_stopped();

        let snap = self.stats();
        info!(
            crawled = snap.crawled,
            failed = snap.failed,
            images = snap.images_stored,
            bytes = snap.bytes_stored,
            "crawl finished"
        );
        Ok(())
    }

    /// Blocks until the crawl reaches Stopped or `timeout` elapses
    ///
    /// Returns true if Stopped was reached. Natural completion counts:
    /// when the frontier goes idle the workers stop themselves.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        self.lifecycle.wait_for_stopped(timeout)
    }

    pub fn state(&self) -> CrawlerState {
        self.lifecycle.state()
    }

    /// Point-in-time crawl counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats
            .snapshot(self.frontier.len(), self.frontier.in_flight())
    }

    /// Workers currently processing a page
    pub fn active_workers(&self) -> usize {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.as_ref().map_or(0, |run| run.pool.active_count())
    }
}
