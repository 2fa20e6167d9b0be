//! Worker pool and the per-URL worker loop
//!
//! Each worker is an OS thread looping: pause gate, dequeue, politeness
//! check, rate permit, fetch, parse, store, submit discovered links. Any
//! error while processing a URL fails that URL only; the worker moves on
//! to the next one. Cancellation happens only at the dequeue boundary,
//! never mid-fetch.

use crate::config::Config;
use crate::crawler::engine::Lifecycle;
use crate::crawler::frontier::{Frontier, FrontierEntry, Submission};
use crate::crawler::stats::CrawlStats;
use crate::crawler::{Annotator, FetchedPage, Fetcher, Parser};
use crate::politeness::PolitenessCache;
use crate::ratelimit::RateGovernor;
use crate::state::CrawlerState;
use crate::storage::{ContentStore, PageRecord, PageStore};
use crate::url::{extract_domain, normalize_url};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// How long a worker blocks waiting for the next URL before re-checking
/// shutdown and completion
const DEQUEUE_WAIT: Duration = Duration::from_secs(1);

/// Sleep before requeueing a rate-denied or backpressured URL
const BACKOFF_SLEEP: Duration = Duration::from_millis(200);

/// Upper bound on honored crawl delays; robots.txt can declare absurd ones
const MAX_CRAWL_DELAY: Duration = Duration::from_secs(30);

/// Everything a worker needs, shared across the pool
pub(crate) struct WorkerContext {
    pub config: Config,
    pub lifecycle: Arc<Lifecycle>,
    pub frontier: Arc<Frontier>,
    pub governor: Arc<RateGovernor>,
    pub politeness: Arc<PolitenessCache>,
    pub page_store: Arc<PageStore>,
    pub content_store: Arc<ContentStore>,
    pub fetcher: Arc<dyn Fetcher>,
    pub parser: Arc<dyn Parser>,
    pub annotator: Arc<dyn Annotator>,
    pub stats: Arc<CrawlStats>,
}

/// Why processing a URL did not succeed
enum PageFailure {
    /// Resource pressure; requeue without recording a failure
    Backpressure,

    /// Might succeed on retry (timeout, connect, 429, 5xx)
    Transient(String),

    /// Will not succeed on retry
    Terminal(String),
}

/// A running set of crawl workers
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawns `workers` OS threads running the worker loop
    pub fn start(ctx: Arc<WorkerContext>, workers: usize) -> std::io::Result<Self> {
        let active = Arc::new(AtomicUsize::new(0));
        let alive = Arc::new(AtomicUsize::new(workers));

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let ctx = Arc::clone(&ctx);
            let active = Arc::clone(&active);
            let alive = Arc::clone(&alive);

            let handle = thread::Builder::new()
                .name(format!("crawl-worker-{}", id))
                .spawn(move || worker_loop(id, ctx, active, alive))?;
            handles.push(handle);
        }

        Ok(Self { handles, active })
    }

    /// Number of workers currently processing a URL (not merely alive)
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits for every worker thread to exit
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

fn worker_loop(
    id: usize,
    ctx: Arc<WorkerContext>,
    active: Arc<AtomicUsize>,
    alive: Arc<AtomicUsize>,
) {
    debug!(worker = id, "worker started");

    loop {
        ctx.lifecycle.block_while_paused();
        if ctx.lifecycle.is_stopping() {
            break;
        }

        let Some(entry) = ctx.frontier.take_next(DEQUEUE_WAIT) else {
            if ctx.lifecycle.is_stopping() {
                break;
            }
            // Natural completion: nothing queued, nothing in flight, and
            // the engine still thinks we are running
            if ctx.frontier.is_idle() && ctx.lifecycle.state() == CrawlerState::Running {
                debug!(worker = id, "frontier idle, initiating shutdown");
                ctx.lifecycle.begin_stopping();
                ctx.frontier.drain();
                break;
            }
            continue;
        };

        active.fetch_add(1, Ordering::SeqCst);
        process_entry(&ctx, entry);
        active.fetch_sub(1, Ordering::SeqCst);
    }

    // The last worker out flips Stopping to Stopped
    if alive.fetch_sub(1, Ordering::SeqCst) == 1 && ctx.lifecycle.is_stopping() {
        ctx.lifecycle.mark_stopped();
    }
    debug!(worker = id, "worker exited");
}

/// Handles one dequeued URL end to end
fn process_entry(ctx: &WorkerContext, entry: FrontierEntry) {
    let url = entry.url.clone();
    let domain = extract_domain(&url).unwrap_or_default();

    if !ctx.politeness.is_allowed(&url, &ctx.config.user_agent.name) {
        debug!(url = %url, "disallowed by robots.txt");
        if let Err(e) = ctx.page_store.mark_queue_done(url.as_str(), false) {
            warn!(url = %url, error = %e, "queue update failed");
        }
        ctx.frontier.mark_done(&url, false);
        ctx.stats.record_failed();
        return;
    }

    if let Err(e) = ctx.page_store.mark_queue_processing(url.as_str()) {
        warn!(url = %url, error = %e, "queue update failed");
    }

    // Captured before the permit, which stamps a fresh last-request time
    let since_last = ctx.governor.elapsed_since_last(&domain);

    // Rate denial is not an error: back off briefly and put it back
    if !ctx.governor.permit(&domain) {
        thread::sleep(BACKOFF_SLEEP);
        if let Err(e) = ctx.page_store.requeue(url.as_str()) {
            warn!(url = %url, error = %e, "queue update failed");
        }
        ctx.frontier.requeue(entry);
        return;
    }

    let delay = ctx.politeness.crawl_delay(&domain).or_else(|| {
        let ms = ctx.config.politeness.default_crawl_delay_ms;
        (ms > 0).then(|| Duration::from_millis(ms))
    });
    if let Some(delay) = delay {
        let wait = remaining_delay(delay.min(MAX_CRAWL_DELAY), since_last);
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }

    match crawl_page(ctx, &entry) {
        Ok(()) => {
            ctx.stats.record_crawled();
            if let Err(e) = ctx.page_store.mark_queue_done(url.as_str(), true) {
                warn!(url = %url, error = %e, "queue update failed");
            }
            ctx.frontier.mark_done(&url, true);
        }
        Err(failure) => handle_failure(ctx, entry, failure),
    }
}

/// Fetches, parses, and stores one page
fn crawl_page(ctx: &WorkerContext, entry: &FrontierEntry) -> Result<(), PageFailure> {
    let url = &entry.url;

    let page = ctx.fetcher.fetch(url).map_err(|e| {
        if e.is_transient() {
            PageFailure::Transient(e.to_string())
        } else {
            PageFailure::Terminal(e.to_string())
        }
    })?;

    if !page.is_success() {
        let message = format!("HTTP {}", page.status_code);
        return if page.status_code == 429 || (500..600).contains(&page.status_code) {
            Err(PageFailure::Transient(message))
        } else {
            Err(PageFailure::Terminal(message))
        };
    }

    let reserved = page.body.len() as u64;
    if !ctx.governor.allocate_memory(reserved) {
        return Err(PageFailure::Backpressure);
    }

    let result = process_body(ctx, entry, &page);
    ctx.governor.release_memory(reserved);
    result
}

fn process_body(
    ctx: &WorkerContext,
    entry: &FrontierEntry,
    page: &FetchedPage,
) -> Result<(), PageFailure> {
    let url = &entry.url;
    let domain = extract_domain(url).unwrap_or_default();

    let mut record = PageRecord::new(url.as_str(), &domain, entry.depth);
    record.status_code = Some(page.status_code);
    record.content_type = page.content_type.clone();
    record.fetched_at = Some(Utc::now().to_rfc3339());

    if page.is_html() {
        record.title = ctx.parser.title(&page.body);
        submit_links(ctx, entry, page);

        if ctx.config.storage.save_content {
            store_images(ctx, &page.final_url, &page.body);
        }
    }

    if ctx.config.storage.save_content {
        if ctx.governor.check_disk_space(ctx.content_store.root()) {
            let (path, len) = ctx
                .content_store
                .store(url, &page.body)
                .map_err(|e| PageFailure::Terminal(e.to_string()))?;
            record.content_path = Some(path.to_string_lossy().to_string());
            record.content_size = Some(len);
            ctx.stats.add_bytes(len);
        } else {
            warn!(url = %url, "low disk space, skipping content write");
        }
    }

    record.annotations = ctx.annotator.annotate(page);

    ctx.page_store
        .upsert_page(&record)
        .map_err(|e| PageFailure::Terminal(e.to_string()))?;
    Ok(())
}

/// Submits every extracted link; accepted ones also enter the durable
/// queue
fn submit_links(ctx: &WorkerContext, entry: &FrontierEntry, page: &FetchedPage) {
    let next_depth = entry.depth + 1;
    let links = ctx.parser.extract_links(&page.final_url, &page.body);

    for link in &links {
        match ctx.frontier.submit(link.as_str(), next_depth) {
            Submission::Accepted => {
                ctx.stats.record_discovered();
                if let Ok(normalized) = normalize_url(link.as_str()) {
                    if let Err(e) =
                        ctx.page_store
                            .enqueue(normalized.as_str(), next_depth, next_depth)
                    {
                        warn!(url = %normalized, error = %e, "durable enqueue failed");
                    }
                }
            }
            outcome => {
                debug!(url = %link, ?outcome, "link not admitted");
            }
        }
    }
}

/// Fetches and stores page images; failures never affect the page
fn store_images(ctx: &WorkerContext, base: &url::Url, body: &[u8]) {
    for image_url in ctx.parser.extract_images(base, body) {
        if !ctx.config.storage.is_image_url(image_url.path()) {
            continue;
        }
        let Some(domain) = extract_domain(&image_url) else {
            continue;
        };
        // Images are best-effort; a denied permit just skips this one
        if !ctx.governor.permit(&domain) {
            continue;
        }

        match ctx.fetcher.fetch(&image_url) {
            Ok(img) if img.is_success() => match ctx.content_store.store_image(&image_url, &img.body)
            {
                Ok((_, len)) => {
                    ctx.stats.record_image();
                    ctx.stats.add_bytes(len);
                }
                Err(e) => debug!(url = %image_url, error = %e, "image store failed"),
            },
            Ok(img) => debug!(url = %image_url, status = img.status_code, "image fetch failed"),
            Err(e) => debug!(url = %image_url, error = %e, "image fetch failed"),
        }
    }
}

fn handle_failure(ctx: &WorkerContext, entry: FrontierEntry, failure: PageFailure) {
    let url = entry.url.clone();

    match failure {
        PageFailure::Backpressure => {
            thread::sleep(BACKOFF_SLEEP);
            if let Err(e) = ctx.page_store.requeue(url.as_str()) {
                warn!(url = %url, error = %e, "queue update failed");
            }
            ctx.frontier.requeue(entry);
        }
        PageFailure::Transient(message) => {
            let error_count = match ctx.page_store.record_failure(url.as_str(), &message) {
                Ok(count) => count,
                Err(e) => {
                    warn!(url = %url, error = %e, "failure bookkeeping failed");
                    u32::MAX
                }
            };

            if error_count <= ctx.config.crawler.retry_limit {
                debug!(url = %url, attempt = error_count, "requeueing after transient failure");
                if let Err(e) = ctx.page_store.requeue(url.as_str()) {
                    warn!(url = %url, error = %e, "queue update failed");
                }
                ctx.frontier.requeue(entry);
            } else {
                fail_page(ctx, &entry, &message);
            }
        }
        PageFailure::Terminal(message) => {
            if let Err(e) = ctx.page_store.record_failure(url.as_str(), &message) {
                warn!(url = %url, error = %e, "failure bookkeeping failed");
            }
            fail_page(ctx, &entry, &message);
        }
    }
}

/// Time still owed on a crawl delay given how long ago the domain was
/// last contacted; the first request to a domain owes nothing
fn remaining_delay(delay: Duration, since_last: Option<Duration>) -> Duration {
    match since_last {
        None => Duration::ZERO,
        Some(elapsed) => delay.saturating_sub(elapsed),
    }
}

fn fail_page(ctx: &WorkerContext, entry: &FrontierEntry, message: &str) {
    let url = &entry.url;
    warn!(url = %url, error = message, "page failed");

    if let Err(e) = ctx.page_store.mark_queue_done(url.as_str(), false) {
        warn!(url = %url, error = %e, "queue update failed");
    }
    ctx.frontier.mark_done(url, false);
    ctx.stats.record_failed();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_owes_no_delay() {
        assert_eq!(
            remaining_delay(Duration::from_secs(2), None),
            Duration::ZERO
        );
    }

    #[test]
    fn test_elapsed_time_counts_against_delay() {
        let delay = Duration::from_secs(2);
        assert_eq!(
            remaining_delay(delay, Some(Duration::from_millis(1500))),
            Duration::from_millis(500)
        );
        assert_eq!(
            remaining_delay(delay, Some(Duration::from_secs(5))),
            Duration::ZERO
        );
    }
}
