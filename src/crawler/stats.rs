//! Live crawl counters
//!
//! [`CrawlStats`] is a bundle of atomics shared by every worker; a
//! [`StatsSnapshot`] is a plain copy taken at one instant for logging or
//! the caller's inspection. Queue depth and in-flight counts live in the
//! frontier and are folded in at snapshot time.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated by workers as the crawl runs
#[derive(Debug, Default)]
pub struct CrawlStats {
    /// URLs accepted into the frontier
    discovered: AtomicU64,

    /// Pages fetched, parsed, and stored successfully
    crawled: AtomicU64,

    /// URLs that exhausted their retries or failed terminally
    failed: AtomicU64,

    /// Images stored by the image pipeline
    images_stored: AtomicU64,

    /// Bytes written to the content store
    bytes_stored: AtomicU64,
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_discovered(&self) {
        self.discovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_crawled(&self) {
        self.crawled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_image(&self) {
        self.images_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_stored.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn crawled(&self) -> u64 {
        self.crawled.load(Ordering::Relaxed)
    }

    /// Zeroes every counter; a restarted engine begins a fresh run
    pub fn reset(&self) {
        self.discovered.store(0, Ordering::Relaxed);
        self.crawled.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.images_stored.store(0, Ordering::Relaxed);
        self.bytes_stored.store(0, Ordering::Relaxed);
    }

    /// Copies the counters into a plain snapshot
    pub fn snapshot(&self, queued: usize, in_flight: usize) -> StatsSnapshot {
        StatsSnapshot {
            discovered: self.discovered.load(Ordering::Relaxed),
            crawled: self.crawled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            images_stored: self.images_stored.load(Ordering::Relaxed),
            bytes_stored: self.bytes_stored.load(Ordering::Relaxed),
            queued,
            in_flight,
        }
    }
}

/// Point-in-time view of the crawl counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub discovered: u64,
    pub crawled: u64,
    pub failed: u64,
    pub images_stored: u64,
    pub bytes_stored: u64,
    pub queued: usize,
    pub in_flight: usize,
}
