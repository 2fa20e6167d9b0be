//! URL frontier
//!
//! The frontier is the single admission point for every URL in a crawl.
//! It owns the visited set (keyed by normalized URL), the in-memory
//! priority queue, and the in-flight count, all guarded by one mutex so
//! that admission is atomic: of N concurrent submits of the same URL,
//! exactly one is accepted.

use crate::config::FiltersConfig;
use crate::url::{domain_allowed, normalize_url, path_excluded};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// Outcome of submitting a URL for admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Admitted into the queue
    Accepted,

    /// Already seen this run (visited is permanent for the run)
    Duplicate,

    /// Deeper than the configured maximum depth
    DepthExceeded,

    /// The run already admitted its maximum number of pages, or the
    /// in-memory queue is at its configured bound
    CapacityExceeded,

    /// The domain does not pass the allow-list
    DomainDisallowed,

    /// The URL is malformed or its path hits an excluded prefix
    Excluded,
}

/// A queued URL with its scheduling metadata
#[derive(Debug, Clone)]
pub struct FrontierEntry {
    pub url: Url,
    pub depth: u32,

    /// Lower value = dequeued sooner; depth by default (breadth bias)
    pub priority: u32,

    pub enqueued_at: Instant,

    /// FIFO tie-break within equal priority
    seq: u64,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for FrontierEntry {}

impl Ord for FrontierEntry {
    // Reversed: BinaryHeap is a max-heap and we want the lowest
    // (priority, seq) on top
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// State behind the frontier's single lock
struct Inner {
    /// Normalized URLs ever admitted this run
    visited: HashSet<String>,

    queue: BinaryHeap<FrontierEntry>,

    /// Entries handed out by `take_next` and not yet marked done
    in_flight: usize,

    /// Set by `drain`; all subsequent takes return None
    draining: bool,

    /// Monotonic sequence for FIFO tie-breaks
    seq: u64,
}

/// Shared URL admission queue
pub struct Frontier {
    inner: Mutex<Inner>,
    available: Condvar,
    max_depth: u32,
    max_pages: usize,

    /// Upper bound on queued (not in-flight) entries
    queue_capacity: usize,

    filters: FiltersConfig,
}

impl Frontier {
    pub fn new(
        max_depth: u32,
        max_pages: usize,
        queue_capacity: usize,
        filters: FiltersConfig,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                visited: HashSet::new(),
                queue: BinaryHeap::new(),
                in_flight: 0,
                draining: false,
                seq: 0,
            }),
            available: Condvar::new(),
            max_depth,
            max_pages,
            queue_capacity,
            filters,
        }
    }

    /// Submits a URL for admission
    ///
    /// Admission order: normalize, domain allow-list, excluded paths,
    /// visited check, depth check, page-cap check, queue-length check.
    /// The visited insert and the queue push happen inside one lock
    /// acquisition, so concurrent duplicate submits yield exactly one
    /// `Accepted`. A URL bounced off a full queue is not marked visited,
    /// so it can be admitted once the backlog drains.
    pub fn submit(&self, url: &str, depth: u32) -> Submission {
        let normalized = match normalize_url(url) {
            Ok(u) => u,
            Err(e) => {
                debug!(url, error = %e, "rejected malformed URL");
                return Submission::Excluded;
            }
        };

        let Some(domain) = normalized.host_str().map(|h| h.to_lowercase()) else {
            return Submission::Excluded;
        };
        if !domain_allowed(&domain, &self.filters) {
            debug!(url = %normalized, "rejected by domain allow-list");
            return Submission::DomainDisallowed;
        }
        if path_excluded(normalized.path(), &self.filters) {
            debug!(url = %normalized, "rejected by excluded path");
            return Submission::Excluded;
        }

        let key = normalized.as_str().to_string();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if inner.visited.contains(&key) {
            return Submission::Duplicate;
        }
        if depth > self.max_depth {
            return Submission::DepthExceeded;
        }
        if inner.visited.len() >= self.max_pages {
            debug!(url = %normalized, "rejected at capacity");
            return Submission::CapacityExceeded;
        }
        if inner.queue.len() >= self.queue_capacity {
            debug!(url = %normalized, "rejected, queue full");
            return Submission::CapacityExceeded;
        }

        inner.visited.insert(key);
        inner.seq += 1;
        let seq = inner.seq;
        inner.queue.push(FrontierEntry {
            url: normalized,
            depth,
            priority: depth,
            enqueued_at: Instant::now(),
            seq,
        });

        self.available.notify_one();
        Submission::Accepted
    }

    /// Takes the next entry, waiting up to `timeout` for one to appear
    ///
    /// Returns None on timeout or when the frontier is draining. A
    /// returned entry counts as in-flight until `mark_done` or `requeue`.
    pub fn take_next(&self, timeout: Duration) -> Option<FrontierEntry> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        loop {
            if inner.draining {
                return None;
            }

            if let Some(entry) = inner.queue.pop() {
                inner.in_flight += 1;
                return Some(entry);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            let (guard, _) = self
                .available
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
    }

    /// Marks an in-flight entry finished
    ///
    /// Wakes all waiters when the frontier goes idle so workers can
    /// observe natural completion promptly.
    pub fn mark_done(&self, _url: &Url, _success: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.in_flight = inner.in_flight.saturating_sub(1);

        if inner.in_flight == 0 && inner.queue.is_empty() {
            self.available.notify_all();
        }
    }

    /// Returns an in-flight entry to the queue
    ///
    /// Bypasses the visited set (the URL is already in it); used for
    /// rate-denied and retried URLs. The entry gets a fresh sequence
    /// number so it queues behind its priority peers.
    pub fn requeue(&self, mut entry: FrontierEntry) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.in_flight = inner.in_flight.saturating_sub(1);
        inner.seq += 1;
        entry.seq = inner.seq;
        inner.queue.push(entry);
        self.available.notify_one();
    }

    /// Clears all admission state for a fresh run
    ///
    /// Only sound once every worker from the previous run has exited; a
    /// restarted engine calls this before re-seeding.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.visited.clear();
        inner.queue.clear();
        inner.in_flight = 0;
        inner.draining = false;
        inner.seq = 0;
    }

    /// Drains the frontier: all current and future takes return None
    pub fn drain(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.draining = true;
        self.available.notify_all();
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries handed out and not yet finished
    pub fn in_flight(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.in_flight
    }

    /// Queue empty AND nothing in flight; the natural-completion signal
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.queue.is_empty() && inner.in_flight == 0
    }
}
