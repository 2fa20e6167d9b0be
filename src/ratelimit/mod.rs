//! Per-domain request pacing and resource budgets
//!
//! The [`RateGovernor`] owns a sliding request window per domain plus two
//! advisory budgets (memory held for page bodies, free disk space). All of
//! its answers are backpressure signals for the worker loop, never errors.

use crate::config::{LimitsConfig, PolitenessConfig};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// How long a domain's rate window may sit idle before `reclaim` evicts it
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(600);

/// Rate-limit window state for a single domain
#[derive(Debug)]
struct DomainRateState {
    /// Start of the current sliding window
    window_start: Instant,

    /// Requests permitted since `window_start`
    request_count: u32,

    /// When the last permit was granted, used for eviction and crawl-delay
    /// pacing
    last_request: Option<Instant>,
}

impl DomainRateState {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            request_count: 0,
            last_request: None,
        }
    }
}

/// Enforces per-domain request rates and advisory resource budgets
///
/// Cloning the governor is done via `Arc`; all methods take `&self` and are
/// safe to call from any worker thread.
pub struct RateGovernor {
    /// Maximum permits per domain per window
    max_per_window: u32,

    /// Length of the sliding window (60s in production, shorter in tests)
    window: Duration,

    /// Idle time after which a domain's state is evictable
    stale_after: Duration,

    /// Per-domain window state; the outer map is read-mostly
    domains: RwLock<HashMap<String, Arc<Mutex<DomainRateState>>>>,

    /// Bytes currently held against the memory budget
    memory_used: AtomicU64,

    /// Memory budget in bytes (0 = unlimited)
    memory_budget: u64,

    /// Minimum free disk space in bytes before content writes (0 = no check)
    min_free_disk: u64,
}

impl RateGovernor {
    /// Creates a governor from the politeness and limits configuration
    pub fn new(politeness: &PolitenessConfig, limits: &LimitsConfig) -> Self {
        Self::with_window(politeness, limits, Duration::from_secs(60))
    }

    /// Creates a governor with an explicit window length
    ///
    /// Production code uses [`RateGovernor::new`]; tests shrink the window
    /// so that window-reset behavior is observable without sleeping a
    /// minute.
    pub fn with_window(
        politeness: &PolitenessConfig,
        limits: &LimitsConfig,
        window: Duration,
    ) -> Self {
        Self {
            max_per_window: politeness.max_requests_per_minute,
            window,
            stale_after: DEFAULT_STALE_AFTER,
            domains: RwLock::new(HashMap::new()),
            memory_used: AtomicU64::new(0),
            memory_budget: limits.max_memory_mb.saturating_mul(1024 * 1024),
            min_free_disk: limits.min_free_disk_mb.saturating_mul(1024 * 1024),
        }
    }

    /// Requests a permit to contact `domain`
    ///
    /// The check and the increment happen under one lock: if the domain's
    /// window has expired it is reset, then the request count is compared
    /// against the cap and incremented on success. A `false` answer means
    /// the caller should requeue the URL after a short backoff, not fail it.
    pub fn permit(&self, domain: &str) -> bool {
        let state = self.domain_state(domain);
        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        if now.duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.request_count = 0;
        }

        if state.request_count < self.max_per_window {
            state.request_count += 1;
            state.last_request = Some(now);
            true
        } else {
            debug!(domain, count = state.request_count, "rate limit reached");
            false
        }
    }

    /// Returns how long ago the last permit for `domain` was granted
    ///
    /// Used by workers to honor crawl-delay without a global clock per
    /// domain. `None` means no request has been made yet.
    pub fn elapsed_since_last(&self, domain: &str) -> Option<Duration> {
        let domains = self.domains.read().unwrap_or_else(|e| e.into_inner());
        let state = domains.get(domain)?;
        let state = state.lock().unwrap_or_else(|e| e.into_inner());
        state.last_request.map(|t| t.elapsed())
    }

    /// Evicts rate state for domains idle longer than the staleness
    /// threshold
    ///
    /// Called from the engine's housekeeping pass so that long crawls over
    /// many domains do not grow the map without bound.
    pub fn reclaim(&self) {
        let mut domains = self.domains.write().unwrap_or_else(|e| e.into_inner());
        let stale_after = self.stale_after;

        let before = domains.len();
        domains.retain(|_, state| {
            let state = state.lock().unwrap_or_else(|e| e.into_inner());
            let idle = match state.last_request {
                Some(t) => t.elapsed(),
                None => state.window_start.elapsed(),
            };
            idle < stale_after
        });

        let evicted = before - domains.len();
        if evicted > 0 {
            debug!(evicted, remaining = domains.len(), "evicted stale rate state");
        }
    }

    /// Tries to reserve `bytes` against the memory budget
    ///
    /// Advisory only: a denial tells the caller to back off (drop or defer
    /// the body), it never aborts the crawl. A zero budget disables the
    /// check.
    pub fn allocate_memory(&self, bytes: u64) -> bool {
        if self.memory_budget == 0 {
            return true;
        }

        let mut current = self.memory_used.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(bytes);
            if next > self.memory_budget {
                debug!(bytes, used = current, "memory budget denied allocation");
                return false;
            }
            match self.memory_used.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Returns `bytes` to the memory budget
    pub fn release_memory(&self, bytes: u64) {
        if self.memory_budget == 0 {
            return;
        }

        let mut current = self.memory_used.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(bytes);
            match self.memory_used.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Bytes currently reserved against the memory budget
    pub fn memory_used(&self) -> u64 {
        self.memory_used.load(Ordering::Acquire)
    }

    /// Best-effort check that the filesystem holding `path` has enough free
    /// space for content writes
    ///
    /// Probe failures answer `true`: the budget is advisory and a broken
    /// probe must not stall the crawl. A zero threshold disables the check.
    pub fn check_disk_space(&self, path: &Path) -> bool {
        if self.min_free_disk == 0 {
            return true;
        }

        let probe_path = match path.canonicalize() {
            Ok(p) => p,
            Err(_) => return true,
        };

        let disks = sysinfo::Disks::new_with_refreshed_list();

        // Pick the disk with the longest mount point that is a prefix of
        // the target path
        let mut best: Option<&sysinfo::Disk> = None;
        for disk in disks.list() {
            if probe_path.starts_with(disk.mount_point()) {
                let better = match best {
                    Some(b) => {
                        disk.mount_point().as_os_str().len() > b.mount_point().as_os_str().len()
                    }
                    None => true,
                };
                if better {
                    best = Some(disk);
                }
            }
        }

        match best {
            Some(disk) => disk.available_space() >= self.min_free_disk,
            None => true,
        }
    }

    /// Domains with live rate state, for stats and tests
    pub fn tracked_domains(&self) -> Vec<String> {
        let domains = self.domains.read().unwrap_or_else(|e| e.into_inner());
        domains.keys().cloned().collect()
    }

    /// Fetches or creates the rate state slot for a domain
    fn domain_state(&self, domain: &str) -> Arc<Mutex<DomainRateState>> {
        {
            let domains = self.domains.read().unwrap_or_else(|e| e.into_inner());
            if let Some(state) = domains.get(domain) {
                return Arc::clone(state);
            }
        }

        let mut domains = self.domains.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            domains
                .entry(domain.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(DomainRateState::new(Instant::now())))),
        )
    }
}
