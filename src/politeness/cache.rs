//! Per-domain robots.txt cache
//!
//! The [`PolitenessCache`] is the single authority workers consult before
//! fetching. It fetches `robots.txt` once per domain, caches the parsed
//! rules with a TTL, and refreshes on expiry. The cache FAILS OPEN: a
//! domain whose robots.txt cannot be fetched or parsed gets an allow-all
//! entry, because an unreachable rules file must not stall the crawl.

use crate::config::Config;
use crate::crawler::Fetcher;
use crate::politeness::rules::RobotsRules;
use crate::politeness::sitemap::{parse_sitemap, SitemapEntry};
use crate::url::extract_domain;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// A cached rule set with its fetch timestamp
#[derive(Debug, Clone)]
struct CachedRules {
    rules: RobotsRules,
    fetched_at: DateTime<Utc>,
}

impl CachedRules {
    fn new(rules: RobotsRules) -> Self {
        Self {
            rules,
            fetched_at: Utc::now(),
        }
    }

    fn is_stale(&self, ttl: ChronoDuration) -> bool {
        Utc::now() - self.fetched_at > ttl
    }
}

/// Caches robots.txt rules per domain and answers politeness queries
pub struct PolitenessCache {
    fetcher: Arc<dyn Fetcher>,
    entries: RwLock<HashMap<String, CachedRules>>,

    /// How long a cached entry stays fresh
    ttl: ChronoDuration,

    /// When false, every query is allowed without fetching anything
    respect_robots: bool,

    /// User-agent token used for crawl-delay group selection
    agent_token: String,
}

impl PolitenessCache {
    /// Creates a cache backed by the given fetcher
    pub fn new(config: &Config, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            entries: RwLock::new(HashMap::new()),
            ttl: ChronoDuration::hours(config.politeness.cache_ttl_hours as i64),
            respect_robots: config.crawler.respect_robots_txt,
            agent_token: config.user_agent.name.clone(),
        }
    }

    /// Checks whether `url` may be fetched by `user_agent`
    ///
    /// Fetches and caches the domain's robots.txt on first contact or
    /// after TTL expiry. Any failure along the way answers `true`.
    pub fn is_allowed(&self, url: &Url, user_agent: &str) -> bool {
        if !self.respect_robots {
            return true;
        }

        let Some(domain) = extract_domain(url) else {
            return true;
        };

        let rules = self.rules_for(&domain, url);
        rules.is_allowed(url.as_str(), user_agent)
    }

    /// Returns the crawl delay robots.txt declares for this crawler
    ///
    /// Only consults already-cached entries: workers call this right after
    /// [`PolitenessCache::is_allowed`] has populated the domain.
    pub fn crawl_delay(&self, domain: &str) -> Option<Duration> {
        if !self.respect_robots {
            return None;
        }

        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(domain)
            .and_then(|cached| cached.rules.crawl_delay(&self.agent_token))
    }

    /// Sitemap URLs declared by a domain's robots.txt
    pub fn sitemap_urls(&self, domain: &str) -> Vec<Url> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(domain)
            .map(|cached| cached.rules.sitemaps().to_vec())
            .unwrap_or_default()
    }

    /// Fetches and parses a sitemap document
    ///
    /// Failures are logged and answered with an empty list; sitemaps are
    /// an enrichment, never a requirement.
    pub fn sitemap_entries(&self, sitemap_url: &Url) -> Vec<SitemapEntry> {
        match self.fetcher.fetch(sitemap_url) {
            Ok(page) if page.is_success() => {
                let content = String::from_utf8_lossy(&page.body);
                parse_sitemap(&content)
            }
            Ok(page) => {
                debug!(url = %sitemap_url, status = page.status_code, "sitemap fetch returned error status");
                Vec::new()
            }
            Err(e) => {
                debug!(url = %sitemap_url, error = %e, "sitemap fetch failed");
                Vec::new()
            }
        }
    }

    /// Number of domains with cached rules
    pub fn cached_domains(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    /// Returns fresh rules for a domain, fetching if absent or stale
    fn rules_for(&self, domain: &str, url: &Url) -> RobotsRules {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = entries.get(domain) {
                if !cached.is_stale(self.ttl) {
                    return cached.rules.clone();
                }
            }
        }

        // Fetch outside the lock; a concurrent duplicate fetch is harmless
        let rules = self.fetch_rules(domain, url);

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(domain.to_string(), CachedRules::new(rules.clone()));
        rules
    }

    /// Fetches and parses robots.txt for the origin of `url`
    fn fetch_rules(&self, domain: &str, url: &Url) -> RobotsRules {
        let robots_url = match url.join("/robots.txt") {
            Ok(u) => u,
            Err(e) => {
                warn!(domain, error = %e, "could not build robots.txt URL, allowing all");
                return RobotsRules::allow_all();
            }
        };

        match self.fetcher.fetch(&robots_url) {
            Ok(page) if page.is_success() => {
                let content = String::from_utf8_lossy(&page.body);
                debug!(domain, bytes = page.body.len(), "fetched robots.txt");
                RobotsRules::parse(&content)
            }
            Ok(page) if page.status_code == 404 => {
                debug!(domain, "no robots.txt, allowing all");
                RobotsRules::allow_all()
            }
            Ok(page) => {
                warn!(
                    domain,
                    status = page.status_code,
                    "robots.txt fetch returned error status, allowing all"
                );
                RobotsRules::allow_all()
            }
            Err(e) => {
                warn!(domain, error = %e, "robots.txt fetch failed, allowing all");
                RobotsRules::allow_all()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::{FetchError, FetchedPage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned responses by path and counts fetches
    struct StubFetcher {
        responses: HashMap<String, (u16, String)>,
        fetches: AtomicUsize,
        fail: bool,
    }

    impl StubFetcher {
        fn with_robots(body: &str) -> Self {
            let mut responses = HashMap::new();
            responses.insert("/robots.txt".to_string(), (200, body.to_string()));
            Self {
                responses,
                fetches: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                responses: HashMap::new(),
                fetches: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl Fetcher for StubFetcher {
        fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);

            if self.fail {
                return Err(FetchError::Timeout);
            }

            let (status, body) = self
                .responses
                .get(url.path())
                .cloned()
                .unwrap_or((404, String::new()));

            Ok(FetchedPage {
                final_url: url.clone(),
                status_code: status,
                content_type: Some("text/plain".to_string()),
                body: body.into_bytes(),
                elapsed: std::time::Duration::from_millis(1),
            })
        }
    }

    fn cache_with(fetcher: StubFetcher) -> (PolitenessCache, Arc<StubFetcher>) {
        let fetcher = Arc::new(fetcher);
        let mut config = Config::default();
        config.user_agent.name = "TestBot".to_string();
        let cache = PolitenessCache::new(&config, Arc::clone(&fetcher) as Arc<dyn Fetcher>);
        (cache, fetcher)
    }

    #[test]
    fn test_disallow_rule_enforced() {
        let (cache, _) = cache_with(StubFetcher::with_robots(
            "User-agent: *\nDisallow: /private",
        ));

        let blocked = Url::parse("https://example.com/private/page").unwrap();
        let open = Url::parse("https://example.com/public").unwrap();

        assert!(!cache.is_allowed(&blocked, "TestBot"));
        assert!(cache.is_allowed(&open, "TestBot"));
    }

    #[test]
    fn test_rules_fetched_once_per_domain() {
        let (cache, fetcher) = cache_with(StubFetcher::with_robots("User-agent: *\nDisallow:"));

        let url = Url::parse("https://example.com/a").unwrap();
        cache.is_allowed(&url, "TestBot");
        cache.is_allowed(&url, "TestBot");
        cache.is_allowed(&url, "TestBot");

        assert_eq!(fetcher.fetch_count(), 1);
        assert_eq!(cache.cached_domains(), 1);
    }

    #[test]
    fn test_fetch_failure_fails_open() {
        let (cache, _) = cache_with(StubFetcher::failing());

        let url = Url::parse("https://example.com/anything").unwrap();
        assert!(cache.is_allowed(&url, "TestBot"));
    }

    #[test]
    fn test_missing_robots_allows_all() {
        let (cache, _) = cache_with(StubFetcher {
            responses: HashMap::new(),
            fetches: AtomicUsize::new(0),
            fail: false,
        });

        let url = Url::parse("https://example.com/page").unwrap();
        assert!(cache.is_allowed(&url, "TestBot"));
    }

    #[test]
    fn test_respect_robots_disabled_skips_fetch() {
        let fetcher = Arc::new(StubFetcher::with_robots("User-agent: *\nDisallow: /"));
        let mut config = Config::default();
        config.crawler.respect_robots_txt = false;
        let cache = PolitenessCache::new(&config, Arc::clone(&fetcher) as Arc<dyn Fetcher>);

        let url = Url::parse("https://example.com/anything").unwrap();
        assert!(cache.is_allowed(&url, "TestBot"));
        assert_eq!(fetcher.fetch_count(), 0);
        assert_eq!(cache.crawl_delay("example.com"), None);
    }

    #[test]
    fn test_crawl_delay_from_cached_rules() {
        let (cache, _) = cache_with(StubFetcher::with_robots(
            "User-agent: *\nCrawl-delay: 3\nDisallow: /admin",
        ));

        let url = Url::parse("https://example.com/page").unwrap();
        cache.is_allowed(&url, "TestBot");

        assert_eq!(
            cache.crawl_delay("example.com"),
            Some(Duration::from_secs(3))
        );
        assert_eq!(cache.crawl_delay("other.example"), None);
    }

    #[test]
    fn test_sitemap_urls_from_cached_rules() {
        let (cache, _) = cache_with(StubFetcher::with_robots(
            "Sitemap: https://example.com/sitemap.xml\nUser-agent: *\nDisallow:",
        ));

        let url = Url::parse("https://example.com/").unwrap();
        cache.is_allowed(&url, "TestBot");

        let sitemaps = cache.sitemap_urls("example.com");
        assert_eq!(sitemaps.len(), 1);
        assert_eq!(sitemaps[0].as_str(), "https://example.com/sitemap.xml");
    }

    #[test]
    fn test_stale_entry_refreshed() {
        let (cache, fetcher) = cache_with(StubFetcher::with_robots("User-agent: *\nDisallow:"));

        let url = Url::parse("https://example.com/").unwrap();
        cache.is_allowed(&url, "TestBot");
        assert_eq!(fetcher.fetch_count(), 1);

        // Age the entry past the TTL
        {
            let mut entries = cache.entries.write().unwrap();
            let cached = entries.get_mut("example.com").unwrap();
            cached.fetched_at = Utc::now() - ChronoDuration::hours(25);
        }

        cache.is_allowed(&url, "TestBot");
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[test]
    fn test_sitemap_entries_fetch() {
        let mut responses = HashMap::new();
        responses.insert(
            "/sitemap.xml".to_string(),
            (
                200,
                "<urlset><url><loc>https://example.com/a</loc></url></urlset>".to_string(),
            ),
        );
        let (cache, _) = cache_with(StubFetcher {
            responses,
            fetches: AtomicUsize::new(0),
            fail: false,
        });

        let sitemap_url = Url::parse("https://example.com/sitemap.xml").unwrap();
        let entries = cache.sitemap_entries(&sitemap_url);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url.as_str(), "https://example.com/a");
    }
}
