use serde::Deserialize;

/// Main configuration structure for the crawl engine
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// URLs to seed the frontier with
    #[serde(rename = "seed-urls", default)]
    pub seed_urls: Vec<String>,

    /// Maximum depth to crawl from seed URLs
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum number of URLs ever admitted to the frontier
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: usize,

    /// Whether to fetch and honor robots.txt (fail-open on fetch errors)
    #[serde(rename = "respect-robots-txt", default = "default_true")]
    pub respect_robots_txt: bool,

    /// Per-request timeout in seconds
    #[serde(rename = "timeout-seconds", default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// How many times a transient fetch failure is requeued before the URL
    /// is marked failed
    #[serde(rename = "retry-limit", default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Interval between progress log lines and housekeeping passes, seconds
    #[serde(rename = "status-interval-seconds", default = "default_status_interval")]
    pub status_interval_seconds: u64,
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Upper bound on the in-memory frontier queue length
    #[serde(rename = "queue-capacity", default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Politeness configuration (robots.txt and request pacing)
#[derive(Debug, Clone, Deserialize)]
pub struct PolitenessConfig {
    /// Sliding-window request cap per domain
    #[serde(rename = "max-requests-per-minute", default = "default_rpm")]
    pub max_requests_per_minute: u32,

    /// Delay applied between requests to a domain when robots.txt does not
    /// declare a crawl-delay
    #[serde(rename = "default-crawl-delay-ms", default)]
    pub default_crawl_delay_ms: u64,

    /// How long a cached robots.txt entry stays fresh
    #[serde(rename = "cache-ttl-hours", default = "default_ttl_hours")]
    pub cache_ttl_hours: u64,
}

/// Resource budget configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Advisory cap on memory held for page bodies, megabytes (0 = unlimited)
    #[serde(rename = "max-memory-mb", default = "default_max_memory_mb")]
    pub max_memory_mb: u64,

    /// Minimum free disk space required before storing content, megabytes
    /// (0 = no check)
    #[serde(rename = "min-free-disk-mb", default)]
    pub min_free_disk_mb: u64,
}

/// Storage paths configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: String,

    /// Directory for memory-mapped page content files
    #[serde(rename = "content-dir", default = "default_content_dir")]
    pub content_dir: String,

    /// Whether to persist page bodies (and discovered images) to disk
    #[serde(rename = "save-content", default = "default_true")]
    pub save_content: bool,

    /// File extensions treated as storable images by the image pipeline
    #[serde(rename = "image-extensions", default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

impl StorageConfig {
    /// Whether a URL path ends in one of the configured image extensions
    pub fn is_image_url(&self, path: &str) -> bool {
        let lower = path.to_lowercase();
        self.image_extensions
            .iter()
            .any(|ext| lower.ends_with(&format!(".{}", ext)))
    }
}

/// URL admission filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FiltersConfig {
    /// Domain suffix patterns URLs must match (empty = allow all domains).
    /// Supports `example.com` and `*.example.com` forms.
    #[serde(rename = "allowed-domains", default)]
    pub allowed_domains: Vec<String>,

    /// Path prefixes that reject a URL at admission
    #[serde(rename = "excluded-paths", default)]
    pub excluded_paths: Vec<String>,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(default = "default_ua_name")]
    pub name: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url", default = "default_contact_url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email", default = "default_contact_email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Composes the full User-Agent string sent with every request
    ///
    /// Format: `Name/Version (+ContactURL; ContactEmail)`
    pub fn user_agent_string(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.name,
            env!("CARGO_PKG_VERSION"),
            self.contact_url,
            self.contact_email
        )
    }
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_pages() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_retry_limit() -> u32 {
    2
}

fn default_status_interval() -> u64 {
    10
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_rpm() -> u32 {
    60
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_max_memory_mb() -> u64 {
    512
}

fn default_database_path() -> String {
    "./spinneret.db".to_string()
}

fn default_content_dir() -> String {
    "./content".to_string()
}

fn default_image_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif", "webp", "svg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_ua_name() -> String {
    "Spinneret".to_string()
}

fn default_contact_url() -> String {
    "https://example.com/spinneret".to_string()
}

fn default_contact_email() -> String {
    "crawler@example.com".to_string()
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            seed_urls: Vec::new(),
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            respect_robots_txt: true,
            timeout_seconds: default_timeout_seconds(),
            retry_limit: default_retry_limit(),
            status_interval_seconds: default_status_interval(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: default_rpm(),
            default_crawl_delay_ms: 0,
            cache_ttl_hours: default_ttl_hours(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: default_max_memory_mb(),
            min_free_disk_mb: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            content_dir: default_content_dir(),
            save_content: true,
            image_extensions: default_image_extensions(),
        }
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            name: default_ua_name(),
            contact_url: default_contact_url(),
            contact_email: default_contact_email(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig::default(),
            pool: PoolConfig::default(),
            politeness: PolitenessConfig::default(),
            limits: LimitsConfig::default(),
            storage: StorageConfig::default(),
            filters: FiltersConfig::default(),
            user_agent: UserAgentConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pool.workers, 4);
        assert_eq!(config.crawler.max_depth, 3);
        assert_eq!(config.politeness.max_requests_per_minute, 60);
        assert!(config.crawler.respect_robots_txt);
        assert!(config.filters.allowed_domains.is_empty());
    }

    #[test]
    fn test_is_image_url() {
        let storage = StorageConfig::default();
        assert!(storage.is_image_url("/assets/logo.PNG"));
        assert!(storage.is_image_url("/pic.jpeg"));
        assert!(!storage.is_image_url("/page.html"));
        assert!(!storage.is_image_url("/png"));
    }

    #[test]
    fn test_user_agent_string_format() {
        let ua = UserAgentConfig {
            name: "TestBot".to_string(),
            contact_url: "https://example.com/bot".to_string(),
            contact_email: "bot@example.com".to_string(),
        };

        let s = ua.user_agent_string();
        assert!(s.starts_with("TestBot/"));
        assert!(s.contains("+https://example.com/bot"));
        assert!(s.ends_with("bot@example.com)"));
    }
}
