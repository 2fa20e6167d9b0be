//! End-to-end crawl tests
//!
//! These tests run the engine against wiremock HTTP servers. The engine
//! is fully blocking, so each crawl runs inside `spawn_blocking` while
//! the mock server lives on the tokio runtime.

use spinneret::config::Config;
use spinneret::output::load_statistics;
use spinneret::state::QueueState;
use spinneret::storage::PageStore;
use spinneret::{CrawlEngine, CrawlerState, StatsSnapshot};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a config pointed at a temp directory and the mock server
fn test_config(dir: &Path, seeds: Vec<String>, allowed: Vec<String>) -> Config {
    let mut config = Config::default();
    config.crawler.seed_urls = seeds;
    config.crawler.max_depth = 2;
    config.crawler.max_pages = 50;
    config.crawler.timeout_seconds = 5;
    config.crawler.retry_limit = 1;
    config.crawler.status_interval_seconds = 60;
    config.pool.workers = 2;
    config.politeness.max_requests_per_minute = 10_000;
    config.politeness.default_crawl_delay_ms = 0;
    config.storage.database_path = dir.join("crawl.db").to_string_lossy().into_owned();
    config.storage.content_dir = dir.join("content").to_string_lossy().into_owned();
    config.filters.allowed_domains = allowed;
    config
}

/// Runs a crawl to natural completion on a blocking thread
async fn run_crawl(config: Config) -> (StatsSnapshot, CrawlerState) {
    tokio::task::spawn_blocking(move || {
        let engine = CrawlEngine::new(config).expect("failed to build engine");
        engine.start().expect("failed to start crawl");
        assert!(
            engine.wait_for_completion(Duration::from_secs(30)),
            "crawl did not finish in time"
        );
        engine.stop().expect("failed to stop crawl");
        (engine.stats(), engine.state())
    })
    .await
    .expect("crawl thread panicked")
}

async fn mount_html(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
        .mount(server)
        .await;
}

async fn mount_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_crawl_follows_links() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    mount_html(
        &server,
        "/",
        format!(
            r#"<html><head><title>Home</title></head><body>
            <a href="{base}/page1">One</a>
            <a href="{base}/page2">Two</a>
            <a href="http://offsite.example/x">Offsite</a>
            </body></html>"#
        ),
    )
    .await;
    mount_html(&server, "/page1", "<html><body>one</body></html>".to_string()).await;
    mount_html(&server, "/page2", "<html><body>two</body></html>".to_string()).await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(
        dir.path(),
        vec![format!("{base}/")],
        vec!["127.0.0.1".to_string()],
    );
    let db_path = config.storage.database_path.clone();

    let (stats, state) = run_crawl(config).await;

    assert_eq!(stats.crawled, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(state, CrawlerState::Stopped);

    // Everything the crawl admitted should be terminal in the queue
    let store = PageStore::open(Path::new(&db_path)).unwrap();
    assert_eq!(store.count_pages().unwrap(), 3);
    assert_eq!(store.count_queue_by_state(QueueState::Done).unwrap(), 3);
    assert_eq!(store.count_queue_by_state(QueueState::Queued).unwrap(), 0);

    let report = load_statistics(&store).unwrap();
    assert_eq!(report.total_pages, 3);
    assert_eq!(report.failed_pages, 0);
}

#[tokio::test]
async fn test_robots_disallow_blocks_path() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nDisallow: /admin").await;
    mount_html(
        &server,
        "/",
        format!(
            r#"<html><body>
            <a href="{base}/allowed">Allowed</a>
            <a href="{base}/admin">Admin</a>
            </body></html>"#
        ),
    )
    .await;
    mount_html(
        &server,
        "/allowed",
        "<html><body>fine</body></html>".to_string(),
    )
    .await;

    // The disallowed page must never be fetched
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(
        dir.path(),
        vec![format!("{base}/")],
        vec!["127.0.0.1".to_string()],
    );

    let (stats, _) = run_crawl(config).await;

    assert_eq!(stats.crawled, 2);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_robots_fetch_failure_fails_open() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_html(
        &server,
        "/",
        format!(r#"<html><body><a href="{base}/page1">One</a></body></html>"#),
    )
    .await;
    mount_html(&server, "/page1", "<html><body>one</body></html>".to_string()).await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(
        dir.path(),
        vec![format!("{base}/")],
        vec!["127.0.0.1".to_string()],
    );

    let (stats, _) = run_crawl(config).await;

    assert_eq!(stats.crawled, 2);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_depth_limit_stops_the_chain() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    mount_html(
        &server,
        "/",
        format!(r#"<html><body><a href="{base}/level1">1</a></body></html>"#),
    )
    .await;
    mount_html(
        &server,
        "/level1",
        format!(r#"<html><body><a href="{base}/level2">2</a></body></html>"#),
    )
    .await;
    mount_html(
        &server,
        "/level2",
        format!(r#"<html><body><a href="{base}/level3">3</a></body></html>"#),
    )
    .await;

    // Depth 3 with max_depth 2; must never be fetched
    Mock::given(method("GET"))
        .and(path("/level3"))
        .respond_with(ResponseTemplate::new(200).set_body_string("too deep"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(
        dir.path(),
        vec![format!("{base}/")],
        vec!["127.0.0.1".to_string()],
    );

    let (stats, _) = run_crawl(config).await;

    assert_eq!(stats.crawled, 3);
}

#[tokio::test]
async fn test_normalization_deduplicates_link_variants() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    mount_html(
        &server,
        "/",
        format!(
            r#"<html><body>
            <a href="{base}/page1">plain</a>
            <a href="{base}/page1#section">fragment</a>
            <a href="{base}/page1?utm_source=mail">tracking</a>
            </body></html>"#
        ),
    )
    .await;

    // All three variants normalize to the same URL; one fetch only
    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html><body>one</body></html>", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(
        dir.path(),
        vec![format!("{base}/")],
        vec!["127.0.0.1".to_string()],
    );

    let (stats, _) = run_crawl(config).await;

    assert_eq!(stats.crawled, 2);
    assert_eq!(stats.discovered, 2);
}

#[tokio::test]
async fn test_transient_failure_respects_retry_budget() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    mount_html(
        &server,
        "/",
        format!(r#"<html><body><a href="{base}/flaky">flaky</a></body></html>"#),
    )
    .await;

    // retry_limit is 1: one initial attempt plus one retry
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(
        dir.path(),
        vec![format!("{base}/")],
        vec!["127.0.0.1".to_string()],
    );
    let db_path = config.storage.database_path.clone();

    let (stats, _) = run_crawl(config).await;

    assert_eq!(stats.crawled, 1);
    assert_eq!(stats.failed, 1);

    let store = PageStore::open(Path::new(&db_path)).unwrap();
    assert_eq!(store.count_queue_by_state(QueueState::Failed).unwrap(), 1);
    assert_eq!(store.count_failed_pages().unwrap(), 1);
}

#[tokio::test]
async fn test_content_persisted_to_store() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    mount_html(
        &server,
        "/",
        "<html><head><title>Stored</title></head><body>payload</body></html>".to_string(),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(
        dir.path(),
        vec![format!("{base}/")],
        vec!["127.0.0.1".to_string()],
    );
    let db_path = config.storage.database_path.clone();

    let (stats, _) = run_crawl(config).await;

    assert_eq!(stats.crawled, 1);
    assert!(stats.bytes_stored > 0);

    let store = PageStore::open(Path::new(&db_path)).unwrap();
    let record = store
        .get_page(&format!("{base}/"))
        .unwrap()
        .expect("page row missing");
    assert_eq!(record.title.as_deref(), Some("Stored"));
    assert_eq!(record.status_code, Some(200));

    let content_path = record.content_path.expect("content path missing");
    let bytes = std::fs::read(&content_path).unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("payload"));
}
