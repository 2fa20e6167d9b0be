//! Spinneret main entry point
//!
//! Command-line interface for the Spinneret crawl engine.

use anyhow::Context;
use clap::Parser;
use spinneret::config::{load_config, Config};
use spinneret::CrawlEngine;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Spinneret: a polite, multi-threaded web crawler
///
/// Spinneret crawls websites while respecting robots.txt rules and
/// per-domain rate limits, persisting pages into a SQLite database and
/// a memory-mapped content store.
#[derive(Parser, Debug)]
#[command(name = "spinneret")]
#[command(version)]
#[command(about = "A polite, multi-threaded web crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG", default_value = "crawler.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Re-admit queued URLs left over from an interrupted run
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Delete the database and content directory before crawling
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from an existing database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Override the configured page limit
    #[arg(long, value_name = "N")]
    max_pages: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    if let Some(max_pages) = cli.max_pages {
        config.crawler.max_pages = max_pages;
    }

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, cli.fresh, cli.resume)?;
    }

    Ok(())
}

/// Sets up the tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("spinneret=info,warn"),
            1 => EnvFilter::new("spinneret=debug,info"),
            2 => EnvFilter::new("spinneret=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --dry-run: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Spinneret Dry Run ===\n");

    println!("Crawler:");
    println!("  Max depth: {}", config.crawler.max_depth);
    println!("  Max pages: {}", config.crawler.max_pages);
    println!("  Workers: {}", config.pool.workers);
    println!("  Respect robots.txt: {}", config.crawler.respect_robots_txt);
    println!("  Retry limit: {}", config.crawler.retry_limit);

    println!("\nPoliteness:");
    println!(
        "  Max requests/minute per domain: {}",
        config.politeness.max_requests_per_minute
    );
    println!(
        "  Default crawl delay: {}ms",
        config.politeness.default_crawl_delay_ms
    );

    println!("\nUser agent:");
    println!("  {}", config.user_agent.user_agent_string());

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Content dir: {}", config.storage.content_dir);
    println!("  Save content: {}", config.storage.save_content);

    if !config.filters.allowed_domains.is_empty() {
        println!("\nAllowed domains ({}):", config.filters.allowed_domains.len());
        for domain in &config.filters.allowed_domains {
            println!("  - {}", domain);
        }
    }
    if !config.filters.excluded_paths.is_empty() {
        println!("\nExcluded paths ({}):", config.filters.excluded_paths.len());
        for path in &config.filters.excluded_paths {
            println!("  - {}", path);
        }
    }

    println!("\nSeed URLs ({}):", config.crawler.seed_urls.len());
    for seed in &config.crawler.seed_urls {
        println!("  - {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles --stats: prints a report from an existing database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use spinneret::output::{load_statistics, print_statistics};
    use spinneret::storage::PageStore;

    println!("Database: {}\n", config.storage.database_path);

    let store = PageStore::open(Path::new(&config.storage.database_path))?;
    let stats = load_statistics(&store)?;
    print_statistics(&stats);

    Ok(())
}

/// Runs a crawl to completion
fn handle_crawl(config: Config, fresh: bool, resume: bool) -> anyhow::Result<()> {
    if fresh {
        remove_previous_run(&config)?;
        tracing::info!("Starting fresh crawl (previous state deleted)");
    } else if resume {
        tracing::info!("Starting crawl, resuming pending URLs");
    }

    let engine = CrawlEngine::new(config)?.with_resume(resume);
    engine.start()?;

    while !engine.wait_for_completion(Duration::from_secs(1)) {}
    engine.stop()?;

    let stats = engine.stats();
    println!(
        "Crawl finished: {} pages crawled, {} failed, {} images, {} bytes stored",
        stats.crawled, stats.failed, stats.images_stored, stats.bytes_stored
    );
    Ok(())
}

/// Deletes the database (and its WAL sidecars) and the content directory
fn remove_previous_run(config: &Config) -> anyhow::Result<()> {
    let db = &config.storage.database_path;
    for path in [db.clone(), format!("{}-wal", db), format!("{}-shm", db)] {
        let path = PathBuf::from(path);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to delete {}", path.display()))
            }
        }
    }

    let content_dir = Path::new(&config.storage.content_dir);
    match std::fs::remove_dir_all(content_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to delete {}", content_dir.display()))
        }
    }
    Ok(())
}
