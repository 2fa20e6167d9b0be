//! Stored-crawl statistics
//!
//! Reads summary numbers out of an existing crawl database for the
//! `--stats` report. This looks at what previous runs persisted, not at
//! the live counters of a running crawl.

use crate::state::QueueState;
use crate::storage::{PageStore, StorageResult};
use std::collections::HashMap;

/// Summary of what a crawl database contains
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Pages with a row in the pages table
    pub total_pages: u64,

    /// Distinct domains across stored pages
    pub unique_domains: u64,

    /// Sum of stored content sizes in bytes
    pub bytes_stored: u64,

    /// Pages whose error count is nonzero
    pub failed_pages: u64,

    /// Queue rows grouped by state
    pub queue_by_state: HashMap<QueueState, u64>,
}

/// Loads summary statistics from a crawl database
pub fn load_statistics(store: &PageStore) -> StorageResult<CrawlStatistics> {
    let mut queue_by_state = HashMap::new();
    for state in [
        QueueState::Queued,
        QueueState::Processing,
        QueueState::Done,
        QueueState::Failed,
    ] {
        let count = store.count_queue_by_state(state)?;
        if count > 0 {
            queue_by_state.insert(state, count);
        }
    }

    Ok(CrawlStatistics {
        total_pages: store.count_pages()?,
        unique_domains: store.count_domains()?,
        bytes_stored: store.bytes_stored()?,
        failed_pages: store.count_failed_pages()?,
        queue_by_state,
    })
}

/// Prints a statistics report to stdout
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Pages stored: {}", stats.total_pages);
    println!("  Unique domains: {}", stats.unique_domains);
    println!("  Content bytes: {}", stats.bytes_stored);
    println!("  Failed pages: {}", stats.failed_pages);
    println!();

    if !stats.queue_by_state.is_empty() {
        println!("Queue:");
        let mut counts: Vec<_> = stats.queue_by_state.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1));
        for (state, count) in counts {
            println!("  {}: {}", state.to_db_string(), count);
        }
        println!();
    }

    let success_rate = if stats.total_pages > 0 {
        let succeeded = stats.total_pages.saturating_sub(stats.failed_pages);
        (succeeded as f64 / stats.total_pages as f64) * 100.0
    } else {
        0.0
    };
    println!("Success rate: {:.1}%", success_rate);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PageRecord;

    #[test]
    fn test_load_statistics_from_store() {
        let store = PageStore::open_in_memory().unwrap();

        let mut record = PageRecord::new("https://a.example/", "a.example", 0);
        record.content_size = Some(2048);
        store.upsert_page(&record).unwrap();
        store
            .upsert_page(&PageRecord::new("https://b.example/", "b.example", 0))
            .unwrap();
        store
            .record_failure("https://c.example/", "HTTP 500")
            .unwrap();

        store.enqueue("https://a.example/next", 1, 1).unwrap();
        store.enqueue("https://a.example/done", 1, 1).unwrap();
        store
            .mark_queue_done("https://a.example/done", true)
            .unwrap();

        let stats = load_statistics(&store).unwrap();
        assert_eq!(stats.total_pages, 3);
        assert_eq!(stats.unique_domains, 3);
        assert_eq!(stats.bytes_stored, 2048);
        assert_eq!(stats.failed_pages, 1);
        assert_eq!(stats.queue_by_state.get(&QueueState::Queued), Some(&1));
        assert_eq!(stats.queue_by_state.get(&QueueState::Done), Some(&1));
    }

    #[test]
    fn test_empty_database_statistics() {
        let store = PageStore::open_in_memory().unwrap();
        let stats = load_statistics(&store).unwrap();

        assert_eq!(stats.total_pages, 0);
        assert!(stats.queue_by_state.is_empty());
    }
}
