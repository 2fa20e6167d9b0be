//! Persistent storage
//!
//! Two stores back a crawl: the [`PageStore`] keeps page metadata and the
//! durable URL queue in SQLite, and the [`ContentStore`] keeps raw page
//! bodies in memory-mapped files on disk.

mod content;
mod pages;
mod schema;

pub use content::ContentStore;
pub use pages::PageStore;
pub use schema::initialize_schema;

use crate::state::QueueState;
use thiserror::Error;

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem error from the content store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Memory-mapping failure
    #[error("mmap error: {0}")]
    Map(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A row in the `pages` table
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub id: i64,
    pub url: String,
    pub domain: String,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub depth: u32,
    pub content_path: Option<String>,
    pub content_size: Option<u64>,
    pub fetched_at: Option<String>,
    pub error_count: u32,
    pub annotations: Option<String>,
}

impl PageRecord {
    /// A record for a freshly crawled page, before storage details are
    /// filled in
    pub fn new(url: &str, domain: &str, depth: u32) -> Self {
        Self {
            id: 0,
            url: url.to_string(),
            domain: domain.to_string(),
            status_code: None,
            content_type: None,
            title: None,
            depth,
            content_path: None,
            content_size: None,
            fetched_at: None,
            error_count: 0,
            annotations: None,
        }
    }
}

/// A row in the `url_queue` table
#[derive(Debug, Clone)]
pub struct QueueRecord {
    pub id: i64,
    pub url: String,
    pub depth: u32,
    pub priority: u32,
    pub state: QueueState,
    pub enqueued_at: String,
    pub updated_at: String,
}
