//! SQLite-backed page metadata and durable URL queue
//!
//! The [`PageStore`] is shared by every worker thread; a mutex serializes
//! access to the single connection. The `url_queue` table mirrors the
//! in-memory frontier so an interrupted crawl can be resumed, and its
//! UNIQUE url constraint is the second dedup line behind the frontier's
//! visited set.

use crate::state::QueueState;
use crate::storage::schema::initialize_schema;
use crate::storage::{PageRecord, QueueRecord, StorageResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;
use url::Url;

/// Page metadata and queue persistence
pub struct PageStore {
    conn: Mutex<Connection>,
}

impl PageStore {
    /// Opens (or creates) the database at `path`
    ///
    /// Schema failures here are fatal to the crawl; runtime errors later
    /// only fail the URL being processed.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory store (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ===== Queue =====

    /// Enqueues a URL into the durable queue
    ///
    /// Idempotent: a URL already present (in any state) is left untouched.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The URL was newly enqueued
    /// * `Ok(false)` - The URL was already in the queue
    pub fn enqueue(&self, url: &str, depth: u32, priority: u32) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now().to_rfc3339();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO url_queue (url, depth, priority, state, enqueued_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![url, depth, priority, QueueState::Queued.to_db_string(), now],
        )?;

        Ok(inserted > 0)
    }

    /// Atomically claims the best queued row
    ///
    /// Selects the highest-priority (lowest value, oldest id) row in
    /// `Queued` state and flips it to `Processing` in one transaction, so
    /// no two callers can claim the same row.
    pub fn dequeue_next(&self) -> StorageResult<Option<QueueRecord>> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction()?;

        let record = tx
            .query_row(
                "SELECT id, url, depth, priority, state, enqueued_at, updated_at
                 FROM url_queue WHERE state = ?1
                 ORDER BY priority ASC, id ASC LIMIT 1",
                params![QueueState::Queued.to_db_string()],
                |row| {
                    Ok(QueueRecord {
                        id: row.get(0)?,
                        url: row.get(1)?,
                        depth: row.get(2)?,
                        priority: row.get(3)?,
                        state: QueueState::from_db_string(&row.get::<_, String>(4)?)
                            .unwrap_or(QueueState::Queued),
                        enqueued_at: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()?;

        let record = match record {
            Some(mut record) => {
                let now = Utc::now().to_rfc3339();
                tx.execute(
                    "UPDATE url_queue SET state = ?1, updated_at = ?2 WHERE id = ?3",
                    params![QueueState::Processing.to_db_string(), now, record.id],
                )?;
                record.state = QueueState::Processing;
                record.updated_at = now;
                Some(record)
            }
            None => None,
        };

        tx.commit()?;
        Ok(record)
    }

    /// Flips a specific queue row to `Processing`
    ///
    /// Used when the in-memory frontier (not the queue table) decided
    /// which URL runs next.
    pub fn mark_queue_processing(&self, url: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE url_queue SET state = ?1, updated_at = ?2 WHERE url = ?3",
            params![
                QueueState::Processing.to_db_string(),
                Utc::now().to_rfc3339(),
                url
            ],
        )?;
        Ok(())
    }

    /// Marks a queue row terminal
    pub fn mark_queue_done(&self, url: &str, success: bool) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let state = if success {
            QueueState::Done
        } else {
            QueueState::Failed
        };

        conn.execute(
            "UPDATE url_queue SET state = ?1, updated_at = ?2 WHERE url = ?3",
            params![state.to_db_string(), Utc::now().to_rfc3339(), url],
        )?;
        Ok(())
    }

    /// Requeues a claimed row, for rate-denied or retried URLs
    pub fn requeue(&self, url: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE url_queue SET state = ?1, updated_at = ?2 WHERE url = ?3",
            params![
                QueueState::Queued.to_db_string(),
                Utc::now().to_rfc3339(),
                url
            ],
        )?;
        Ok(())
    }

    /// URLs left in non-terminal states, for `--resume`
    ///
    /// Rows stuck in `Processing` from an interrupted run are included;
    /// they were claimed but never finished.
    pub fn pending_urls(&self) -> StorageResult<Vec<(String, u32, u32)>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT url, depth, priority FROM url_queue
             WHERE state IN (?1, ?2) ORDER BY priority ASC, id ASC",
        )?;

        let urls = stmt
            .query_map(
                params![
                    QueueState::Queued.to_db_string(),
                    QueueState::Processing.to_db_string()
                ],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        debug!(count = urls.len(), "loaded pending queue rows");
        Ok(urls)
    }

    /// Number of queue rows in a given state
    pub fn count_queue_by_state(&self, state: QueueState) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM url_queue WHERE state = ?1",
            params![state.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Pages =====

    /// Inserts or updates the metadata row for a crawled page
    ///
    /// An existing row keeps its accumulated `error_count`.
    pub fn upsert_page(&self, record: &PageRecord) -> StorageResult<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        conn.execute(
            "INSERT INTO pages (url, domain, status_code, content_type, title, depth,
                                content_path, content_size, fetched_at, error_count, annotations)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(url) DO UPDATE SET
                 domain = excluded.domain,
                 status_code = excluded.status_code,
                 content_type = excluded.content_type,
                 title = excluded.title,
                 depth = excluded.depth,
                 content_path = excluded.content_path,
                 content_size = excluded.content_size,
                 fetched_at = excluded.fetched_at,
                 annotations = excluded.annotations",
            params![
                record.url,
                record.domain,
                record.status_code,
                record.content_type,
                record.title,
                record.depth,
                record.content_path,
                record.content_size,
                record.fetched_at,
                record.error_count,
                record.annotations,
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM pages WHERE url = ?1",
            params![record.url],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Looks up the metadata row for a URL
    pub fn get_page(&self, url: &str) -> StorageResult<Option<PageRecord>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, url, domain, status_code, content_type, title, depth,
                    content_path, content_size, fetched_at, error_count, annotations
             FROM pages WHERE url = ?1",
        )?;

        let page = stmt
            .query_row(params![url], |row| {
                Ok(PageRecord {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    domain: row.get(2)?,
                    status_code: row.get(3)?,
                    content_type: row.get(4)?,
                    title: row.get(5)?,
                    depth: row.get(6)?,
                    content_path: row.get(7)?,
                    content_size: row.get(8)?,
                    fetched_at: row.get(9)?,
                    error_count: row.get(10)?,
                    annotations: row.get(11)?,
                })
            })
            .optional()?;

        Ok(page)
    }

    /// Records a failure for a URL and returns the new error count
    ///
    /// Creates the page row if this URL never got one (failed before any
    /// successful fetch).
    pub fn record_failure(&self, url: &str, error: &str) -> StorageResult<u32> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let domain = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_default();

        conn.execute(
            "INSERT INTO pages (url, domain, error_count, error_message)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(url) DO UPDATE SET
                 error_count = error_count + 1,
                 error_message = excluded.error_message",
            params![url, domain, error],
        )?;

        let count: u32 = conn.query_row(
            "SELECT error_count FROM pages WHERE url = ?1",
            params![url],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ===== Statistics =====

    /// Total number of page rows
    pub fn count_pages(&self) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Number of distinct domains with at least one page row
    pub fn count_domains(&self) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 =
            conn.query_row("SELECT COUNT(DISTINCT domain) FROM pages", [], |row| {
                row.get(0)
            })?;
        Ok(count as u64)
    }

    /// Number of pages with at least one recorded failure
    pub fn count_failed_pages(&self) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pages WHERE error_count > 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Total bytes of stored content across all pages
    pub fn bytes_stored(&self) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let total: Option<i64> = conn.query_row(
            "SELECT SUM(content_size) FROM pages",
            [],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0) as u64)
    }

    // ===== Maintenance =====

    /// Runs the end-of-crawl maintenance pass
    pub fn optimize(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(
            "
            PRAGMA optimize;
            PRAGMA wal_checkpoint(TRUNCATE);
        ",
        )?;
        Ok(())
    }

    /// Reclaims free pages in the database file
    pub fn vacuum(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch("VACUUM;")?;
        Ok(())
    }
}
