//! Memory-mapped page body storage
//!
//! One file per stored URL under `content-dir/<domain>/`, written through
//! a memory map. Bodies are flushed (msync) before a store call reports
//! success, so a crash never leaves a page row pointing at unwritten
//! content. Growth uses remap-and-copy: the old map is dropped, the file
//! extended, and a new map created.

use crate::storage::{StorageError, StorageResult};
use memmap2::MmapMut;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;
use url::Url;

/// Longest sanitized stem before the hash suffix is appended
const MAX_STEM_LEN: usize = 100;

/// An open memory-mapped content file
struct MappedPage {
    path: PathBuf,
    file: File,

    /// `None` only for zero-length bodies, which cannot be mapped
    map: Option<MmapMut>,

    /// Logical length of the stored body
    len: usize,

    /// Current file and map size; kept equal to `len` so the on-disk
    /// file never carries a stale tail
    capacity: usize,
}

/// Stores raw page bodies in per-URL memory-mapped files
pub struct ContentStore {
    root: PathBuf,
    pages: Mutex<HashMap<String, MappedPage>>,
}

impl ContentStore {
    /// Opens a content store rooted at `root`, creating the directory if
    /// needed
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            pages: Mutex::new(HashMap::new()),
        })
    }

    /// Stores a page body, replacing any previous body for the URL
    ///
    /// The body is flushed to disk before this returns; a flush failure
    /// fails the store call.
    ///
    /// # Returns
    ///
    /// The file path and stored length, for the page's metadata row.
    pub fn store(&self, url: &Url, bytes: &[u8]) -> StorageResult<(PathBuf, u64)> {
        self.store_at(url, None, "html", bytes)
    }

    /// Stores an image body under the domain's `images/` subdirectory
    ///
    /// The file keeps the URL's extension so stored images stay openable.
    pub fn store_image(&self, url: &Url, bytes: &[u8]) -> StorageResult<(PathBuf, u64)> {
        let ext = url
            .path()
            .rsplit('.')
            .next()
            .filter(|e| e.len() <= 4 && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin")
            .to_lowercase();
        self.store_at(url, Some("images"), &ext, bytes)
    }

    /// Loads a stored body
    ///
    /// Falls back to reading the file from disk when the URL was stored by
    /// an earlier run and has no live map.
    pub fn load(&self, url: &Url) -> Option<Vec<u8>> {
        let key = url.as_str().to_string();

        {
            let pages = self.pages.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(page) = pages.get(&key) {
                return match &page.map {
                    Some(map) => Some(map[..page.len].to_vec()),
                    None => Some(Vec::new()),
                };
            }
        }

        let path = self.page_path(url, None, "html");
        fs::read(path).ok()
    }

    /// Removes a stored body and its file
    pub fn remove(&self, url: &Url) -> StorageResult<()> {
        let key = url.as_str().to_string();
        let mut pages = self.pages.lock().unwrap_or_else(|e| e.into_inner());

        let path = match pages.remove(&key) {
            Some(page) => page.path,
            None => self.page_path(url, None, "html"),
        };

        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Flushes every live map to disk
    pub fn flush_all(&self) -> StorageResult<()> {
        let pages = self.pages.lock().unwrap_or_else(|e| e.into_inner());
        for page in pages.values() {
            if let Some(map) = &page.map {
                map.flush()?;
            }
        }
        Ok(())
    }

    /// Total bytes held across all live maps
    pub fn total_bytes(&self) -> u64 {
        let pages = self.pages.lock().unwrap_or_else(|e| e.into_inner());
        pages.values().map(|p| p.len as u64).sum()
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_at(
        &self,
        url: &Url,
        subdir: Option<&str>,
        ext: &str,
        bytes: &[u8],
    ) -> StorageResult<(PathBuf, u64)> {
        let key = url.as_str().to_string();
        let path = self.page_path(url, subdir, ext);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut pages = self.pages.lock().unwrap_or_else(|e| e.into_inner());

        let page = match pages.entry(key) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&path)?;
                entry.insert(MappedPage {
                    path: path.clone(),
                    file,
                    map: None,
                    len: 0,
                    capacity: 0,
                })
            }
        };

        if bytes.is_empty() {
            // Empty files cannot be mapped; truncate and record zero length
            page.map = None;
            page.file.set_len(0)?;
            page.len = 0;
            page.capacity = 0;
            return Ok((page.path.clone(), 0));
        }

        if page.capacity != bytes.len() || page.map.is_none() {
            // Remap-and-copy on any size change: the old map must be
            // dropped before the file is resized, and a shrink must
            // truncate or disk readers see the old tail
            page.map = None;
            page.file.set_len(bytes.len() as u64)?;
            page.capacity = bytes.len();

            let map = unsafe { MmapMut::map_mut(&page.file) }
                .map_err(|e| StorageError::Map(e.to_string()))?;
            page.map = Some(map);
        }

        if let Some(map) = &mut page.map {
            map[..bytes.len()].copy_from_slice(bytes);
            map.flush()?;
        }
        page.len = bytes.len();

        debug!(url = %url, bytes = page.len, "stored content");
        Ok((page.path.clone(), page.len as u64))
    }

    /// Deterministic file path for a URL
    fn page_path(&self, url: &Url, subdir: Option<&str>, ext: &str) -> PathBuf {
        let domain = url.host_str().unwrap_or("unknown").to_lowercase();

        let mut dir = self.root.join(domain);
        if let Some(sub) = subdir {
            dir = dir.join(sub);
        }

        let mut stem = String::new();
        stem.push_str(url.path());
        if let Some(query) = url.query() {
            stem.push('_');
            stem.push_str(query);
        }

        let filename = format!(
            "{}-{}.{}",
            sanitize_filename(&stem),
            short_url_hash(url),
            ext
        );
        dir.join(filename)
    }
}

/// Replaces filesystem-hostile characters and caps the length
///
/// Distinct URLs can sanitize to the same stem, which is why every
/// filename carries a hash suffix.
fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = sanitized.trim_matches('_');
    let stem = if trimmed.is_empty() { "index" } else { trimmed };
    stem.chars().take(MAX_STEM_LEN).collect()
}

/// First 8 hex characters of the URL's SHA-256
fn short_url_hash(url: &Url) -> String {
    let digest = Sha256::digest(url.as_str().as_bytes());
    hex::encode(&digest[..4])
}
