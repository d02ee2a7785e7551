//! Size-bounded on-disk icon cache with LRU eviction.
//!
//! The icon-extraction side writes files into the cache directory and reports
//! every cache hit through [`IconCacheManager::record_access`]. This module is
//! the only deleter: [`IconCacheManager::cleanup`] evicts the least recently
//! accessed files until the directory fits its byte budget again.
//!
//! Filesystem failures never escape this module. They are logged and the
//! affected file or operation counts as zero effect.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{GovernorError, Result};

/// A file currently present in the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// Epoch millis from the access log, else the file's mtime.
    pub last_access: i64,
}

/// Outcome of an eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub removed: u64,
    pub freed_bytes: u64,
}

/// Point-in-time view of the cache directory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub directory: PathBuf,
    pub file_count: usize,
    pub size_bytes: u64,
    pub max_size_bytes: u64,
    pub tracked_accesses: usize,
}

/// Keeps a directory's total size at or below a byte budget.
pub struct IconCacheManager {
    cache_dir: PathBuf,
    max_size: u64,
    access_log: Mutex<HashMap<String, i64>>,
    clock: Arc<dyn Clock>,
}

impl IconCacheManager {
    /// Creates a manager for `cache_dir`, creating the directory if needed.
    pub fn new(cache_dir: impl Into<PathBuf>, max_size: u64, clock: Arc<dyn Clock>) -> Self {
        let cache_dir = cache_dir.into();
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            warn!(
                "Failed to create icon cache directory {}: {}",
                cache_dir.display(),
                e
            );
        }

        Self {
            cache_dir,
            max_size,
            access_log: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Total size of the files directly inside the cache directory.
    ///
    /// Returns 0 when the directory is missing or unreadable.
    pub fn get_cache_size(&self) -> u64 {
        match self.list_entries() {
            Ok(entries) => entries.iter().map(|e| e.size).sum(),
            Err(e) => {
                debug!("Icon cache size unavailable: {}", e);
                0
            }
        }
    }

    /// Marks `filename` as accessed now.
    pub fn record_access(&self, filename: &str) {
        let now = self.clock.now_millis();
        self.log().insert(filename.to_string(), now);
    }

    /// Evicts least recently accessed files until the cache fits its budget.
    pub fn cleanup(&self) -> CleanupResult {
        let mut entries = match self.list_entries() {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Skipping icon cache cleanup: {}", e);
                return CleanupResult::default();
            }
        };

        self.prune_access_log(&entries);

        let current: u64 = entries.iter().map(|e| e.size).sum();
        if current <= self.max_size {
            debug!(
                "Icon cache within budget: {} / {} bytes",
                current, self.max_size
            );
            return CleanupResult::default();
        }

        // Stable sort keeps enumeration order for equal access times.
        entries.sort_by_key(|e| e.last_access);
        self.evict(&entries, current)
    }

    /// Deletes `entries` in order until `current` fits the budget.
    fn evict(&self, entries: &[CacheEntry], mut current: u64) -> CleanupResult {
        let mut result = CleanupResult::default();
        for entry in entries {
            if current <= self.max_size {
                break;
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    current = current.saturating_sub(entry.size);
                    result.removed += 1;
                    result.freed_bytes += entry.size;
                    self.log().remove(&entry.name);
                    debug!("Evicted icon {} ({} bytes)", entry.name, entry.size);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // Already gone; its bytes no longer count against the budget.
                    current = current.saturating_sub(entry.size);
                    self.log().remove(&entry.name);
                    debug!("Icon {} vanished before eviction", entry.name);
                }
                Err(e) => {
                    warn!("Failed to evict icon {}: {}", entry.path.display(), e);
                }
            }
        }

        info!(
            "Icon cache cleanup removed {} files, freed {} bytes, now {} / {} bytes",
            result.removed, result.freed_bytes, current, self.max_size
        );
        result
    }

    /// Deletes every file in the cache directory.
    pub fn clear_all(&self) -> CleanupResult {
        let entries = match self.list_entries() {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Nothing to clear in icon cache: {}", e);
                return CleanupResult::default();
            }
        };

        let mut result = CleanupResult::default();
        for entry in &entries {
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    result.removed += 1;
                    result.freed_bytes += entry.size;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove icon {}: {}", entry.path.display(), e),
            }
        }
        self.log().clear();

        info!(
            "Icon cache cleared: {} files, {} bytes",
            result.removed, result.freed_bytes
        );
        result
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.list_entries().unwrap_or_default();
        CacheStats {
            directory: self.cache_dir.clone(),
            file_count: entries.len(),
            size_bytes: entries.iter().map(|e| e.size).sum(),
            max_size_bytes: self.max_size,
            tracked_accesses: self.log().len(),
        }
    }

    /// Regular files directly inside the cache directory, in enumeration order.
    pub fn list_entries(&self) -> Result<Vec<CacheEntry>> {
        let dir = fs::read_dir(&self.cache_dir).map_err(|e| GovernorError::io(&self.cache_dir, e))?;
        let log = self.log();

        let mut out = Vec::new();
        for entry in dir.flatten() {
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let last_access = log
                .get(&name)
                .copied()
                .unwrap_or_else(|| modified_millis(&metadata));
            out.push(CacheEntry {
                name,
                path,
                size: metadata.len(),
                last_access,
            });
        }
        Ok(out)
    }

    /// Drops access-log entries whose file is no longer in the directory.
    fn prune_access_log(&self, entries: &[CacheEntry]) {
        let present: HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        let mut log = self.log();
        let before = log.len();
        log.retain(|name, _| present.contains(name.as_str()));
        let pruned = before - log.len();
        if pruned > 0 {
            debug!("Pruned {} stale icon access records", pruned);
        }
    }

    fn log(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.access_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn modified_millis(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Hex key for an icon extracted from `source` with `identifier`.
pub fn generate_cache_key(source: &str, identifier: &str) -> String {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    identifier.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// File name under which an extracted icon is stored in the cache directory.
pub fn cache_file_name(source: &str, identifier: &str) -> String {
    format!("{}.ico", generate_cache_key(source, identifier))
}

/// Default icon cache location: `<exe dir>/cache/icons`, or `./cache/icons`.
pub fn default_cache_dir() -> PathBuf {
    let base = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("cache").join("icons")
}
