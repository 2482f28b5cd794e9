//! Content-addressed cache.
//!
//! Two independent roles live here: the per-file checksum oracle used by
//! verify and sync skip checks, and the per-`(vendor, ref)` snapshot that
//! verify falls back to when a lock entry carries no file hashes. A
//! snapshot is authoritative only while its `commit_hash` matches the
//! lockfile for that pair.
//!
//! Snapshot writers go through a temp file plus rename; readers treat
//! parse failures as cache misses so a mid-write race never fails a
//! command.

use std::fs;
use std::path::{Path, PathBuf};

use graft_types::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::hash;

/// Directory under the vendor root that holds engine caches.
pub const CACHE_DIR: &str = ".graft/cache";

/// Lowercase hex SHA-256 of a file's bytes.
///
/// Missing files surface as a not-found io error, which callers turn into
/// a `deleted` classification rather than a failure.
pub fn compute_file_checksum(path: &Path) -> Result<String> {
    hash::file_sha256_hex(path)
}

/// One file recorded in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheFile {
    pub path: String,
    pub hash: String,
}

/// Snapshot of a vendor ref's copied files at a given commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub commit_hash: String,
    #[serde(default)]
    pub files: Vec<CacheFile>,
}

/// On-disk store of per-`(vendor, ref)` snapshots.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Conventional location under the vendor root.
    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join(CACHE_DIR))
    }

    fn entry_path(&self, name: &str, ref_: &str) -> PathBuf {
        // Refs may contain separators (e.g. release/1.x); flatten them.
        let safe_ref: String = ref_
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            })
            .collect();
        self.dir.join(format!("{name}@{safe_ref}.json"))
    }

    /// Load the snapshot for `(name, ref)`; any failure is a miss.
    pub fn load(&self, name: &str, ref_: &str) -> Option<CacheEntry> {
        let content = fs::read_to_string(self.entry_path(name, ref_)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Persist a snapshot atomically.
    pub fn save(&self, name: &str, ref_: &str, entry: &CacheEntry) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        let path = self.entry_path(name, ref_);
        let json = serde_json::to_string_pretty(entry).map_err(|e| Error::ConfigInvalid {
            message: format!("failed to serialize cache entry: {e}"),
        })?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| Error::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| Error::io(&path, e))?;
        Ok(())
    }

    /// Drop the snapshot for `(name, ref)` if present.
    pub fn invalidate(&self, name: &str, ref_: &str) -> Result<()> {
        let path = self.entry_path(name, ref_);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&path, e)),
        }
    }
}
