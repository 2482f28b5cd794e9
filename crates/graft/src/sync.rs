//! External vendor sync state machine.
//!
//! One `(vendor, ref)` pair syncs through a strict sequence:
//!
//! ```text
//! Start ── canSkip? ── yes → Skipped (previous metadata, empty stats)
//!   └─ no → Acquire (temp clone) → Resolve → Gate (license) →
//!      pre_sync hook → Copy → post_sync hook → Release → Done
//! ```
//!
//! Fetches and ls-remote calls run under the network retry policy; every
//! other failure surfaces immediately. The ephemeral clone directory is a
//! `TempDir`, so release happens on every exit path including
//! cancellation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use graft_retry::{RetryExecutor, RetryStrategyConfig, calculate_delay};
use graft_types::{
    BranchSpec, CancelToken, CopyStats, Error, LockDetails, PositionLock, RefMetadata, Result,
    SyncOptions, VendorSpec,
};

use graft_git::GitClient;
use graft_process::run_hook_checked;

use crate::cache::{CacheEntry, CacheFile, CacheStore, compute_file_checksum};
use crate::copier;
use crate::hash;
use crate::license::{self, LicenseChecker, UNKNOWN_LICENSE};
use crate::position::{self, parse_file_position};
use crate::reporter::{SharedReporter, null_shared};

/// Hook environment variable names (the external hook contract).
pub const ENV_VENDOR_NAME: &str = "GIT_VENDOR_NAME";
pub const ENV_VENDOR_URL: &str = "GIT_VENDOR_URL";
pub const ENV_VENDOR_REF: &str = "GIT_VENDOR_REF";
pub const ENV_VENDOR_COMMIT: &str = "GIT_VENDOR_COMMIT";
pub const ENV_FILES_COPIED: &str = "GIT_VENDOR_FILES_COPIED";

/// Subdirectory of the vendor root that holds copied license texts.
pub const LICENSES_DIR: &str = "licenses";

/// Everything one vendor·ref sync produced.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub vendor: String,
    pub ref_: String,
    pub metadata: RefMetadata,
    pub stats: CopyStats,
    /// The skip predicate held; `metadata` echoes the previous lock entry.
    pub skipped: bool,
    pub license_spdx: Option<String>,
    pub license_path: Option<String>,
    /// Destination path → whole-file hex hash for this ref.
    pub file_hashes: BTreeMap<String, String>,
    /// Source path → hex hash; populated by internal syncs only.
    pub source_file_hashes: Option<BTreeMap<String, String>>,
}

/// Check one recorded position against the tree, cheaply.
///
/// Used by skip predicates; the verify service does its own richer
/// classification.
pub(crate) fn position_still_verifies(project_root: &Path, pos: &PositionLock) -> bool {
    let Ok(to) = parse_file_position(&pos.to) else {
        return false;
    };
    let dest = project_root.join(&to.path);
    match &to.spec {
        Some(spec) => match position::extract_from_file(&dest, spec) {
            Ok((_, hash)) => hash == pos.source_hash,
            Err(_) => false,
        },
        None => match hash::file_sha256_hex(&dest) {
            Ok(h) => hash::with_prefix(&h) == pos.source_hash,
            Err(_) => false,
        },
    }
}

/// Check every file hash and position of a lock entry against the tree.
pub(crate) fn lock_entry_still_verifies(project_root: &Path, prev: &LockDetails) -> bool {
    for (path, expected) in &prev.file_hashes {
        match compute_file_checksum(&project_root.join(path)) {
            Ok(actual) if &actual == expected => {}
            _ => return false,
        }
    }
    prev.positions
        .iter()
        .all(|pos| position_still_verifies(project_root, pos))
}

/// Sync service for external (git) vendors.
pub struct SyncService {
    project_root: PathBuf,
    vendor_root: PathBuf,
    git: Arc<dyn GitClient>,
    license: LicenseChecker,
    cache: CacheStore,
    reporter: SharedReporter,
    retry: RetryStrategyConfig,
}

impl SyncService {
    pub fn new(
        project_root: impl Into<PathBuf>,
        vendor_root: impl Into<PathBuf>,
        git: Arc<dyn GitClient>,
    ) -> Self {
        let vendor_root = vendor_root.into();
        Self {
            project_root: project_root.into(),
            cache: CacheStore::in_root(&vendor_root),
            vendor_root,
            git,
            license: LicenseChecker::new(),
            reporter: null_shared(),
            retry: RetryStrategyConfig::network(),
        }
    }

    pub fn with_license_checker(mut self, license: LicenseChecker) -> Self {
        self.license = license;
        self
    }

    pub fn with_reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_retry(mut self, retry: RetryStrategyConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    fn info(&self, msg: &str) {
        self.reporter.lock().unwrap().info(msg);
    }

    fn warn(&self, msg: &str) {
        self.reporter.lock().unwrap().warn(msg);
    }

    /// Resolve the remote hash for a ref, trying each candidate URL.
    fn resolve_remote(
        &self,
        vendor: &VendorSpec,
        ref_: &str,
        cancel: &CancelToken,
    ) -> Result<String> {
        let executor = RetryExecutor::new(self.retry.clone());
        let mut last_err = None;
        for url in vendor.candidate_urls() {
            cancel.check()?;
            let attempt = executor
                .run_classified(|_| self.git.ls_remote(url, ref_, cancel), Error::is_retryable);
            match attempt {
                Ok(hash) => return Ok(hash),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::GitFailed {
            stage: "ls-remote".to_string(),
            stderr: format!("vendor {:?} has no usable URL", vendor.name),
        }))
    }

    /// The at-most-once-per-fingerprint skip predicate.
    fn can_skip(
        &self,
        vendor: &VendorSpec,
        spec: &BranchSpec,
        prev: Option<&LockDetails>,
        cancel: &CancelToken,
    ) -> bool {
        let Some(prev) = prev else { return false };
        let Ok(remote) = self.resolve_remote(vendor, &spec.ref_, cancel) else {
            return false;
        };
        if remote != prev.commit_hash {
            return false;
        }
        lock_entry_still_verifies(&self.project_root, prev)
    }

    /// Clone one candidate URL shallowly into a fresh temp dir.
    fn acquire(
        &self,
        vendor: &VendorSpec,
        ref_: &str,
        cancel: &CancelToken,
    ) -> Result<tempfile::TempDir> {
        let executor = RetryExecutor::new(self.retry.clone());
        let mut last_err = None;

        for url in vendor.candidate_urls() {
            cancel.check()?;

            let tmp = tempfile::TempDir::new()
                .map_err(|e| Error::io(std::env::temp_dir(), e))?;
            let dir = tmp.path();

            let attempt = (|| -> Result<()> {
                self.git.init(dir, cancel)?;
                self.git.add_remote(dir, "origin", url, cancel)?;
                executor.run_classified(
                    |attempt| {
                        if attempt > 1 {
                            self.warn(&format!(
                                "{}@{ref_}: fetch retry {attempt} in {}",
                                vendor.name,
                                humantime::format_duration(calculate_delay(
                                    &self.retry,
                                    attempt - 1
                                ))
                            ));
                        }
                        self.git.fetch(dir, 1, ref_, cancel)
                    },
                    Error::is_retryable,
                )?;
                self.git.checkout(dir, "FETCH_HEAD", cancel)?;
                Ok(())
            })();

            match attempt {
                Ok(()) => return Ok(tmp),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    self.warn(&format!("{}@{ref_}: {url} failed: {e}", vendor.name));
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::GitFailed {
            stage: "fetch".to_string(),
            stderr: format!("vendor {:?} has no usable URL", vendor.name),
        }))
    }

    fn hook_env(&self, vendor: &VendorSpec, ref_: &str) -> Vec<(String, String)> {
        vec![
            (ENV_VENDOR_NAME.to_string(), vendor.name.clone()),
            (ENV_VENDOR_URL.to_string(), vendor.url.clone()),
            (ENV_VENDOR_REF.to_string(), ref_.to_string()),
        ]
    }

    /// Copy the detected license text under `<vendor_root>/licenses/`.
    fn stash_license(&self, worktree: &Path, vendor: &VendorSpec) -> Result<Option<String>> {
        let Some(found) = license::find_license_file(worktree) else {
            return Ok(None);
        };
        let rel = format!("{LICENSES_DIR}/{}.txt", vendor.name);
        copier::copy_file(&found, &self.vendor_root.join(&rel))?;
        Ok(Some(rel))
    }

    /// Sync one vendor·ref. `prev` is the matching lock entry, if any.
    pub fn sync_ref(
        &self,
        vendor: &VendorSpec,
        spec: &BranchSpec,
        prev: Option<&LockDetails>,
        opts: &SyncOptions,
        cancel: &CancelToken,
    ) -> Result<SyncOutcome> {
        cancel.check()?;

        if !opts.force && !opts.no_cache && self.can_skip(vendor, spec, prev, cancel) {
            let prev = prev.expect("skip predicate implies a previous entry");
            self.info(&format!(
                "{}@{}: up to date at {}",
                vendor.name,
                spec.ref_,
                &prev.commit_hash[..12.min(prev.commit_hash.len())]
            ));
            return Ok(SyncOutcome {
                vendor: vendor.name.clone(),
                ref_: spec.ref_.clone(),
                metadata: RefMetadata {
                    commit_hash: prev.commit_hash.clone(),
                    version_tag: prev.source_version_tag.clone(),
                    positions: prev.positions.clone(),
                },
                stats: CopyStats::default(),
                skipped: true,
                license_spdx: prev.license_spdx.clone(),
                license_path: prev.license_path.clone(),
                file_hashes: prev.file_hashes.clone(),
                source_file_hashes: None,
            });
        }

        // Acquire: ephemeral shallow clone, released on every exit path.
        self.info(&format!("{}@{}: fetching", vendor.name, spec.ref_));
        let tmp = self.acquire(vendor, &spec.ref_, cancel)?;

        // Resolve.
        cancel.check()?;
        let commit_hash = self.git.head_hash(tmp.path(), cancel)?;
        let version_tag = self.git.tag_for_commit(tmp.path(), &commit_hash, cancel)?;

        // Gate.
        let mut license_spdx = None;
        if !opts.no_license_check {
            cancel.check()?;
            let mut spdx = self.license.detect(&vendor.url, Some(tmp.path()), cancel);
            if spdx == UNKNOWN_LICENSE {
                // The declared license is a fallback claim, not an override.
                if let Some(declared) = &vendor.license {
                    spdx = declared.clone();
                }
            }
            if !self.license.is_allowed(&spdx) {
                return Err(Error::LicenseBlocked {
                    vendor: vendor.name.clone(),
                    spdx,
                });
            }
            license_spdx = Some(spdx);
        }

        // Hooks and copy. Dry runs skip both, but still extract position
        // hashes so drift is observable.
        let hooks = vendor.hooks.clone().unwrap_or_default();
        if !opts.dry_run {
            if let Some(script) = &hooks.pre_sync {
                cancel.check()?;
                run_hook_checked(
                    "pre_sync",
                    script,
                    &self.project_root,
                    &self.hook_env(vendor, &spec.ref_),
                    cancel,
                )?;
            }
        }

        cancel.check()?;
        let mut outcome =
            copier::copy_mappings(tmp.path(), &self.project_root, vendor, spec, opts.dry_run)?;

        if opts.dry_run {
            // Keep only records whose source hash would change.
            let unchanged: Vec<PositionLock> = prev.map(|p| p.positions.clone()).unwrap_or_default();
            outcome.positions.retain(|pos| {
                !unchanged
                    .iter()
                    .any(|u| u.from == pos.from && u.to == pos.to && u.source_hash == pos.source_hash)
            });
        }

        let mut license_path = prev.and_then(|p| p.license_path.clone());
        if !opts.dry_run {
            license_path = self.stash_license(tmp.path(), vendor)?.or(license_path);

            if let Some(script) = &hooks.post_sync {
                cancel.check()?;
                let mut env = self.hook_env(vendor, &spec.ref_);
                env.push((ENV_VENDOR_COMMIT.to_string(), commit_hash.clone()));
                env.push((
                    ENV_FILES_COPIED.to_string(),
                    outcome.stats.file_count.to_string(),
                ));
                run_hook_checked("post_sync", script, &self.project_root, &env, cancel)?;
            }

            let entry = CacheEntry {
                commit_hash: commit_hash.clone(),
                files: outcome
                    .file_hashes
                    .iter()
                    .map(|(path, hash)| CacheFile {
                        path: path.clone(),
                        hash: hash.clone(),
                    })
                    .collect(),
            };
            self.cache.save(&vendor.name, &spec.ref_, &entry)?;

            self.info(&format!(
                "{}@{}: copied {} files ({} bytes) at {}",
                vendor.name,
                spec.ref_,
                outcome.stats.file_count,
                outcome.stats.byte_count,
                &commit_hash[..12.min(commit_hash.len())]
            ));
        }

        // Release happens when `tmp` drops.
        Ok(SyncOutcome {
            vendor: vendor.name.clone(),
            ref_: spec.ref_.clone(),
            metadata: RefMetadata {
                commit_hash,
                version_tag,
                positions: outcome.positions,
            },
            stats: outcome.stats,
            skipped: false,
            license_spdx,
            license_path,
            file_hashes: outcome.file_hashes,
            source_file_hashes: None,
        })
    }
}
