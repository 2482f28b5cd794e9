//! Internal (host-tree) vendor sync.
//!
//! Internal vendors mirror paths of the host project itself; their ref is
//! the literal `"local"` and no network, checkout, or license gating is
//! involved. The commit hash is synthesized deterministically from the
//! source file hashes (ordered by path), and `source_file_hashes` is
//! recorded so verify can tell which side of an internal mapping drifted.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use graft_types::{
    BranchSpec, CancelToken, CopyStats, Error, LockDetails, RefMetadata, Result, SyncOptions,
    VendorSpec,
};

use graft_process::run_hook_checked;

use crate::cache::{CacheEntry, CacheFile, CacheStore};
use crate::copier;
use crate::hash;
use crate::position::{normalize_path, parse_file_position};
use crate::reporter::{SharedReporter, null_shared};
use crate::sync::{
    ENV_VENDOR_COMMIT, ENV_VENDOR_NAME, ENV_VENDOR_REF, ENV_VENDOR_URL, ENV_FILES_COPIED,
    SyncOutcome, lock_entry_still_verifies,
};

/// Ref name carried by every internal vendor.
pub const LOCAL_REF: &str = "local";

/// Sync service for vendors whose source is the host project tree.
pub struct InternalSyncService {
    project_root: PathBuf,
    vendor_root: PathBuf,
    cache: CacheStore,
    reporter: SharedReporter,
}

impl InternalSyncService {
    pub fn new(project_root: impl Into<PathBuf>, vendor_root: impl Into<PathBuf>) -> Self {
        let vendor_root = vendor_root.into();
        Self {
            project_root: project_root.into(),
            cache: CacheStore::in_root(&vendor_root),
            vendor_root,
            reporter: null_shared(),
        }
    }

    pub fn with_reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = reporter;
        self
    }

    fn info(&self, msg: &str) {
        self.reporter.lock().unwrap().info(msg);
    }

    /// The vendor's source directory inside the project tree.
    fn source_root(&self, vendor: &VendorSpec) -> PathBuf {
        let rel = normalize_path(&vendor.url);
        if rel.is_empty() || rel == "." {
            self.project_root.clone()
        } else {
            self.project_root.join(rel)
        }
    }

    /// Hash every source file the mappings reach, ordered by path.
    fn collect_source_hashes(
        &self,
        src_root: &Path,
        spec: &BranchSpec,
    ) -> Result<BTreeMap<String, String>> {
        let mut hashes = BTreeMap::new();
        for mapping in &spec.mapping {
            let from = parse_file_position(&mapping.from)?;
            let path = src_root.join(&from.path);
            let meta = fs::metadata(&path).map_err(|e| Error::io(&path, e))?;
            if meta.is_dir() {
                walk_tree(&path, &from.path, &mut hashes)?;
            } else {
                hashes.insert(from.path.clone(), hash::file_sha256_hex(&path)?);
            }
        }
        Ok(hashes)
    }

    /// Sync one internal vendor. `prev` is the matching lock entry.
    pub fn sync_ref(
        &self,
        vendor: &VendorSpec,
        spec: &BranchSpec,
        prev: Option<&LockDetails>,
        opts: &SyncOptions,
        cancel: &CancelToken,
    ) -> Result<SyncOutcome> {
        cancel.check()?;

        let src_root = self.source_root(vendor);
        let source_file_hashes = self.collect_source_hashes(&src_root, spec)?;
        let commit_hash = pseudo_commit_hash(&source_file_hashes);

        if !opts.force && !opts.no_cache {
            if let Some(prev) = prev {
                if prev.commit_hash == commit_hash
                    && lock_entry_still_verifies(&self.project_root, prev)
                {
                    self.info(&format!("{}@{LOCAL_REF}: up to date", vendor.name));
                    return Ok(SyncOutcome {
                        vendor: vendor.name.clone(),
                        ref_: LOCAL_REF.to_string(),
                        metadata: RefMetadata {
                            commit_hash: prev.commit_hash.clone(),
                            version_tag: None,
                            positions: prev.positions.clone(),
                        },
                        stats: CopyStats::default(),
                        skipped: true,
                        license_spdx: None,
                        license_path: None,
                        file_hashes: prev.file_hashes.clone(),
                        source_file_hashes: Some(source_file_hashes),
                    });
                }
            }
        }

        let hooks = vendor.hooks.clone().unwrap_or_default();
        let env = |commit: Option<&str>, copied: Option<u64>| {
            let mut env = vec![
                (ENV_VENDOR_NAME.to_string(), vendor.name.clone()),
                (ENV_VENDOR_URL.to_string(), vendor.url.clone()),
                (ENV_VENDOR_REF.to_string(), LOCAL_REF.to_string()),
            ];
            if let Some(commit) = commit {
                env.push((ENV_VENDOR_COMMIT.to_string(), commit.to_string()));
            }
            if let Some(copied) = copied {
                env.push((ENV_FILES_COPIED.to_string(), copied.to_string()));
            }
            env
        };

        if !opts.dry_run {
            if let Some(script) = &hooks.pre_sync {
                cancel.check()?;
                run_hook_checked(
                    "pre_sync",
                    script,
                    &self.project_root,
                    &env(None, None),
                    cancel,
                )?;
            }
        }

        cancel.check()?;
        let outcome =
            copier::copy_mappings(&src_root, &self.project_root, vendor, spec, opts.dry_run)?;

        if !opts.dry_run {
            if let Some(script) = &hooks.post_sync {
                cancel.check()?;
                run_hook_checked(
                    "post_sync",
                    script,
                    &self.project_root,
                    &env(Some(&commit_hash), Some(outcome.stats.file_count)),
                    cancel,
                )?;
            }

            self.cache.save(
                &vendor.name,
                LOCAL_REF,
                &CacheEntry {
                    commit_hash: commit_hash.clone(),
                    files: outcome
                        .file_hashes
                        .iter()
                        .map(|(path, hash)| CacheFile {
                            path: path.clone(),
                            hash: hash.clone(),
                        })
                        .collect(),
                },
            )?;

            self.info(&format!(
                "{}@{LOCAL_REF}: copied {} files",
                vendor.name, outcome.stats.file_count
            ));
        }

        Ok(SyncOutcome {
            vendor: vendor.name.clone(),
            ref_: LOCAL_REF.to_string(),
            metadata: RefMetadata {
                commit_hash,
                version_tag: None,
                positions: outcome.positions,
            },
            stats: outcome.stats,
            skipped: false,
            license_spdx: None,
            license_path: None,
            file_hashes: outcome.file_hashes,
            source_file_hashes: Some(source_file_hashes),
        })
    }

    /// Vendor-root path, used by audit when composing services.
    pub fn vendor_root(&self) -> &Path {
        &self.vendor_root
    }
}

/// Deterministic pseudo commit: SHA-256 over the source hashes in path
/// order.
pub fn pseudo_commit_hash(source_hashes: &BTreeMap<String, String>) -> String {
    let mut concat = String::new();
    for hash in source_hashes.values() {
        concat.push_str(hash);
    }
    hash::sha256_hex(concat.as_bytes())
}

fn walk_tree(
    dir: &Path,
    rel: &str,
    out: &mut BTreeMap<String, String>,
) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| Error::io(dir, e))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let child_rel = format!("{rel}/{}", name.to_string_lossy());
        let meta = match fs::metadata(entry.path()) {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        if meta.is_dir() {
            walk_tree(&entry.path(), &child_rel, out)?;
        } else if meta.is_file() {
            out.insert(child_rel, hash::file_sha256_hex(&entry.path())?);
        }
    }
    Ok(())
}
