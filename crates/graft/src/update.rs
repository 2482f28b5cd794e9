//! Lockfile regeneration with provenance preservation.
//!
//! `update_all` re-syncs the targeted vendors with `force` + `no_cache`,
//! composes fresh lock entries while preserving first-vendored provenance
//! (`vendored_at` / `vendored_by`), copies filtered-out entries verbatim,
//! and writes the lockfile exactly once. Internal vendors run serially
//! before external vendors enter the parallel phase, so host-tree sources
//! are settled by the time externals copy.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use graft_git::GitClient;
use graft_store::{ConfigStore, LockStore};
use graft_types::{
    CancelToken, CopyStats, Error, LockDetails, Result, SyncOptions, VendorLock, VendorSpec,
};

use crate::executor::{ParallelExecutor, VendorJob};
use crate::internal::InternalSyncService;
use crate::reporter::{SharedReporter, null_shared};
use crate::sync::{SyncOutcome, SyncService};

/// Outcome of one update pass.
#[derive(Debug)]
pub struct UpdateReport {
    pub lock: VendorLock,
    pub stats: CopyStats,
    /// `"<vendor>@<ref>: <error>"` for vendors that failed; their previous
    /// lock entries are carried over unchanged.
    pub errors: Vec<String>,
}

/// Lockfile regeneration service.
pub struct UpdateService {
    vendor_root: PathBuf,
    sync: SyncService,
    internal: InternalSyncService,
    reporter: SharedReporter,
}

impl UpdateService {
    pub fn new(
        project_root: impl Into<PathBuf>,
        vendor_root: impl Into<PathBuf>,
        git: Arc<dyn GitClient>,
    ) -> Self {
        let project_root = project_root.into();
        let vendor_root = vendor_root.into();
        Self {
            sync: SyncService::new(&project_root, &vendor_root, git),
            internal: InternalSyncService::new(&project_root, &vendor_root),
            vendor_root,
            reporter: null_shared(),
        }
    }

    pub fn with_sync(mut self, sync: SyncService) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Regenerate the lockfile, refetching everything targeted.
    pub fn update_all(&self, opts: &SyncOptions, cancel: &CancelToken) -> Result<UpdateReport> {
        let forced = SyncOptions {
            force: true,
            no_cache: true,
            ..opts.clone()
        };
        self.run(&forced, cancel)
    }

    /// Sync the targeted vendors, honoring the skip predicate, and write
    /// the resulting lockfile.
    pub fn run(&self, opts: &SyncOptions, cancel: &CancelToken) -> Result<UpdateReport> {
        let config = ConfigStore::in_dir(&self.vendor_root).load()?;
        let lock_store = LockStore::in_dir(&self.vendor_root);
        let prev_lock = lock_store.load_or_default()?;

        // Filter validation happens before any network work.
        if let Some(name) = &opts.vendor_name {
            if config.vendor(name).is_none() {
                return Err(Error::VendorNotFound { name: name.clone() });
            }
        }
        if let Some(group) = &opts.group {
            if !config.known_groups().contains(&group.as_str()) {
                return Err(Error::GroupNotFound {
                    group: group.clone(),
                });
            }
        }

        let prev_by_key: BTreeMap<(String, String), LockDetails> = prev_lock
            .vendors
            .iter()
            .map(|d| ((d.name.clone(), d.ref_.clone()), d.clone()))
            .collect();

        let targeted = |vendor: &VendorSpec| -> bool {
            if let Some(name) = &opts.vendor_name {
                return &vendor.name == name;
            }
            if let Some(group) = &opts.group {
                return vendor.in_group(group);
            }
            true
        };

        let sync_opts = opts.clone();

        let mut outcomes: BTreeMap<(String, String), SyncOutcome> = BTreeMap::new();
        let mut errors: Vec<(String, Error)> = Vec::new();

        // Internal vendors run serially first.
        for vendor in config.vendors.iter().filter(|v| v.is_internal()) {
            if !targeted(vendor) {
                continue;
            }
            for spec in &vendor.specs {
                cancel.check()?;
                let prev = prev_by_key.get(&(vendor.name.clone(), spec.ref_.clone()));
                match self
                    .internal
                    .sync_ref(vendor, spec, prev, &sync_opts, cancel)
                {
                    Ok(outcome) => {
                        outcomes.insert((vendor.name.clone(), outcome.ref_.clone()), outcome);
                    }
                    Err(e) => errors.push((format!("{}@{}", vendor.name, spec.ref_), e)),
                }
            }
        }

        // External vendors fan out through the bounded pool.
        let jobs: Vec<VendorJob> = config
            .vendors
            .iter()
            .filter(|v| !v.is_internal() && targeted(v))
            .flat_map(|vendor| {
                vendor.specs.iter().map(|spec| VendorJob {
                    vendor: vendor.clone(),
                    spec: spec.clone(),
                    prev: prev_by_key
                        .get(&(vendor.name.clone(), spec.ref_.clone()))
                        .cloned(),
                })
            })
            .collect();

        let results = ParallelExecutor::new(opts.max_workers).run(
            jobs,
            |job, cancel| {
                self.sync
                    .sync_ref(&job.vendor, &job.spec, job.prev.as_ref(), &sync_opts, cancel)
            },
            cancel,
        );

        for result in results {
            match (result.outcome, result.error) {
                (Some(outcome), _) => {
                    outcomes.insert((result.vendor.clone(), result.ref_.clone()), outcome);
                }
                (None, Some(e)) => {
                    errors.push((format!("{}@{}", result.vendor, result.ref_), e));
                }
                (None, None) => {}
            }
        }

        // Single-vendor runs abort on failure instead of degrading.
        if opts.vendor_name.is_some() && !errors.is_empty() {
            return Err(errors.remove(0).1);
        }

        let now = Utc::now();
        let user = current_user();
        let mut stats = CopyStats::default();
        let mut new_lock = VendorLock::default();

        for vendor in &config.vendors {
            for spec in &vendor.specs {
                let ref_key = if vendor.is_internal() {
                    crate::internal::LOCAL_REF.to_string()
                } else {
                    spec.ref_.clone()
                };
                let key = (vendor.name.clone(), ref_key.clone());
                let prev = prev_by_key.get(&key);

                if let Some(outcome) = outcomes.get(&key) {
                    stats.add(outcome.stats);
                    if outcome.skipped {
                        if let Some(prev) = prev {
                            // Nothing changed; the entry is carried
                            // bit-for-bit so repeated syncs are idempotent.
                            new_lock.vendors.push(prev.clone());
                            continue;
                        }
                    }
                    new_lock
                        .vendors
                        .push(compose_entry(vendor, outcome, prev, now, &user));
                } else if let Some(prev) = prev {
                    // Filtered out or failed: carried over verbatim.
                    new_lock.vendors.push(prev.clone());
                }
            }
        }

        lock_store.save(&new_lock)?;
        let errors: Vec<String> = errors
            .iter()
            .map(|(label, e)| format!("{label}: {e}"))
            .collect();
        if !errors.is_empty() {
            let mut rep = self.reporter.lock().unwrap();
            for e in &errors {
                rep.error(e);
            }
        }

        Ok(UpdateReport {
            lock: new_lock,
            stats,
            errors,
        })
    }
}

fn current_user() -> String {
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Compose a fresh lock entry, preserving first-vendored provenance.
fn compose_entry(
    vendor: &VendorSpec,
    outcome: &SyncOutcome,
    prev: Option<&LockDetails>,
    now: chrono::DateTime<Utc>,
    user: &str,
) -> LockDetails {
    LockDetails {
        name: outcome.vendor.clone(),
        ref_: outcome.ref_.clone(),
        commit_hash: outcome.metadata.commit_hash.clone(),
        updated: now,
        file_hashes: outcome.file_hashes.clone(),
        positions: outcome.metadata.positions.clone(),
        license_path: outcome
            .license_path
            .clone()
            .or_else(|| prev.and_then(|p| p.license_path.clone())),
        license_spdx: outcome
            .license_spdx
            .clone()
            .or_else(|| prev.and_then(|p| p.license_spdx.clone())),
        source_version_tag: outcome.metadata.version_tag.clone(),
        vendored_at: prev.map(|p| p.vendored_at).unwrap_or(now),
        vendored_by: prev
            .map(|p| p.vendored_by.clone())
            .unwrap_or_else(|| user.to_string()),
        last_synced_at: now,
        source: vendor.source,
        source_file_hashes: outcome.source_file_hashes.clone(),
        accepted_drift: prev.and_then(|p| p.accepted_drift.clone()),
    }
}
