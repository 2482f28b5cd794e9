//! Audit and status orchestration.
//!
//! Audit fans out to the independent read-only checks — verify, the
//! vulnerability scanner, the license allowlist, and the upstream
//! staleness probe — and folds their verdicts into one aggregate. Every
//! sub-check is individually skippable; a sub-check error becomes a
//! diagnostic string, never a silent omission. Status is the cheap
//! offline-friendly read built from verify plus outdated.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use graft_git::GitClient;
use graft_store::{ConfigStore, LockStore};
use graft_types::{
    Aggregate, AuditResult, CancelToken, DriftDetail, FileStatus, LicenseEntry, LicenseResult,
    OutdatedState, Result, SCHEMA_VERSION, Severity, StatusResult, VendorStatus,
};

use crate::license::{LicenseChecker, UNKNOWN_LICENSE};
use crate::outdated::OutdatedChecker;
use crate::scanner::Scanner;
use crate::verify::VerifyService;

/// Which audit sub-checks run, and the scanner threshold.
#[derive(Debug, Clone)]
pub struct AuditOptions {
    pub skip_verify: bool,
    pub skip_scan: bool,
    pub skip_license: bool,
    pub skip_outdated: bool,
    pub fail_on: Severity,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            skip_verify: false,
            skip_scan: false,
            skip_license: false,
            skip_outdated: false,
            fail_on: Severity::High,
        }
    }
}

/// Status composition switches.
#[derive(Debug, Clone, Default)]
pub struct StatusOptions {
    /// Skip the remote side entirely.
    pub offline: bool,
    /// Skip the local verify side.
    pub remote_only: bool,
    /// Treat upstream staleness as failure instead of warning.
    pub strict: bool,
}

/// Composite audit/status orchestrator.
pub struct AuditService {
    vendor_root: PathBuf,
    verify: VerifyService,
    scanner: Scanner,
    license: LicenseChecker,
    outdated: OutdatedChecker,
}

impl AuditService {
    pub fn new(
        project_root: impl Into<PathBuf>,
        vendor_root: impl Into<PathBuf>,
        git: Arc<dyn GitClient>,
    ) -> Self {
        let project_root = project_root.into();
        let vendor_root = vendor_root.into();
        Self {
            verify: VerifyService::new(&project_root, &vendor_root),
            scanner: Scanner::in_root(&vendor_root),
            license: LicenseChecker::new(),
            outdated: OutdatedChecker::new(git),
            vendor_root,
        }
    }

    pub fn with_scanner(mut self, scanner: Scanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_license_checker(mut self, license: LicenseChecker) -> Self {
        self.license = license;
        self
    }

    pub fn with_outdated(mut self, outdated: OutdatedChecker) -> Self {
        self.outdated = outdated;
        self
    }

    /// License posture of every locked vendor against the allowlist.
    fn license_check(&self, lock: &graft_types::VendorLock) -> LicenseResult {
        let mut entries = Vec::new();
        let mut aggregate = Aggregate::Pass;
        for details in &lock.vendors {
            if details.is_internal() {
                continue;
            }
            let spdx = details
                .license_spdx
                .clone()
                .unwrap_or_else(|| UNKNOWN_LICENSE.to_string());
            let allowed = self.license.is_allowed(&spdx);
            if !allowed {
                // An undetected license is a gap, a disallowed one a
                // violation.
                aggregate = aggregate.worst(if spdx == UNKNOWN_LICENSE {
                    Aggregate::Warn
                } else {
                    Aggregate::Fail
                });
            }
            entries.push(LicenseEntry {
                vendor: details.name.clone(),
                spdx,
                allowed,
            });
        }
        LicenseResult {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: Utc::now(),
            entries,
            aggregate,
        }
    }

    /// Run every enabled sub-check and fold the verdicts.
    pub fn audit(&self, opts: &AuditOptions, cancel: &CancelToken) -> Result<AuditResult> {
        // Config or lock parse failures abort; they are never diagnostics.
        let config = ConfigStore::in_dir(&self.vendor_root).load()?;
        let lock = LockStore::in_dir(&self.vendor_root).load()?;

        let mut result = AuditResult {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: Utc::now(),
            checks: 0,
            passed: 0,
            failed: 0,
            warnings: 0,
            diagnostics: Vec::new(),
            verify: None,
            scan: None,
            license: None,
            outdated: None,
            aggregate: Aggregate::Pass,
        };

        let tally = |aggregate: Aggregate, result: &mut AuditResult| {
            match aggregate {
                Aggregate::Pass => result.passed += 1,
                Aggregate::Fail => result.failed += 1,
                Aggregate::Warn => result.warnings += 1,
            }
            result.aggregate = result.aggregate.worst(aggregate);
        };

        if !opts.skip_verify {
            result.checks += 1;
            match self.verify.verify(&config, &lock) {
                Ok(verify) => {
                    tally(verify.aggregate, &mut result);
                    result.verify = Some(verify);
                }
                Err(e) => result.diagnostics.push(format!("verify: {e}")),
            }
        }

        if !opts.skip_scan {
            result.checks += 1;
            match self.scanner.scan(&config, &lock, opts.fail_on, cancel) {
                Ok(scan) => {
                    tally(scan.aggregate, &mut result);
                    result.scan = Some(scan);
                }
                Err(e) => result.diagnostics.push(format!("scan: {e}")),
            }
        }

        if !opts.skip_license {
            result.checks += 1;
            let license = self.license_check(&lock);
            tally(license.aggregate, &mut result);
            result.license = Some(license);
        }

        if !opts.skip_outdated {
            result.checks += 1;
            match self.outdated.check(&config, &lock, cancel) {
                Ok(outdated) => {
                    tally(outdated.aggregate, &mut result);
                    result.outdated = Some(outdated);
                }
                Err(e) => result.diagnostics.push(format!("outdated: {e}")),
            }
        }

        Ok(result)
    }

    /// The cheap read: verify + outdated composed per vendor.
    pub fn status(&self, opts: &StatusOptions, cancel: &CancelToken) -> Result<StatusResult> {
        let config = ConfigStore::in_dir(&self.vendor_root).load()?;
        let lock = LockStore::in_dir(&self.vendor_root).load()?;

        let verify = if opts.remote_only {
            None
        } else {
            Some(self.verify.verify(&config, &lock)?)
        };
        let outdated = if opts.offline {
            None
        } else {
            Some(self.outdated.check(&config, &lock, cancel)?)
        };

        let mut vendors = Vec::new();
        for details in &lock.vendors {
            let drift = verify
                .as_ref()
                .map(|v| {
                    v.files
                        .iter()
                        .filter(|f| f.vendor == details.name)
                        .filter(|f| {
                            matches!(f.status, FileStatus::Modified | FileStatus::Accepted)
                        })
                        .map(|f| DriftDetail {
                            path: f.path.clone(),
                            lock_hash: f.expected_hash.clone(),
                            disk_hash: f.actual_hash.clone(),
                            accepted: f.status == FileStatus::Accepted,
                        })
                        .collect()
                })
                .unwrap_or_default();

            let outdated_state = outdated.as_ref().and_then(|o| {
                o.entries
                    .iter()
                    .find(|e| e.name == details.name && e.ref_ == details.ref_)
                    .map(|e| e.state)
            });

            vendors.push(VendorStatus {
                name: details.name.clone(),
                ref_: details.ref_.clone(),
                commit_hash: details.commit_hash.clone(),
                outdated: outdated_state,
                drift,
            });
        }

        let mut aggregate = Aggregate::Pass;
        if let Some(v) = &verify {
            aggregate = aggregate.worst(v.aggregate);
        }
        if let Some(o) = &outdated {
            let stale = o.entries.iter().any(|e| e.state == OutdatedState::Stale);
            if stale {
                aggregate = aggregate.worst(if opts.strict {
                    Aggregate::Fail
                } else {
                    Aggregate::Warn
                });
            }
        }

        Ok(StatusResult {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: Utc::now(),
            vendors,
            aggregate,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::{Path, PathBuf};

    use chrono::Utc;
    use graft_store::{ConfigStore, LockStore};
    use graft_types::{
        BranchSpec, Error, LockDetails, PathMapping, VendorConfig, VendorLock, VendorSpec,
    };
    use tempfile::tempdir;

    use super::*;
    use crate::hash::sha256_hex;

    struct StaticRemote(String);

    impl GitClient for StaticRemote {
        fn init(&self, _d: &Path, _c: &CancelToken) -> Result<()> {
            unimplemented!()
        }
        fn add_remote(&self, _d: &Path, _n: &str, _u: &str, _c: &CancelToken) -> Result<()> {
            unimplemented!()
        }
        fn fetch(&self, _d: &Path, _de: u32, _r: &str, _c: &CancelToken) -> Result<()> {
            unimplemented!()
        }
        fn checkout(&self, _d: &Path, _r: &str, _c: &CancelToken) -> Result<()> {
            unimplemented!()
        }
        fn head_hash(&self, _d: &Path, _c: &CancelToken) -> Result<String> {
            unimplemented!()
        }
        fn tag_for_commit(&self, _d: &Path, _h: &str, _c: &CancelToken) -> Result<Option<String>> {
            unimplemented!()
        }
        fn ls_remote(&self, _u: &str, _r: &str, c: &CancelToken) -> Result<String> {
            c.check()?;
            Ok(self.0.clone())
        }
    }

    struct Fixture {
        _td: tempfile::TempDir,
        project: PathBuf,
        vendor_dir: PathBuf,
    }

    fn setup(commit: &str, body: &str) -> Fixture {
        let td = tempdir().expect("tempdir");
        let project = td.path().join("project");
        let vendor_dir = td.path().join("vendor");
        fs::create_dir_all(project.join("vendored")).expect("mkdir");
        fs::create_dir_all(&vendor_dir).expect("mkdir");
        fs::write(project.join("vendored/util.go"), body).expect("write");

        let config = VendorConfig {
            vendors: vec![VendorSpec {
                name: "utils".to_string(),
                url: "https://github.com/acme/utils".to_string(),
                specs: vec![BranchSpec {
                    ref_: "main".to_string(),
                    default_target: None,
                    mapping: vec![PathMapping {
                        from: "util.go".to_string(),
                        to: "vendored/util.go".to_string(),
                    }],
                }],
                ..Default::default()
            }],
        };
        ConfigStore::in_dir(&vendor_dir).save(&config).expect("save");

        let mut file_hashes = BTreeMap::new();
        file_hashes.insert("vendored/util.go".to_string(), sha256_hex(b"package util"));
        let lock = VendorLock {
            schema_version: SCHEMA_VERSION.to_string(),
            vendors: vec![LockDetails {
                name: "utils".to_string(),
                ref_: "main".to_string(),
                commit_hash: commit.to_string(),
                updated: Utc::now(),
                file_hashes,
                positions: vec![],
                license_path: None,
                license_spdx: Some("MIT".to_string()),
                source_version_tag: None,
                vendored_at: Utc::now(),
                vendored_by: "tester".to_string(),
                last_synced_at: Utc::now(),
                source: None,
                source_file_hashes: None,
                accepted_drift: None,
            }],
        };
        LockStore::in_dir(&vendor_dir).save(&lock).expect("save");

        Fixture {
            _td: td,
            project,
            vendor_dir,
        }
    }

    fn service(fx: &Fixture, remote: &str) -> AuditService {
        AuditService::new(
            &fx.project,
            &fx.vendor_dir,
            Arc::new(StaticRemote(remote.to_string())),
        )
    }

    fn offline_audit_opts() -> AuditOptions {
        AuditOptions {
            skip_scan: true,
            skip_outdated: true,
            ..Default::default()
        }
    }

    #[test]
    fn clean_tree_audits_pass() {
        let fx = setup(&"a".repeat(40), "package util");
        let audit = service(&fx, &"a".repeat(40))
            .audit(&AuditOptions { skip_scan: true, ..Default::default() }, &CancelToken::new())
            .expect("audit");

        assert_eq!(audit.checks, 3);
        assert_eq!(audit.failed, 0);
        assert_eq!(audit.aggregate, Aggregate::Pass);
        assert!(audit.verify.is_some());
        assert!(audit.license.is_some());
        assert!(audit.outdated.is_some());
        assert!(audit.diagnostics.is_empty());
    }

    #[test]
    fn tampered_tree_audits_fail() {
        let fx = setup(&"a".repeat(40), "tampered");
        let audit = service(&fx, &"a".repeat(40))
            .audit(&offline_audit_opts(), &CancelToken::new())
            .expect("audit");

        assert_eq!(audit.aggregate, Aggregate::Fail);
        assert_eq!(audit.failed, 1);
        assert!(audit.verify.expect("verify").aggregate == Aggregate::Fail);
    }

    #[test]
    fn skipped_checks_are_not_attempted() {
        let fx = setup(&"a".repeat(40), "package util");
        let audit = service(&fx, &"a".repeat(40))
            .audit(
                &AuditOptions {
                    skip_verify: true,
                    skip_scan: true,
                    skip_license: true,
                    skip_outdated: true,
                    fail_on: Severity::High,
                },
                &CancelToken::new(),
            )
            .expect("audit");

        assert_eq!(audit.checks, 0);
        assert_eq!(audit.aggregate, Aggregate::Pass);
    }

    #[test]
    fn disallowed_license_fails_audit() {
        let fx = setup(&"a".repeat(40), "package util");
        let lock_store = LockStore::in_dir(&fx.vendor_dir);
        let mut lock = lock_store.load().expect("load");
        lock.vendors[0].license_spdx = Some("GPL-3.0-only".to_string());
        lock_store.save(&lock).expect("save");

        let audit = service(&fx, &"a".repeat(40))
            .audit(&offline_audit_opts(), &CancelToken::new())
            .expect("audit");

        let license = audit.license.expect("license");
        assert!(!license.entries[0].allowed);
        assert_eq!(audit.aggregate, Aggregate::Fail);
    }

    #[test]
    fn unknown_license_warns_instead_of_failing() {
        let fx = setup(&"a".repeat(40), "package util");
        let lock_store = LockStore::in_dir(&fx.vendor_dir);
        let mut lock = lock_store.load().expect("load");
        lock.vendors[0].license_spdx = None;
        lock_store.save(&lock).expect("save");

        let audit = service(&fx, &"a".repeat(40))
            .audit(&offline_audit_opts(), &CancelToken::new())
            .expect("audit");

        assert_eq!(audit.aggregate, Aggregate::Warn);
        assert_eq!(audit.warnings, 1);
    }

    #[test]
    fn missing_lock_aborts_audit() {
        let fx = setup(&"a".repeat(40), "package util");
        fs::remove_file(fx.vendor_dir.join("vendor.lock")).expect("rm");

        let err = service(&fx, &"a".repeat(40))
            .audit(&offline_audit_opts(), &CancelToken::new())
            .expect_err("must fail");
        assert!(matches!(err, Error::LockLoad { .. }));
    }

    #[test]
    fn status_reports_drift_tuples() {
        let fx = setup(&"a".repeat(40), "tampered");
        let status = service(&fx, &"a".repeat(40))
            .status(
                &StatusOptions {
                    offline: true,
                    ..Default::default()
                },
                &CancelToken::new(),
            )
            .expect("status");

        assert_eq!(status.aggregate, Aggregate::Fail);
        let vendor = &status.vendors[0];
        assert_eq!(vendor.drift.len(), 1);
        let drift = &vendor.drift[0];
        assert_eq!(drift.path, "vendored/util.go");
        assert_eq!(drift.lock_hash, sha256_hex(b"package util"));
        assert_eq!(drift.disk_hash, sha256_hex(b"tampered"));
        assert!(!drift.accepted);
    }

    #[test]
    fn accepted_only_drift_is_warn_not_pass() {
        let fx = setup(&"a".repeat(40), "patched");
        let lock_store = LockStore::in_dir(&fx.vendor_dir);
        let mut lock = lock_store.load().expect("load");
        let mut accepted = BTreeMap::new();
        accepted.insert("vendored/util.go".to_string(), sha256_hex(b"patched"));
        lock.vendors[0].accepted_drift = Some(accepted);
        lock_store.save(&lock).expect("save");

        let status = service(&fx, &"a".repeat(40))
            .status(
                &StatusOptions {
                    offline: true,
                    ..Default::default()
                },
                &CancelToken::new(),
            )
            .expect("status");

        assert_eq!(status.aggregate, Aggregate::Warn);
        assert!(status.vendors[0].drift[0].accepted);
        assert_eq!(status.aggregate.exit_code(), 2);
    }

    #[test]
    fn stale_upstream_warns_or_fails_with_strict() {
        let fx = setup(&"a".repeat(40), "package util");

        let status = service(&fx, &"b".repeat(40))
            .status(&StatusOptions::default(), &CancelToken::new())
            .expect("status");
        assert_eq!(status.vendors[0].outdated, Some(OutdatedState::Stale));
        assert_eq!(status.aggregate, Aggregate::Warn);

        let strict = service(&fx, &"b".repeat(40))
            .status(
                &StatusOptions {
                    strict: true,
                    ..Default::default()
                },
                &CancelToken::new(),
            )
            .expect("status");
        assert_eq!(strict.aggregate, Aggregate::Fail);
        assert_eq!(strict.aggregate.exit_code(), 1);
    }

    #[test]
    fn remote_only_status_skips_verify() {
        let fx = setup(&"a".repeat(40), "tampered");
        let status = service(&fx, &"a".repeat(40))
            .status(
                &StatusOptions {
                    remote_only: true,
                    ..Default::default()
                },
                &CancelToken::new(),
            )
            .expect("status");

        // The tampered file is invisible without the verify side.
        assert_eq!(status.aggregate, Aggregate::Pass);
        assert!(status.vendors[0].drift.is_empty());
    }
}
