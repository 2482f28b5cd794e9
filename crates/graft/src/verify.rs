//! Drift detection and per-file classification.
//!
//! Verify reconciles three things: the declarative config, the lockfile,
//! and the on-disk tree. Every destination file lands in exactly one
//! class — verified, modified, deleted, accepted, added, stale, or
//! orphaned — and the aggregate is derived from the class counts:
//! modified/deleted fail, added/accepted/stale/orphaned warn.
//!
//! Out-of-range position extractions are reported as `modified` with the
//! extraction error text standing in for the actual hash, matching the
//! historical behavior downstream tooling expects.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use graft_types::{
    Aggregate, ComplianceMode, DriftDirection, Error, FileCheck, FileStatus, InternalCheck,
    PositionCheck, Result, SCHEMA_VERSION, VendorConfig, VendorLock, VerifyResult,
};

use crate::cache::{CacheStore, compute_file_checksum};
use crate::hash;
use crate::position::{self, parse_file_position};

/// One expected destination file, attributed to its vendor.
#[derive(Debug, Clone)]
struct Expected {
    vendor: String,
    /// Whole-file hex hash; empty is the position-destination sentinel.
    hash: String,
    accepted: Option<String>,
}

/// Verify service over one project tree.
pub struct VerifyService {
    project_root: PathBuf,
    cache: CacheStore,
}

impl VerifyService {
    pub fn new(project_root: impl Into<PathBuf>, vendor_root: &Path) -> Self {
        Self {
            project_root: project_root.into(),
            cache: CacheStore::in_root(vendor_root),
        }
    }

    /// Reconcile config ∪ lock ∪ tree.
    pub fn verify(&self, config: &VendorConfig, lock: &VendorLock) -> Result<VerifyResult> {
        let mut result = VerifyResult {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: Utc::now(),
            files: Vec::new(),
            positions: Vec::new(),
            internal: Vec::new(),
            aggregate: Aggregate::Pass,
        };

        let any_file_hashes = lock.vendors.iter().any(|d| !d.file_hashes.is_empty());

        // Expected files: union of lock entries, with the cache snapshot as
        // fallback for entries that carry no hashes of their own.
        let mut expected: BTreeMap<String, Expected> = BTreeMap::new();
        for details in &lock.vendors {
            if details.file_hashes.is_empty() {
                if let Some(snapshot) = self.cache.load(&details.name, &details.ref_) {
                    if snapshot.commit_hash == details.commit_hash {
                        for file in snapshot.files {
                            expected.insert(
                                file.path.clone(),
                                Expected {
                                    vendor: details.name.clone(),
                                    hash: file.hash,
                                    accepted: details.accepted_hash(&file.path).map(str::to_string),
                                },
                            );
                        }
                    }
                }
                continue;
            }
            for (path, hash) in &details.file_hashes {
                expected.insert(
                    path.clone(),
                    Expected {
                        vendor: details.name.clone(),
                        hash: hash.clone(),
                        accepted: details.accepted_hash(path).map(str::to_string),
                    },
                );
            }
        }

        // Step 1: classify every expected file against the tree.
        for (path, exp) in &expected {
            let check = self.classify_file(path, exp);
            result.files.push(check);
        }

        // Step 2: re-verify every recorded position and register its
        // destination so the added-walk ignores it.
        for details in &lock.vendors {
            for pos in &details.positions {
                let check = self.classify_position(&details.name, pos);
                if let Ok(to) = parse_file_position(&pos.to) {
                    expected.entry(to.path).or_insert(Expected {
                        vendor: details.name.clone(),
                        hash: String::new(),
                        accepted: None,
                    });
                }
                result.positions.push(check);
            }
        }

        // Step 3: drift direction for internal vendors.
        for details in &lock.vendors {
            if !details.is_internal() {
                continue;
            }
            let Some(vendor) = config.vendor(&details.name) else {
                continue;
            };
            let Some(source_hashes) = &details.source_file_hashes else {
                continue;
            };

            let source_root = {
                let rel = position::normalize_path(&vendor.url);
                if rel.is_empty() || rel == "." {
                    self.project_root.clone()
                } else {
                    self.project_root.join(rel)
                }
            };
            let source_changed = source_hashes.iter().any(|(path, locked)| {
                !matches!(
                    compute_file_checksum(&source_root.join(path)),
                    Ok(actual) if &actual == locked
                )
            });
            let dest_changed = details.file_hashes.iter().any(|(path, locked)| {
                !matches!(
                    compute_file_checksum(&self.project_root.join(path)),
                    Ok(actual) if &actual == locked
                )
            });

            let direction = match (source_changed, dest_changed) {
                (false, false) => DriftDirection::Synced,
                (true, false) => DriftDirection::SourceDrift,
                (false, true) => DriftDirection::DestDrift,
                (true, true) => DriftDirection::BothDrift,
            };
            result.internal.push(InternalCheck {
                vendor: details.name.clone(),
                direction,
                suggested_action: suggested_action(direction, vendor.compliance_mode()),
            });
        }

        // Step 4: walk destination directories implied by config mappings
        // and flag unexpected regular files.
        let mut seen_added = BTreeSet::new();
        for (root_rel, vendor_name) in self.dest_roots(config) {
            let root = self.project_root.join(&root_rel);
            if !root.is_dir() {
                continue;
            }
            let mut files = Vec::new();
            collect_files(&root, &root_rel, &mut files);
            for rel in files {
                if expected.contains_key(&rel) || !seen_added.insert(rel.clone()) {
                    continue;
                }
                let actual = compute_file_checksum(&self.project_root.join(&rel))
                    .unwrap_or_default();
                result.files.push(FileCheck {
                    path: rel,
                    vendor: vendor_name.clone(),
                    status: FileStatus::Added,
                    expected_hash: String::new(),
                    actual_hash: actual,
                });
            }
        }

        // Step 5: coherence between config and lock. Skipped entirely when
        // no vendor recorded file hashes (cache-only verifies).
        if any_file_hashes {
            for vendor in &config.vendors {
                for spec in &vendor.specs {
                    for mapping in &spec.mapping {
                        if mapping.to.trim().is_empty() {
                            continue;
                        }
                        let Ok(to) = parse_file_position(&mapping.to) else {
                            continue;
                        };
                        let covered = expected.contains_key(&to.path)
                            || expected
                                .keys()
                                .any(|k| k.starts_with(&format!("{}/", to.path)));
                        if !covered {
                            result.files.push(FileCheck {
                                path: to.path,
                                vendor: vendor.name.clone(),
                                status: FileStatus::Stale,
                                expected_hash: String::new(),
                                actual_hash: String::new(),
                            });
                        }
                    }
                }
            }

            for details in &lock.vendors {
                if details.is_internal() {
                    continue;
                }
                let vendor = config.vendor(&details.name);
                for path in details.file_hashes.keys() {
                    let mapped = vendor.is_some_and(|v| vendor_maps_path(v, path));
                    if !mapped {
                        result.files.push(FileCheck {
                            path: path.clone(),
                            vendor: details.name.clone(),
                            status: FileStatus::Orphaned,
                            expected_hash: details.file_hashes[path].clone(),
                            actual_hash: String::new(),
                        });
                    }
                }
            }
        }

        result.derive_aggregate();
        Ok(result)
    }

    fn classify_file(&self, path: &str, exp: &Expected) -> FileCheck {
        // Position-destination sentinels never reach here; they are
        // registered after step 1.
        match compute_file_checksum(&self.project_root.join(path)) {
            Err(ref e) if e.is_not_found() => FileCheck {
                path: path.to_string(),
                vendor: exp.vendor.clone(),
                status: FileStatus::Deleted,
                expected_hash: exp.hash.clone(),
                actual_hash: String::new(),
            },
            Err(e) => FileCheck {
                path: path.to_string(),
                vendor: exp.vendor.clone(),
                status: FileStatus::Modified,
                expected_hash: exp.hash.clone(),
                actual_hash: e.to_string(),
            },
            Ok(actual) if actual == exp.hash => FileCheck {
                path: path.to_string(),
                vendor: exp.vendor.clone(),
                status: FileStatus::Verified,
                expected_hash: exp.hash.clone(),
                actual_hash: actual,
            },
            Ok(actual) if exp.accepted.as_deref() == Some(actual.as_str()) => FileCheck {
                path: path.to_string(),
                vendor: exp.vendor.clone(),
                status: FileStatus::Accepted,
                expected_hash: exp.hash.clone(),
                actual_hash: actual,
            },
            Ok(actual) => FileCheck {
                path: path.to_string(),
                vendor: exp.vendor.clone(),
                status: FileStatus::Modified,
                expected_hash: exp.hash.clone(),
                actual_hash: actual,
            },
        }
    }

    fn classify_position(&self, vendor: &str, pos: &graft_types::PositionLock) -> PositionCheck {
        let mut check = PositionCheck {
            vendor: vendor.to_string(),
            from: pos.from.clone(),
            to: pos.to.clone(),
            status: FileStatus::Verified,
            expected_hash: pos.source_hash.clone(),
            actual_hash: String::new(),
        };

        let to = match parse_file_position(&pos.to) {
            Ok(to) => to,
            Err(e) => {
                check.status = FileStatus::Modified;
                check.actual_hash = e.to_string();
                return check;
            }
        };
        let dest = self.project_root.join(&to.path);

        let actual = match &to.spec {
            Some(spec) => match position::extract_from_file(&dest, spec) {
                Ok((_, hash)) => hash,
                Err(Error::Io { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    check.status = FileStatus::Deleted;
                    return check;
                }
                Err(e) => {
                    // Out-of-range extraction: the error text stands in
                    // for the actual hash.
                    check.status = FileStatus::Modified;
                    check.actual_hash = e.to_string();
                    return check;
                }
            },
            None => match hash::file_sha256_hex(&dest) {
                Ok(h) => hash::with_prefix(&h),
                Err(ref e) if e.is_not_found() => {
                    check.status = FileStatus::Deleted;
                    return check;
                }
                Err(e) => {
                    check.status = FileStatus::Modified;
                    check.actual_hash = e.to_string();
                    return check;
                }
            },
        };

        check.status = if actual == pos.source_hash {
            FileStatus::Verified
        } else {
            FileStatus::Modified
        };
        check.actual_hash = actual;
        check
    }

    /// Destination directories implied by the config, with their vendor.
    fn dest_roots(&self, config: &VendorConfig) -> Vec<(String, String)> {
        let mut roots: Vec<(String, String)> = Vec::new();
        let mut seen = BTreeSet::new();
        for vendor in &config.vendors {
            for spec in &vendor.specs {
                for mapping in &spec.mapping {
                    let root = if mapping.to.trim().is_empty() {
                        spec.default_target
                            .clone()
                            .unwrap_or_else(|| format!("lib/{}", vendor.name))
                    } else {
                        let Ok(to) = parse_file_position(&mapping.to) else {
                            continue;
                        };
                        if self.project_root.join(&to.path).is_dir() {
                            to.path
                        } else {
                            match to.path.rsplit_once('/') {
                                Some((parent, _)) => parent.to_string(),
                                None => continue,
                            }
                        }
                    };
                    if !root.is_empty() && seen.insert(root.clone()) {
                        roots.push((root, vendor.name.clone()));
                    }
                }
            }
        }
        roots
    }
}

/// Whether one of the vendor's mappings accounts for a locked dest path.
fn vendor_maps_path(vendor: &graft_types::VendorSpec, path: &str) -> bool {
    for spec in &vendor.specs {
        for mapping in &spec.mapping {
            if mapping.to.trim().is_empty() {
                let prefix = spec
                    .default_target
                    .clone()
                    .unwrap_or_else(|| format!("lib/{}", vendor.name));
                if path.starts_with(&format!("{}/", prefix.trim_end_matches('/'))) {
                    return true;
                }
                continue;
            }
            let Ok(to) = parse_file_position(&mapping.to) else {
                continue;
            };
            if to.path == path || path.starts_with(&format!("{}/", to.path)) {
                return true;
            }
        }
    }
    false
}

fn suggested_action(direction: DriftDirection, compliance: Option<ComplianceMode>) -> String {
    match direction {
        DriftDirection::Synced => "none".to_string(),
        DriftDirection::SourceDrift => "run update to propagate source changes".to_string(),
        DriftDirection::DestDrift => match compliance {
            Some(ComplianceMode::Bidirectional) => {
                "review destination edits; accept or push back to source".to_string()
            }
            _ => "re-sync to restore destinations from source".to_string(),
        },
        DriftDirection::BothDrift => "manual reconciliation required".to_string(),
    }
}

fn collect_files(dir: &Path, rel: &str, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = entries.flatten().collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let child_rel = format!("{rel}/{}", name.to_string_lossy());
        let Ok(meta) = fs::metadata(entry.path()) else {
            continue;
        };
        if meta.is_dir() {
            collect_files(&entry.path(), &child_rel, out);
        } else if meta.is_file() {
            out.push(child_rel);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use chrono::Utc;
    use graft_types::{
        BranchSpec, LockDetails, PathMapping, PositionLock, SourceKind, VendorSpec,
    };
    use tempfile::tempdir;

    use super::*;
    use crate::hash::{sha256_hex, sha256_prefixed};

    struct Fixture {
        _td: tempfile::TempDir,
        project: PathBuf,
        vendor_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let td = tempdir().expect("tempdir");
        let project = td.path().join("project");
        let vendor_dir = td.path().join("vendor");
        fs::create_dir_all(&project).expect("mkdir");
        fs::create_dir_all(&vendor_dir).expect("mkdir");
        Fixture {
            _td: td,
            project,
            vendor_dir,
        }
    }

    fn write(project: &Path, rel: &str, content: &str) {
        let path = project.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write");
    }

    fn config_one_vendor(mappings: Vec<(&str, &str)>) -> VendorConfig {
        VendorConfig {
            vendors: vec![VendorSpec {
                name: "utils".to_string(),
                url: "https://github.com/acme/utils".to_string(),
                specs: vec![BranchSpec {
                    ref_: "main".to_string(),
                    default_target: None,
                    mapping: mappings
                        .into_iter()
                        .map(|(from, to)| PathMapping {
                            from: from.to_string(),
                            to: to.to_string(),
                        })
                        .collect(),
                }],
                ..Default::default()
            }],
        }
    }

    fn lock_entry(
        file_hashes: Vec<(&str, String)>,
        positions: Vec<PositionLock>,
    ) -> VendorLock {
        VendorLock {
            schema_version: SCHEMA_VERSION.to_string(),
            vendors: vec![LockDetails {
                name: "utils".to_string(),
                ref_: "main".to_string(),
                commit_hash: "a".repeat(40),
                updated: Utc::now(),
                file_hashes: file_hashes
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                positions,
                license_path: None,
                license_spdx: None,
                source_version_tag: None,
                vendored_at: Utc::now(),
                vendored_by: "tester".to_string(),
                last_synced_at: Utc::now(),
                source: None,
                source_file_hashes: None,
                accepted_drift: None,
            }],
        }
    }

    #[test]
    fn untouched_tree_passes() {
        let fx = fixture();
        write(&fx.project, "vendored/util.go", "package util");

        let lock = lock_entry(
            vec![("vendored/util.go", sha256_hex(b"package util"))],
            vec![],
        );
        let config = config_one_vendor(vec![("util.go", "vendored/util.go")]);

        let service = VerifyService::new(&fx.project, &fx.vendor_dir);
        let result = service.verify(&config, &lock).expect("verify");

        assert_eq!(result.aggregate, Aggregate::Pass);
        assert_eq!(result.count(FileStatus::Verified), 1);
        assert_eq!(result.count(FileStatus::Modified), 0);
        assert_eq!(result.count(FileStatus::Deleted), 0);
        assert_eq!(result.count(FileStatus::Added), 0);
    }

    #[test]
    fn tampered_file_fails() {
        let fx = fixture();
        write(&fx.project, "vendored/util.go", "tampered");

        let lock = lock_entry(
            vec![("vendored/util.go", sha256_hex(b"package util"))],
            vec![],
        );
        let config = config_one_vendor(vec![("util.go", "vendored/util.go")]);

        let service = VerifyService::new(&fx.project, &fx.vendor_dir);
        let result = service.verify(&config, &lock).expect("verify");

        assert_eq!(result.aggregate, Aggregate::Fail);
        assert_eq!(result.count(FileStatus::Modified), 1);
        let check = &result.files[0];
        assert_eq!(check.actual_hash, sha256_hex(b"tampered"));
    }

    #[test]
    fn missing_file_is_deleted() {
        let fx = fixture();
        let lock = lock_entry(
            vec![("vendored/util.go", sha256_hex(b"package util"))],
            vec![],
        );
        let config = config_one_vendor(vec![("util.go", "vendored/util.go")]);

        let service = VerifyService::new(&fx.project, &fx.vendor_dir);
        let result = service.verify(&config, &lock).expect("verify");

        assert_eq!(result.aggregate, Aggregate::Fail);
        assert_eq!(result.count(FileStatus::Deleted), 1);
    }

    #[test]
    fn accepted_drift_downgrades_to_warn() {
        let fx = fixture();
        write(&fx.project, "vendored/util.go", "patched locally");

        let mut lock = lock_entry(
            vec![("vendored/util.go", sha256_hex(b"package util"))],
            vec![],
        );
        let mut accepted = BTreeMap::new();
        accepted.insert(
            "vendored/util.go".to_string(),
            sha256_hex(b"patched locally"),
        );
        lock.vendors[0].accepted_drift = Some(accepted);
        let config = config_one_vendor(vec![("util.go", "vendored/util.go")]);

        let service = VerifyService::new(&fx.project, &fx.vendor_dir);
        let result = service.verify(&config, &lock).expect("verify");

        assert_eq!(result.aggregate, Aggregate::Warn);
        assert_eq!(result.count(FileStatus::Accepted), 1);
        assert_eq!(result.count(FileStatus::Modified), 0);
    }

    #[test]
    fn position_region_tamper_flags_only_that_position() {
        let fx = fixture();
        // Two vendored regions in one file plus placeholders between.
        let a_content = "a1\na2\na3\na4\na5";
        let b_content = "b1\nb2\nb3\nb4\nb5\nb6";
        let mut doc: Vec<String> = a_content.split('\n').map(str::to_string).collect();
        while doc.len() < 9 {
            doc.push(String::new());
        }
        doc.extend(b_content.split('\n').map(str::to_string));
        write(&fx.project, "output.go", &doc.join("\n"));

        let lock = VendorLock {
            schema_version: SCHEMA_VERSION.to_string(),
            vendors: vec![
                LockDetails {
                    name: "vendor-a".to_string(),
                    ref_: "main".to_string(),
                    commit_hash: "a".repeat(40),
                    updated: Utc::now(),
                    file_hashes: BTreeMap::new(),
                    positions: vec![PositionLock {
                        from: "src.go:L1-L5".to_string(),
                        to: "output.go:L1-L5".to_string(),
                        source_hash: sha256_prefixed(a_content.as_bytes()),
                    }],
                    license_path: None,
                    license_spdx: None,
                    source_version_tag: None,
                    vendored_at: Utc::now(),
                    vendored_by: "tester".to_string(),
                    last_synced_at: Utc::now(),
                    source: None,
                    source_file_hashes: None,
                    accepted_drift: None,
                },
                LockDetails {
                    name: "vendor-b".to_string(),
                    ref_: "main".to_string(),
                    commit_hash: "b".repeat(40),
                    updated: Utc::now(),
                    file_hashes: BTreeMap::new(),
                    positions: vec![PositionLock {
                        from: "src.go:L1-L6".to_string(),
                        to: "output.go:L10-L15".to_string(),
                        source_hash: sha256_prefixed(b_content.as_bytes()),
                    }],
                    license_path: None,
                    license_spdx: None,
                    source_version_tag: None,
                    vendored_at: Utc::now(),
                    vendored_by: "tester".to_string(),
                    last_synced_at: Utc::now(),
                    source: None,
                    source_file_hashes: None,
                    accepted_drift: None,
                },
            ],
        };
        let config = VendorConfig::default();
        let service = VerifyService::new(&fx.project, &fx.vendor_dir);

        let result = service.verify(&config, &lock).expect("verify");
        assert_eq!(result.aggregate, Aggregate::Pass);
        assert!(result.positions.iter().all(|p| p.status == FileStatus::Verified));

        // Tamper only vendor-a's region (line 2).
        let mut tampered: Vec<String> = doc.clone();
        tampered[1] = "TAMPERED".to_string();
        write(&fx.project, "output.go", &tampered.join("\n"));

        let result = service.verify(&config, &lock).expect("verify");
        assert_eq!(result.aggregate, Aggregate::Fail);
        let a = result
            .positions
            .iter()
            .find(|p| p.vendor == "vendor-a")
            .expect("a");
        let b = result
            .positions
            .iter()
            .find(|p| p.vendor == "vendor-b")
            .expect("b");
        assert_eq!(a.status, FileStatus::Modified);
        assert_eq!(b.status, FileStatus::Verified);
        assert_eq!(result.count(FileStatus::Modified), 1);
    }

    #[test]
    fn column_range_tamper_produces_exactly_one_modified_position() {
        let fx = fixture();
        let placed = "9ABCDEFGHIJKLMNOPQRST";
        write(
            &fx.project,
            "dest.txt",
            &format!("AAAAA{placed}BBBBB"),
        );

        let lock = lock_entry(
            vec![],
            vec![PositionLock {
                from: "src.txt:L5C10-L5C30".to_string(),
                to: "dest.txt:L1C6-L1C26".to_string(),
                source_hash: sha256_prefixed(placed.as_bytes()),
            }],
        );
        let config = VendorConfig::default();
        let service = VerifyService::new(&fx.project, &fx.vendor_dir);

        let result = service.verify(&config, &lock).expect("verify");
        assert_eq!(result.aggregate, Aggregate::Pass);

        // Flip one byte inside the placed range (offset 10 of the line).
        let mut bytes = format!("AAAAA{placed}BBBBB").into_bytes();
        bytes[10] = b'!';
        std::fs::write(
            fx.project.join("dest.txt"),
            String::from_utf8(bytes).expect("utf8"),
        )
        .expect("write");

        let result = service.verify(&config, &lock).expect("verify");
        assert_eq!(result.aggregate, Aggregate::Fail);
        assert_eq!(result.count(FileStatus::Modified), 1);
        assert_eq!(result.positions[0].status, FileStatus::Modified);
        assert_eq!(result.files.len(), 0, "no whole-file entries change");
    }

    #[test]
    fn out_of_range_position_reports_error_text_as_actual() {
        let fx = fixture();
        write(&fx.project, "snippet.txt", "only\ntwo");

        let lock = lock_entry(
            vec![],
            vec![PositionLock {
                from: "data.txt:L2-L9".to_string(),
                to: "snippet.txt:L5-L9".to_string(),
                source_hash: sha256_prefixed(b"whatever"),
            }],
        );
        let config = VendorConfig::default();

        let service = VerifyService::new(&fx.project, &fx.vendor_dir);
        let result = service.verify(&config, &lock).expect("verify");

        let check = &result.positions[0];
        assert_eq!(check.status, FileStatus::Modified);
        assert!(check.actual_hash.contains("out of range"));
    }

    #[test]
    fn whole_file_and_position_classify_independently() {
        let fx = fixture();
        write(&fx.project, "whole.txt", "whole body");
        let range = "r3\nr4\nr5";
        write(&fx.project, "lib.go", &format!("r1\nr2\n{range}\nr6"));

        let lock = lock_entry(
            vec![("whole.txt", sha256_hex(b"whole body"))],
            vec![PositionLock {
                from: "partial.txt:L2-L4".to_string(),
                to: "lib.go:L3-L5".to_string(),
                source_hash: sha256_prefixed(range.as_bytes()),
            }],
        );
        let config = config_one_vendor(vec![
            ("whole.txt", "whole.txt"),
            ("partial.txt:L2-L4", "lib.go:L3-L5"),
        ]);

        let service = VerifyService::new(&fx.project, &fx.vendor_dir);

        // Modify only the whole file.
        write(&fx.project, "whole.txt", "changed body");
        let result = service.verify(&config, &lock).expect("verify");
        assert_eq!(result.count(FileStatus::Modified), 1);
        assert_eq!(result.positions[0].status, FileStatus::Verified);

        // Restore it and modify the placed range instead.
        write(&fx.project, "whole.txt", "whole body");
        write(&fx.project, "lib.go", "r1\nr2\nX3\nX4\nX5\nr6");
        let result = service.verify(&config, &lock).expect("verify");
        assert_eq!(result.files[0].status, FileStatus::Verified);
        assert_eq!(result.positions[0].status, FileStatus::Modified);
    }

    #[test]
    fn unexpected_file_in_dest_dir_is_added() {
        let fx = fixture();
        write(&fx.project, "vendored/util.go", "package util");
        write(&fx.project, "vendored/rogue.go", "rogue");

        let lock = lock_entry(
            vec![("vendored/util.go", sha256_hex(b"package util"))],
            vec![],
        );
        let config = config_one_vendor(vec![("util.go", "vendored/util.go")]);

        let service = VerifyService::new(&fx.project, &fx.vendor_dir);
        let result = service.verify(&config, &lock).expect("verify");

        assert_eq!(result.aggregate, Aggregate::Warn);
        assert_eq!(result.count(FileStatus::Added), 1);
        let added = result
            .files
            .iter()
            .find(|f| f.status == FileStatus::Added)
            .expect("added");
        assert_eq!(added.path, "vendored/rogue.go");
    }

    #[test]
    fn config_path_missing_from_lock_is_stale() {
        let fx = fixture();
        write(&fx.project, "vendored/util.go", "package util");

        let lock = lock_entry(
            vec![("vendored/util.go", sha256_hex(b"package util"))],
            vec![],
        );
        let config = config_one_vendor(vec![
            ("util.go", "vendored/util.go"),
            ("extra.go", "vendored/extra.go"),
        ]);

        let service = VerifyService::new(&fx.project, &fx.vendor_dir);
        let result = service.verify(&config, &lock).expect("verify");

        assert_eq!(result.count(FileStatus::Stale), 1);
        assert_eq!(result.aggregate, Aggregate::Warn);
    }

    #[test]
    fn lock_path_without_mapping_is_orphaned() {
        let fx = fixture();
        write(&fx.project, "vendored/util.go", "package util");
        write(&fx.project, "elsewhere/old.go", "old");

        let lock = lock_entry(
            vec![
                ("vendored/util.go", sha256_hex(b"package util")),
                ("elsewhere/old.go", sha256_hex(b"old")),
            ],
            vec![],
        );
        let config = config_one_vendor(vec![("util.go", "vendored/util.go")]);

        let service = VerifyService::new(&fx.project, &fx.vendor_dir);
        let result = service.verify(&config, &lock).expect("verify");

        let orphaned: Vec<&FileCheck> = result
            .files
            .iter()
            .filter(|f| f.status == FileStatus::Orphaned)
            .collect();
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].path, "elsewhere/old.go");
    }

    #[test]
    fn cache_snapshot_backfills_missing_file_hashes() {
        let fx = fixture();
        write(&fx.project, "vendored/util.go", "package util");

        let mut lock = lock_entry(vec![], vec![]);
        lock.vendors[0].commit_hash = "c".repeat(40);

        let cache = CacheStore::in_root(&fx.vendor_dir);
        cache
            .save(
                "utils",
                "main",
                &crate::cache::CacheEntry {
                    commit_hash: "c".repeat(40),
                    files: vec![crate::cache::CacheFile {
                        path: "vendored/util.go".to_string(),
                        hash: sha256_hex(b"package util"),
                    }],
                },
            )
            .expect("save");

        let config = config_one_vendor(vec![("util.go", "vendored/util.go")]);
        let service = VerifyService::new(&fx.project, &fx.vendor_dir);
        let result = service.verify(&config, &lock).expect("verify");

        assert_eq!(result.count(FileStatus::Verified), 1);
        assert_eq!(result.aggregate, Aggregate::Pass);
    }

    #[test]
    fn stale_cache_snapshot_is_ignored() {
        let fx = fixture();
        let mut lock = lock_entry(vec![], vec![]);
        lock.vendors[0].commit_hash = "c".repeat(40);

        let cache = CacheStore::in_root(&fx.vendor_dir);
        cache
            .save(
                "utils",
                "main",
                &crate::cache::CacheEntry {
                    commit_hash: "d".repeat(40),
                    files: vec![crate::cache::CacheFile {
                        path: "vendored/util.go".to_string(),
                        hash: sha256_hex(b"package util"),
                    }],
                },
            )
            .expect("save");

        let config = VendorConfig::default();
        let service = VerifyService::new(&fx.project, &fx.vendor_dir);
        let result = service.verify(&config, &lock).expect("verify");

        assert!(result.files.is_empty());
        assert_eq!(result.aggregate, Aggregate::Pass);
    }

    #[test]
    fn internal_drift_directions() {
        let fx = fixture();
        write(&fx.project, "src/shared/a.rs", "source body");
        write(&fx.project, "lib/shared/a.rs", "source body");

        let mut config = config_one_vendor(vec![("a.rs", "lib/shared/a.rs")]);
        config.vendors[0].name = "shared".to_string();
        config.vendors[0].url = "src/shared".to_string();
        config.vendors[0].source = Some(SourceKind::Internal);
        config.vendors[0].compliance = Some("source-canonical".to_string());

        let mut source_hashes = BTreeMap::new();
        source_hashes.insert("a.rs".to_string(), sha256_hex(b"source body"));

        let mut lock = lock_entry(
            vec![("lib/shared/a.rs", sha256_hex(b"source body"))],
            vec![],
        );
        lock.vendors[0].name = "shared".to_string();
        lock.vendors[0].ref_ = "local".to_string();
        lock.vendors[0].source = Some(SourceKind::Internal);
        lock.vendors[0].source_file_hashes = Some(source_hashes);

        let service = VerifyService::new(&fx.project, &fx.vendor_dir);

        let result = service.verify(&config, &lock).expect("verify");
        assert_eq!(result.internal[0].direction, DriftDirection::Synced);

        // Source drifts.
        write(&fx.project, "src/shared/a.rs", "edited source");
        let result = service.verify(&config, &lock).expect("verify");
        assert_eq!(result.internal[0].direction, DriftDirection::SourceDrift);

        // Both drift.
        write(&fx.project, "lib/shared/a.rs", "edited dest");
        let result = service.verify(&config, &lock).expect("verify");
        assert_eq!(result.internal[0].direction, DriftDirection::BothDrift);

        // Dest drift only.
        write(&fx.project, "src/shared/a.rs", "source body");
        let result = service.verify(&config, &lock).expect("verify");
        assert_eq!(result.internal[0].direction, DriftDirection::DestDrift);
        assert!(result.internal[0].suggested_action.contains("re-sync"));
    }
}
