//! Whole-file, whole-tree, and mapping-driven copies.
//!
//! The copier materializes one branch spec's mappings from a checked-out
//! source tree into the project tree. Whole copies record destination
//! file hashes for the lock; position mappings extract, place, and record
//! a [`PositionLock`] instead. Any path component named `.git` is skipped
//! and destination paths are validated before a single byte moves.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use graft_types::{BranchSpec, CopyStats, Error, PositionLock, Result, VendorSpec};

use crate::hash;
use crate::position::{self, parse_file_position, validate_dest_path};

/// Everything one branch spec's copy produced.
#[derive(Debug, Clone, Default)]
pub struct MappingOutcome {
    pub stats: CopyStats,
    pub positions: Vec<PositionLock>,
    /// Destination path (forward-slash, project-relative) → whole-file hex
    /// hash. Position destinations are tracked in `positions`, not here.
    pub file_hashes: BTreeMap<String, String>,
}

/// Copy a single file, creating parent directories.
pub fn copy_file(src: &Path, dst: &Path) -> Result<CopyStats> {
    if let Some(parent) = dst.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
    }
    let byte_count = fs::copy(src, dst).map_err(|e| Error::io(src, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dst, fs::Permissions::from_mode(0o644))
            .map_err(|e| Error::io(dst, e))?;
    }

    Ok(CopyStats {
        file_count: 1,
        byte_count,
    })
}

/// Copy a directory tree, skipping `.git` and non-regular entries.
/// Symlinks are followed; what they point at is copied.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<CopyStats> {
    let mut stats = CopyStats::default();
    let mut copied = Vec::new();
    copy_dir_inner(src, dst, String::new(), &mut stats, &mut copied)?;
    Ok(stats)
}

fn copy_dir_inner(
    src: &Path,
    dst: &Path,
    rel: String,
    stats: &mut CopyStats,
    copied: &mut Vec<String>,
) -> Result<()> {
    fs::create_dir_all(dst).map_err(|e| Error::io(dst, e))?;

    let mut entries: Vec<_> = fs::read_dir(src)
        .map_err(|e| Error::io(src, e))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| Error::io(src, e))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let name_str = name.to_string_lossy().to_string();
        let child_rel = if rel.is_empty() {
            name_str.clone()
        } else {
            format!("{rel}/{name_str}")
        };

        // metadata() follows symlinks, so links to files/dirs copy as
        // their targets; broken links and specials are skipped.
        let meta = match fs::metadata(entry.path()) {
            Ok(meta) => meta,
            Err(_) => continue,
        };

        if meta.is_dir() {
            copy_dir_inner(&entry.path(), &dst.join(&name), child_rel, stats, copied)?;
        } else if meta.is_file() {
            stats.add(copy_file(&entry.path(), &dst.join(&name))?);
            copied.push(child_rel);
        }
    }
    Ok(())
}

/// Join two forward-slash path fragments.
fn join_slash(prefix: &str, rest: &str) -> String {
    if prefix.is_empty() {
        rest.to_string()
    } else {
        format!("{}/{rest}", prefix.trim_end_matches('/'))
    }
}

/// Auto-naming for mappings with an empty `to`: the branch spec's default
/// target (or `lib/<vendor>`) plus the source's final component.
fn auto_dest(vendor: &VendorSpec, spec: &BranchSpec, from_path: &str) -> String {
    let prefix = spec
        .default_target
        .clone()
        .unwrap_or_else(|| format!("lib/{}", vendor.name));
    let basename = from_path.rsplit('/').next().unwrap_or(from_path);
    join_slash(&prefix, basename)
}

/// Materialize every mapping of one branch spec.
///
/// `repo_root` is the checked-out source tree, `project_root` the tree
/// being vendored into. With `dry_run` nothing is written: position
/// mappings still extract and record (so hash drift is observable), whole
/// copies only validate.
pub fn copy_mappings(
    repo_root: &Path,
    project_root: &Path,
    vendor: &VendorSpec,
    branch_spec: &BranchSpec,
    dry_run: bool,
) -> Result<MappingOutcome> {
    let mut outcome = MappingOutcome::default();

    for mapping in &branch_spec.mapping {
        let from = parse_file_position(&mapping.from)?;
        let src = repo_root.join(&from.path);

        if let Some(from_spec) = &from.spec {
            let to = parse_file_position(&mapping.to)?;
            validate_dest_path(&to.path)?;

            let (text, source_hash) = position::extract_from_file(&src, from_spec)?;
            if !dry_run {
                let dest = project_root.join(&to.path);
                position::place_into_file(&dest, &text, to.spec.as_ref())?;
                outcome.stats.file_count += 1;
                outcome.stats.byte_count += text.len() as u64;
            }
            outcome.positions.push(PositionLock {
                from: from.to_string(),
                to: to.to_string(),
                source_hash,
            });
            continue;
        }

        let dest_rel = if mapping.to.trim().is_empty() {
            auto_dest(vendor, branch_spec, &from.path)
        } else {
            let to = parse_file_position(&mapping.to)?;
            if to.spec.is_some() {
                // A positioned destination needs a positioned source.
                return Err(Error::PositionParse {
                    expr: mapping.to.clone(),
                    message: "destination position requires a source position".to_string(),
                });
            }
            to.path
        };
        validate_dest_path(&dest_rel)?;

        let meta = fs::metadata(&src).map_err(|e| Error::io(&src, e))?;
        if dry_run {
            continue;
        }

        let dest = project_root.join(&dest_rel);
        if meta.is_dir() {
            let mut copied = Vec::new();
            let mut stats = CopyStats::default();
            copy_dir_inner(&src, &dest, String::new(), &mut stats, &mut copied)?;
            outcome.stats.add(stats);
            for rel in copied {
                let full = dest.join(&rel);
                let hash = hash::file_sha256_hex(&full)?;
                outcome
                    .file_hashes
                    .insert(join_slash(&dest_rel, &rel), hash);
            }
        } else {
            outcome.stats.add(copy_file(&src, &dest)?);
            let hash = hash::file_sha256_hex(&dest)?;
            outcome.file_hashes.insert(dest_rel, hash);
        }
    }

    Ok(outcome)
}
