//! Core types for graft.
//!
//! This crate defines the domain model shared by the engine and the CLI:
//! the declarative vendor configuration (`vendor.yml`), the provenance
//! lockfile (`vendor.lock`), position ranges, result views for
//! verify/scan/audit/status, and the typed error taxonomy.
//!
//! All persisted paths use forward slashes; conversion to OS-native form
//! happens at the filesystem boundary, never in these types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written into every persisted document and result view.
pub const SCHEMA_VERSION: &str = "1.0";

/// Prefix carried by position source hashes (`"sha256:" + 64 hex chars`).
pub const SHA256_PREFIX: &str = "sha256:";

pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Typed error taxonomy for the engine.
///
/// Every kind carries a structured payload; downstream code matches on the
/// variant, never on message text. Network-classified kinds are the only
/// ones eligible for retry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config {}: {message}", path.display())]
    ConfigLoad { path: PathBuf, message: String },

    #[error("failed to load lockfile {}: {message}", path.display())]
    LockLoad { path: PathBuf, message: String },

    #[error("invalid config: {message}")]
    ConfigInvalid { message: String },

    #[error("invalid destination path {path:?}: absolute paths and `..` traversal are not allowed")]
    DestPathInvalid { path: String },

    #[error("vendor {name:?} not found in config")]
    VendorNotFound { name: String },

    #[error("group {group:?} not found in config")]
    GroupNotFound { group: String },

    #[error("invalid position {expr:?}: {message}")]
    PositionParse { expr: String, message: String },

    #[error("position out of range in {path}: {message}")]
    PositionOutOfRange { path: String, message: String },

    #[error("git {stage} failed: {stderr}")]
    GitFailed { stage: String, stderr: String },

    #[error("license {spdx:?} for vendor {vendor:?} is not in the allowlist")]
    LicenseBlocked { vendor: String, spdx: String },

    #[error("network error: {message}")]
    NetworkRetryable { message: String },

    #[error("rate limited by advisory endpoint")]
    RateLimited { retry_after: Option<u64> },

    #[error("hook {hook:?} exited with code {exit_code}: {stderr}")]
    HookFailed {
        hook: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Attach a path to an io error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry with backoff may resolve this error.
    ///
    /// Only network-classified failures qualify; validation and
    /// IO-mutation errors never do.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NetworkRetryable { .. } | Error::RateLimited { .. }
        )
    }

    /// Whether the underlying io error is a missing-file condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cheap cloneable cancellation handle.
///
/// A single token is passed from the caller down through workers, the git
/// adapter, and network clients; all of them poll it at suspension points
/// and return [`Error::Cancelled`] promptly once signaled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every holder of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Error out if the token has been signaled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Vendor configuration (vendor.yml)
// ---------------------------------------------------------------------------

/// Top-level `vendor.yml` document: an ordered sequence of vendors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VendorConfig {
    #[serde(default)]
    pub vendors: Vec<VendorSpec>,
}

/// Compliance posture for internal vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComplianceMode {
    /// The source location is canonical; destination drift should be
    /// overwritten on the next sync.
    SourceCanonical,
    /// Either side may change; conflicting edits need manual resolution.
    Bidirectional,
}

/// Where a vendor's content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// An external git repository (the default).
    #[default]
    Git,
    /// The host project's own tree.
    Internal,
}

/// Shell hooks run around a vendor's sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_sync: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_sync: Option<String>,
}

/// One declared vendor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VendorSpec {
    /// Unique vendor name, `[A-Za-z0-9._-]+`.
    pub name: String,
    /// Primary clone URL (or project-relative root for internal vendors).
    pub url: String,
    /// Fallback URLs tried in order when the primary fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    /// Expected SPDX license, informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Group labels for filtered operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    /// Compliance posture; validated against [`ComplianceMode`] values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Hooks>,
    /// Refs to vendor, each with its own mappings.
    #[serde(default)]
    pub specs: Vec<BranchSpec>,
}

impl VendorSpec {
    /// Whether this vendor's source is the host project tree.
    pub fn is_internal(&self) -> bool {
        matches!(self.source, Some(SourceKind::Internal))
    }

    /// Parsed compliance mode, `None` when unset.
    ///
    /// Unknown values are caught by [`VendorConfig::validate`]; this
    /// accessor treats them as unset.
    pub fn compliance_mode(&self) -> Option<ComplianceMode> {
        match self.compliance.as_deref() {
            Some("source-canonical") => Some(ComplianceMode::SourceCanonical),
            Some("bidirectional") => Some(ComplianceMode::Bidirectional),
            _ => None,
        }
    }

    /// Primary URL followed by declared fallbacks, in order.
    pub fn candidate_urls(&self) -> Vec<&str> {
        let mut out = vec![self.url.as_str()];
        if let Some(urls) = &self.urls {
            out.extend(urls.iter().map(String::as_str));
        }
        out
    }

    /// Whether this vendor carries the given group label.
    pub fn in_group(&self, group: &str) -> bool {
        self.groups
            .as_ref()
            .is_some_and(|gs| gs.iter().any(|g| g == group))
    }
}

/// One ref of a vendor plus the mappings to materialize from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchSpec {
    /// Branch name, tag, or full commit hash. Internal vendors use the
    /// literal `"local"`.
    #[serde(rename = "ref")]
    pub ref_: String,
    /// Destination prefix used when a mapping leaves `to` empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_target: Option<String>,
    #[serde(default)]
    pub mapping: Vec<PathMapping>,
}

/// One `{from, to}` pair; either side may carry a position suffix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathMapping {
    pub from: String,
    #[serde(default)]
    pub to: String,
}

fn valid_vendor_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

impl VendorConfig {
    /// Structural validation run after every load.
    ///
    /// Catches duplicate names, bad name characters, empty URLs, empty
    /// spec/mapping lists, empty `from` sides, and unknown compliance
    /// values. Destination path validation happens at copy time where the
    /// position suffix has been stripped.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for vendor in &self.vendors {
            if !valid_vendor_name(&vendor.name) {
                return Err(Error::ConfigInvalid {
                    message: format!(
                        "vendor name {:?} must match [A-Za-z0-9._-]+",
                        vendor.name
                    ),
                });
            }
            if !seen.insert(vendor.name.as_str()) {
                return Err(Error::ConfigInvalid {
                    message: format!("duplicate vendor name {:?}", vendor.name),
                });
            }
            if vendor.url.trim().is_empty() {
                return Err(Error::ConfigInvalid {
                    message: format!("vendor {:?} has an empty url", vendor.name),
                });
            }
            if let Some(c) = vendor.compliance.as_deref() {
                if c != "source-canonical" && c != "bidirectional" {
                    return Err(Error::ConfigInvalid {
                        message: format!(
                            "vendor {:?} has unknown compliance value {c:?}",
                            vendor.name
                        ),
                    });
                }
            }
            if vendor.specs.is_empty() {
                return Err(Error::ConfigInvalid {
                    message: format!("vendor {:?} has no specs", vendor.name),
                });
            }
            for spec in &vendor.specs {
                if spec.ref_.trim().is_empty() {
                    return Err(Error::ConfigInvalid {
                        message: format!("vendor {:?} has a spec with an empty ref", vendor.name),
                    });
                }
                if spec.mapping.is_empty() {
                    return Err(Error::ConfigInvalid {
                        message: format!(
                            "vendor {:?} ref {:?} has no mappings",
                            vendor.name, spec.ref_
                        ),
                    });
                }
                for m in &spec.mapping {
                    if m.from.trim().is_empty() {
                        return Err(Error::ConfigInvalid {
                            message: format!(
                                "vendor {:?} ref {:?} has a mapping with an empty `from`",
                                vendor.name, spec.ref_
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Look up a vendor by name.
    pub fn vendor(&self, name: &str) -> Option<&VendorSpec> {
        self.vendors.iter().find(|v| v.name == name)
    }

    /// All group labels declared anywhere in the config.
    pub fn known_groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = self
            .vendors
            .iter()
            .flat_map(|v| v.groups.iter().flatten())
            .map(String::as_str)
            .collect();
        groups.sort_unstable();
        groups.dedup();
        groups
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// A line or line+column range over a file.
///
/// Lines and columns are 1-based; both endpoints are inclusive. `to_eof`
/// means "through the last line, whatever it is". Absence of `end_line`
/// and `to_eof` means the single line `start_line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSpec {
    pub start_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_col: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_col: Option<usize>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub to_eof: bool,
}

impl PositionSpec {
    /// A single whole line.
    pub fn line(start_line: usize) -> Self {
        Self {
            start_line,
            start_col: None,
            end_line: None,
            end_col: None,
            to_eof: false,
        }
    }

    /// An inclusive line range.
    pub fn lines(start_line: usize, end_line: usize) -> Self {
        Self {
            end_line: Some(end_line),
            ..Self::line(start_line)
        }
    }

    /// From a line through end of file.
    pub fn from_line_to_eof(start_line: usize) -> Self {
        Self {
            to_eof: true,
            ..Self::line(start_line)
        }
    }

    /// Whether any column component is present.
    pub fn has_columns(&self) -> bool {
        self.start_col.is_some() || self.end_col.is_some()
    }
}

impl fmt::Display for PositionSpec {
    /// Renders the canonical suffix form, e.g. `L5C10-L7C2` or `L10-EOF`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.start_line)?;
        if let Some(c) = self.start_col {
            write!(f, "C{c}")?;
        }
        if self.to_eof {
            write!(f, "-EOF")?;
        } else if let Some(end) = self.end_line {
            write!(f, "-L{end}")?;
            if let Some(c) = self.end_col {
                write!(f, "C{c}")?;
            }
        }
        Ok(())
    }
}

/// A path with an optional position suffix, as parsed from a mapping side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePosition {
    /// Normalized forward-slash path, suffix stripped.
    pub path: String,
    pub spec: Option<PositionSpec>,
}

impl fmt::Display for FilePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.spec {
            Some(spec) => write!(f, "{}:{}", self.path, spec),
            None => write!(f, "{}", self.path),
        }
    }
}

// ---------------------------------------------------------------------------
// Lockfile (vendor.lock)
// ---------------------------------------------------------------------------

/// Top-level `vendor.lock` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorLock {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub vendors: Vec<LockDetails>,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

impl Default for VendorLock {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            vendors: Vec::new(),
        }
    }
}

impl VendorLock {
    /// Look up the entry for `(name, ref)`.
    pub fn entry(&self, name: &str, ref_: &str) -> Option<&LockDetails> {
        self.vendors
            .iter()
            .find(|d| d.name == name && d.ref_ == ref_)
    }
}

/// One position placement recorded in the lock.
///
/// `source_hash` is always the 71-character `"sha256:" + hex` form of the
/// extracted content. `from`/`to` keep their position suffixes verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLock {
    pub from: String,
    pub to: String,
    pub source_hash: String,
}

/// Locked provenance for one `(name, ref)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockDetails {
    pub name: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    /// Full commit hash; for internal vendors a SHA-256 over the source
    /// file hashes.
    pub commit_hash: String,
    pub updated: DateTime<Utc>,
    /// Destination path (bare, no position suffix) → whole-file sha256 hex.
    #[serde(default)]
    pub file_hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positions: Vec<PositionLock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_spdx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_version_tag: Option<String>,
    pub vendored_at: DateTime<Utc>,
    pub vendored_by: String,
    pub last_synced_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceKind>,
    /// Source path → sha256 hex, populated for internal vendors so drift
    /// direction is decidable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_hashes: Option<BTreeMap<String, String>>,
    /// Destination path → accepted sha256 hex; divergence matching one of
    /// these verifies as `accepted` instead of `modified`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_drift: Option<BTreeMap<String, String>>,
}

impl LockDetails {
    pub fn is_internal(&self) -> bool {
        matches!(self.source, Some(SourceKind::Internal))
    }

    /// Accepted hash for a destination path, if one was whitelisted.
    pub fn accepted_hash(&self, path: &str) -> Option<&str> {
        self.accepted_drift
            .as_ref()
            .and_then(|m| m.get(path))
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Sync inputs and outputs
// ---------------------------------------------------------------------------

/// Options threaded through sync/update flows.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Re-sync even when the skip predicate holds.
    pub force: bool,
    /// Ignore cached snapshots entirely.
    pub no_cache: bool,
    /// Run everything except Copy and Hooks.
    pub dry_run: bool,
    /// Allow file-URL and local-path sources.
    pub local: bool,
    /// Restrict to one vendor by name.
    pub vendor_name: Option<String>,
    /// Restrict to vendors carrying this group label.
    pub group: Option<String>,
    /// Severity threshold forwarded to the scanner.
    pub scan_fail_on: Option<Severity>,
    /// Skip the license gate.
    pub no_license_check: bool,
    /// Worker-pool bound; `None` uses available parallelism.
    pub max_workers: Option<usize>,
}

/// Copy totals emitted by one vendor's sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyStats {
    pub file_count: u64,
    pub byte_count: u64,
}

impl CopyStats {
    pub fn add(&mut self, other: CopyStats) {
        self.file_count += other.file_count;
        self.byte_count += other.byte_count;
    }
}

/// Resolved upstream metadata for one synced ref.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefMetadata {
    pub commit_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positions: Vec<PositionLock>,
}

// ---------------------------------------------------------------------------
// Aggregates and classification
// ---------------------------------------------------------------------------

/// Three-valued check verdict. Orchestrator-specific extensions
/// (drifted/conflict) map onto `Fail`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Aggregate {
    #[default]
    Pass,
    Warn,
    Fail,
}

impl Aggregate {
    /// CLI exit-code contract: 0 pass, 1 fail, 2 warn-only.
    pub fn exit_code(self) -> i32 {
        match self {
            Aggregate::Pass => 0,
            Aggregate::Fail => 1,
            Aggregate::Warn => 2,
        }
    }

    /// Fold two verdicts, keeping the worse one.
    pub fn worst(self, other: Aggregate) -> Aggregate {
        self.max(other)
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Aggregate::Pass => "PASS",
            Aggregate::Warn => "WARN",
            Aggregate::Fail => "FAIL",
        };
        f.write_str(s)
    }
}

/// Per-file verification verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Verified,
    Modified,
    Deleted,
    Added,
    Accepted,
    Stale,
    Orphaned,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Verified => "verified",
            FileStatus::Modified => "modified",
            FileStatus::Deleted => "deleted",
            FileStatus::Added => "added",
            FileStatus::Accepted => "accepted",
            FileStatus::Stale => "stale",
            FileStatus::Orphaned => "orphaned",
        };
        f.write_str(s)
    }
}

/// Drift direction for an internal mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftDirection {
    Synced,
    SourceDrift,
    DestDrift,
    BothDrift,
}

// ---------------------------------------------------------------------------
// Verify result view
// ---------------------------------------------------------------------------

/// One classified destination file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCheck {
    pub path: String,
    pub vendor: String,
    pub status: FileStatus,
    pub expected_hash: String,
    /// Actual whole-file hash; empty when the file is missing.
    pub actual_hash: String,
}

/// One re-verified position placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionCheck {
    pub vendor: String,
    pub from: String,
    pub to: String,
    pub status: FileStatus,
    pub expected_hash: String,
    /// Actual `"sha256:" + hex`; carries the extraction error text when the
    /// range no longer fits the file.
    pub actual_hash: String,
}

/// Drift assessment for one internal vendor entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalCheck {
    pub vendor: String,
    pub direction: DriftDirection,
    /// Human guidance derived from the vendor's compliance mode.
    pub suggested_action: String,
}

/// Output of the verify service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub schema_version: String,
    pub timestamp: DateTime<Utc>,
    pub files: Vec<FileCheck>,
    pub positions: Vec<PositionCheck>,
    pub internal: Vec<InternalCheck>,
    pub aggregate: Aggregate,
}

impl VerifyResult {
    /// Count of files (and positions) with the given status.
    pub fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
            + self
                .positions
                .iter()
                .filter(|p| p.status == status)
                .count()
    }

    /// Derive the aggregate from the recorded checks.
    pub fn derive_aggregate(&mut self) {
        let fail = self.count(FileStatus::Modified) > 0 || self.count(FileStatus::Deleted) > 0;
        let warn = self.count(FileStatus::Added) > 0
            || self.count(FileStatus::Accepted) > 0
            || self.count(FileStatus::Stale) > 0
            || self.count(FileStatus::Orphaned) > 0;
        self.aggregate = if fail {
            Aggregate::Fail
        } else if warn {
            Aggregate::Warn
        } else {
            Aggregate::Pass
        };
    }
}

// ---------------------------------------------------------------------------
// Scanner result view
// ---------------------------------------------------------------------------

/// Vulnerability severity, ordered `Unknown < Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map a CVSS v3 base score onto a severity bucket.
    pub fn from_cvss_score(score: f64) -> Severity {
        if score >= 9.0 {
            Severity::Critical
        } else if score >= 7.0 {
            Severity::High
        } else if score >= 4.0 {
            Severity::Medium
        } else if score > 0.0 {
            Severity::Low
        } else {
            Severity::Unknown
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Unknown => "UNKNOWN",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UNKNOWN" => Ok(Severity::Unknown),
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity {other:?}")),
        }
    }
}

/// One normalized advisory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
}

/// Scan outcome for one locked dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyReport {
    pub name: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub purl: String,
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
    /// Served from a fresh cache entry.
    #[serde(default)]
    pub from_cache: bool,
    /// Served from an expired entry after a network failure.
    #[serde(default)]
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Output of the vulnerability scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub schema_version: String,
    pub timestamp: DateTime<Utc>,
    pub dependencies: Vec<DependencyReport>,
    pub total_vulnerabilities: usize,
    pub counts: BTreeMap<Severity, usize>,
    pub fail_on: Severity,
    pub threshold_exceeded: bool,
    pub aggregate: Aggregate,
}

impl ScanResult {
    /// Recompute totals, counts, threshold, and aggregate from the
    /// per-dependency reports.
    pub fn derive(&mut self) {
        self.total_vulnerabilities = self
            .dependencies
            .iter()
            .map(|d| d.vulnerabilities.len())
            .sum();
        self.counts.clear();
        for dep in &self.dependencies {
            for v in &dep.vulnerabilities {
                *self.counts.entry(v.severity).or_insert(0) += 1;
            }
        }
        self.threshold_exceeded = self
            .dependencies
            .iter()
            .flat_map(|d| &d.vulnerabilities)
            .any(|v| v.severity >= self.fail_on && v.severity != Severity::Unknown);
        self.aggregate = if self.threshold_exceeded {
            Aggregate::Fail
        } else if self.total_vulnerabilities > 0 {
            Aggregate::Warn
        } else {
            Aggregate::Pass
        };
    }
}

// ---------------------------------------------------------------------------
// Outdated / license / audit / status views
// ---------------------------------------------------------------------------

/// Upstream comparison state for one lock entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutdatedState {
    UpToDate,
    Stale,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutdatedEntry {
    pub name: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub locked_commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_commit: Option<String>,
    pub state: OutdatedState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutdatedResult {
    pub schema_version: String,
    pub timestamp: DateTime<Utc>,
    pub entries: Vec<OutdatedEntry>,
    pub aggregate: Aggregate,
}

/// License posture for one locked vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseEntry {
    pub vendor: String,
    pub spdx: String,
    pub allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseResult {
    pub schema_version: String,
    pub timestamp: DateTime<Utc>,
    pub entries: Vec<LicenseEntry>,
    pub aggregate: Aggregate,
}

/// Composite audit report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub schema_version: String,
    pub timestamp: DateTime<Utc>,
    /// Sub-checks attempted.
    pub checks: u32,
    pub passed: u32,
    pub failed: u32,
    pub warnings: u32,
    /// `"<check>: <message>"` strings for sub-check errors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifyResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<LicenseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outdated: Option<OutdatedResult>,
    pub aggregate: Aggregate,
}

/// Per-file drift detail surfaced by status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftDetail {
    pub path: String,
    pub lock_hash: String,
    pub disk_hash: String,
    pub accepted: bool,
}

/// Per-vendor status line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorStatus {
    pub name: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub commit_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outdated: Option<OutdatedState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drift: Vec<DriftDetail>,
}

/// Composite status report (the cheap read).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResult {
    pub schema_version: String,
    pub timestamp: DateTime<Utc>,
    pub vendors: Vec<VendorStatus>,
    pub aggregate: Aggregate,
}
