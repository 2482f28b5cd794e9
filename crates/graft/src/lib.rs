//! # graft
//!
//! A source-vendoring engine for project trees.
//!
//! graft mirrors selected files, directory subtrees, or line/column ranges
//! from external git repositories (and from local paths of the host
//! project) into the project's own working tree, then tracks what was
//! placed where with SHA-256 hashes so that drift, upstream staleness, and
//! supply-chain risk are all detectable offline.
//!
//! ## Pipeline
//!
//! The core flow is **sync → lock → verify**, with audit composing the
//! read-only checks:
//!
//! 1. [`sync::SyncService`] shallow-fetches each vendor ref into an
//!    ephemeral clone, gates on license, runs hooks, and copies the
//!    declared mappings (including byte-precise position ranges).
//! 2. [`update::UpdateService`] regenerates `vendor.lock`, preserving
//!    first-vendored provenance while refreshing hashes and timestamps.
//! 3. [`verify::VerifyService`] reconciles config, lock, and tree,
//!    classifying every file as verified/modified/deleted/added/accepted/
//!    stale/orphaned.
//! 4. [`audit::AuditService`] fans out to verify, the vulnerability
//!    scanner, the license checker, and the upstream-staleness check, and
//!    folds their verdicts into one aggregate.
//!
//! ## Key types
//!
//! The domain model (vendor specs, lock details, positions, result views,
//! and the typed error taxonomy) lives in [`graft_types`] and is
//! re-exported here as [`types`].
//!
//! ## Modules
//!
//! - [`position`] — path+range grammar, byte-precise extract/place
//! - [`cache`] — content-addressed per-file and per-ref snapshots
//! - [`copier`] — whole-file/whole-tree/position mapping copies
//! - [`license`] — provider license detection and allowlist gating
//! - [`sync`] — external vendor sync state machine
//! - [`internal`] — host-tree vendors (`ref = "local"`)
//! - [`executor`] — bounded parallel worker pool
//! - [`update`] — lockfile regeneration
//! - [`verify`] — drift detection and classification
//! - [`scanner`] — advisory queries with TTL cache and stale fallback
//! - [`sbom`] — bill-of-materials emission in two formats
//! - [`outdated`] — upstream staleness via ls-remote
//! - [`audit`] — audit/status orchestration
//! - [`reporter`] — UI callback seam

/// Content hashing helpers shared by every subsystem.
pub mod hash;

/// Position grammar parsing and byte-precise extraction/placement.
pub mod position;

/// Content-addressed cache: file checksum oracle and per-ref snapshots.
pub mod cache;

/// Whole-file, whole-tree, and mapping-driven copies.
pub mod copier;

/// Per-provider license detection with an SPDX allowlist.
pub mod license;

/// UI callback trait and stock implementations.
pub mod reporter;

/// External vendor sync state machine.
pub mod sync;

/// Internal (host-tree) vendor sync.
pub mod internal;

/// Bounded parallel executor over vendor jobs.
pub mod executor;

/// Lockfile regeneration with provenance preservation.
pub mod update;

/// Drift detection and per-file classification.
pub mod verify;

/// Vulnerability scanner with on-disk TTL cache.
pub mod scanner;

/// SBOM emission (CycloneDX and SPDX idioms).
pub mod sbom;

/// Upstream staleness checks over ls-remote.
pub mod outdated;

/// Audit and status orchestration.
pub mod audit;

/// Domain types, result views, and the error taxonomy.
pub use graft_types as types;

/// Retry strategies re-exported from the graft-retry microcrate.
pub use graft_retry as retry;
