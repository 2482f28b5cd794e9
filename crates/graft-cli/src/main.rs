//! Thin CLI adapter over the graft engine.
//!
//! Command parsing and exit-code mapping only — every decision of
//! substance lives in the `graft` crate. Exit codes follow the engine's
//! aggregate contract: 0 pass, 1 fail, 2 warn-only.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use graft::audit::{AuditOptions, AuditService, StatusOptions};
use graft::reporter::{NullReporter, SharedReporter, StderrReporter};
use graft::sbom::{self, SbomFormat};
use graft::scanner::Scanner;
use graft::update::UpdateService;
use graft::verify::VerifyService;
use graft_git::SystemGit;
use graft_store::{ConfigStore, LockStore};
use graft_types::{CancelToken, FileStatus, Severity, SyncOptions};

#[derive(Parser)]
#[command(name = "graft", version, about = "Vendor sources from git repositories with hash-tracked provenance")]
struct Cli {
    /// Directory holding vendor.yml, vendor.lock, caches, and licenses.
    #[arg(long, global = true, default_value = "vendor")]
    dir: PathBuf,

    /// Project tree that vendored files are placed into.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Suppress progress output.
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync vendors, skipping refs that are already up to date.
    Sync {
        /// Restrict to one vendor.
        name: Option<String>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        no_cache: bool,
        #[arg(long)]
        dry_run: bool,
        /// Allow file:// and local-path sources.
        #[arg(long)]
        local: bool,
        #[arg(long)]
        no_license_check: bool,
        /// Worker-pool bound (capped at 8).
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Refetch vendors and regenerate the lockfile.
    Update {
        name: Option<String>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        local: bool,
        #[arg(long)]
        no_license_check: bool,
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Reconcile config, lockfile, and tree; classify every file.
    Verify,

    /// Cheap read: local drift plus upstream staleness.
    Status {
        #[arg(long)]
        offline: bool,
        #[arg(long)]
        remote_only: bool,
        /// Treat upstream staleness as failure.
        #[arg(long)]
        strict_only: bool,
    },

    /// Run verify, scan, license, and staleness checks together.
    Audit {
        #[arg(long)]
        skip_verify: bool,
        #[arg(long)]
        skip_scan: bool,
        #[arg(long)]
        skip_license: bool,
        #[arg(long)]
        skip_outdated: bool,
        #[arg(long, default_value = "high")]
        fail_on: Severity,
    },

    /// Query the advisory database for every locked dependency.
    Scan {
        #[arg(long, default_value = "high")]
        fail_on: Severity,
    },

    /// Emit a software bill of materials from the lockfile.
    Sbom {
        /// cyclonedx or spdx.
        #[arg(long, default_value = "cyclonedx")]
        format: String,
        /// Write to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn reporter(quiet: bool) -> SharedReporter {
    if quiet {
        Arc::new(Mutex::new(NullReporter))
    } else {
        Arc::new(Mutex::new(StderrReporter))
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cancel = CancelToken::new();

    match cli.command {
        Command::Sync {
            name,
            group,
            force,
            no_cache,
            dry_run,
            local,
            no_license_check,
            workers,
        } => {
            let opts = SyncOptions {
                force,
                no_cache,
                dry_run,
                local,
                vendor_name: name,
                group,
                no_license_check,
                max_workers: workers,
                ..Default::default()
            };
            let service =
                UpdateService::new(&cli.root, &cli.dir, Arc::new(SystemGit::new(local)))
                    .with_reporter(reporter(cli.quiet));
            let report = service.run(&opts, &cancel)?;
            println!(
                "synced {} vendors: {} files, {} bytes",
                report.lock.vendors.len(),
                report.stats.file_count,
                report.stats.byte_count
            );
            Ok(if report.errors.is_empty() { 0 } else { 1 })
        }

        Command::Update {
            name,
            group,
            dry_run,
            local,
            no_license_check,
            workers,
        } => {
            let opts = SyncOptions {
                dry_run,
                local,
                vendor_name: name,
                group,
                no_license_check,
                max_workers: workers,
                ..Default::default()
            };
            let service =
                UpdateService::new(&cli.root, &cli.dir, Arc::new(SystemGit::new(local)))
                    .with_reporter(reporter(cli.quiet));
            let report = service.update_all(&opts, &cancel)?;
            println!(
                "updated {} vendors: {} files, {} bytes",
                report.lock.vendors.len(),
                report.stats.file_count,
                report.stats.byte_count
            );
            Ok(if report.errors.is_empty() { 0 } else { 1 })
        }

        Command::Verify => {
            let config = ConfigStore::in_dir(&cli.dir).load()?;
            let lock = LockStore::in_dir(&cli.dir).load()?;
            let result = VerifyService::new(&cli.root, &cli.dir).verify(&config, &lock)?;

            for check in &result.files {
                if check.status != FileStatus::Verified {
                    println!("{}: {} ({})", check.status, check.path, check.vendor);
                }
            }
            for check in &result.positions {
                if check.status != FileStatus::Verified {
                    println!("{}: {} -> {}", check.status, check.from, check.to);
                }
            }
            println!(
                "verify: {} ({} verified, {} modified, {} deleted, {} added)",
                result.aggregate,
                result.count(FileStatus::Verified),
                result.count(FileStatus::Modified),
                result.count(FileStatus::Deleted),
                result.count(FileStatus::Added),
            );
            Ok(result.aggregate.exit_code())
        }

        Command::Status {
            offline,
            remote_only,
            strict_only,
        } => {
            let service =
                AuditService::new(&cli.root, &cli.dir, Arc::new(SystemGit::default()));
            let result = service.status(
                &StatusOptions {
                    offline,
                    remote_only,
                    strict: strict_only,
                },
                &cancel,
            )?;

            for vendor in &result.vendors {
                let state = vendor
                    .outdated
                    .map(|s| format!("{s:?}"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}@{} {} upstream={state} drift={}",
                    vendor.name,
                    vendor.ref_,
                    &vendor.commit_hash[..12.min(vendor.commit_hash.len())],
                    vendor.drift.len()
                );
                for drift in &vendor.drift {
                    let marker = if drift.accepted { "accepted" } else { "modified" };
                    println!("  {marker}: {}", drift.path);
                }
            }
            println!("status: {}", result.aggregate);
            Ok(result.aggregate.exit_code())
        }

        Command::Audit {
            skip_verify,
            skip_scan,
            skip_license,
            skip_outdated,
            fail_on,
        } => {
            let service =
                AuditService::new(&cli.root, &cli.dir, Arc::new(SystemGit::default()));
            let result = service.audit(
                &AuditOptions {
                    skip_verify,
                    skip_scan,
                    skip_license,
                    skip_outdated,
                    fail_on,
                },
                &cancel,
            )?;

            for diagnostic in &result.diagnostics {
                eprintln!("warning: {diagnostic}");
            }
            println!(
                "audit: {} ({} checks, {} passed, {} failed, {} warnings)",
                result.aggregate, result.checks, result.passed, result.failed, result.warnings
            );
            Ok(result.aggregate.exit_code())
        }

        Command::Scan { fail_on } => {
            let config = ConfigStore::in_dir(&cli.dir).load()?;
            let lock = LockStore::in_dir(&cli.dir).load()?;
            let result =
                Scanner::in_root(&cli.dir).scan(&config, &lock, fail_on, &cancel)?;

            for dep in &result.dependencies {
                if let Some(error) = &dep.error {
                    eprintln!("warning: {}@{}: {error}", dep.name, dep.ref_);
                }
                for vuln in &dep.vulnerabilities {
                    println!(
                        "{} {} {}: {}",
                        vuln.severity, dep.name, vuln.id, vuln.summary
                    );
                }
            }
            println!(
                "scan: {} ({} vulnerabilities, threshold {} {})",
                result.aggregate,
                result.total_vulnerabilities,
                result.fail_on,
                if result.threshold_exceeded {
                    "exceeded"
                } else {
                    "not exceeded"
                }
            );
            Ok(result.aggregate.exit_code())
        }

        Command::Sbom { format, output } => {
            let format: SbomFormat = format
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let config = ConfigStore::in_dir(&cli.dir).load()?;
            let lock = LockStore::in_dir(&cli.dir).load()?;
            let doc = sbom::emit(format, &config, &lock);
            let rendered = serde_json::to_string_pretty(&doc)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                }
                None => println!("{rendered}"),
            }
            Ok(0)
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
