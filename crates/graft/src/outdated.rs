//! Upstream staleness checks.
//!
//! The outdated checker compares each locked commit against the ref's
//! current remote hash via `ls-remote` — no clone, no checkout. Network
//! failures degrade the entry to `unknown` rather than failing the check.

use std::sync::Arc;

use chrono::Utc;
use graft_retry::{RetryExecutor, RetryStrategyConfig};
use graft_types::{
    Aggregate, CancelToken, Error, OutdatedEntry, OutdatedResult, OutdatedState, Result,
    SCHEMA_VERSION, VendorConfig, VendorLock,
};

use graft_git::GitClient;

/// Staleness checker over the git adapter's `ls_remote`.
pub struct OutdatedChecker {
    git: Arc<dyn GitClient>,
    retry: RetryStrategyConfig,
}

impl OutdatedChecker {
    pub fn new(git: Arc<dyn GitClient>) -> Self {
        Self {
            git,
            retry: RetryStrategyConfig::network(),
        }
    }

    pub fn with_retry(mut self, retry: RetryStrategyConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Compare every locked external ref against its remote.
    pub fn check(
        &self,
        config: &VendorConfig,
        lock: &VendorLock,
        cancel: &CancelToken,
    ) -> Result<OutdatedResult> {
        let mut entries = Vec::new();

        for details in &lock.vendors {
            cancel.check()?;
            if details.is_internal() || details.ref_ == "local" {
                continue;
            }
            let Some(vendor) = config.vendor(&details.name) else {
                continue;
            };

            let executor = RetryExecutor::new(self.retry.clone());
            let mut remote = None;
            for url in vendor.candidate_urls() {
                match executor.run_classified(
                    |_| self.git.ls_remote(url, &details.ref_, cancel),
                    Error::is_retryable,
                ) {
                    Ok(hash) => {
                        remote = Some(hash);
                        break;
                    }
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(_) => {}
                }
            }

            let state = match &remote {
                Some(hash) if *hash == details.commit_hash => OutdatedState::UpToDate,
                Some(_) => OutdatedState::Stale,
                None => OutdatedState::Unknown,
            };
            entries.push(OutdatedEntry {
                name: details.name.clone(),
                ref_: details.ref_.clone(),
                locked_commit: details.commit_hash.clone(),
                remote_commit: remote,
                state,
            });
        }

        let aggregate = if entries.iter().any(|e| e.state == OutdatedState::Stale) {
            Aggregate::Warn
        } else {
            Aggregate::Pass
        };

        Ok(OutdatedResult {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: Utc::now(),
            entries,
            aggregate,
        })
    }
}
