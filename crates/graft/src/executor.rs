//! Bounded parallel executor over vendor jobs.
//!
//! Vendors stream through a shared queue into a fixed pool of OS threads;
//! results stream out of a channel in completion order. The executor
//! always waits for every worker, so partial results are observable even
//! when something failed. Per-vendor errors are collected, never
//! propagated — the caller decides whether one failure is fatal.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use graft_types::{BranchSpec, CancelToken, Error, LockDetails, Result, VendorSpec};

use crate::sync::SyncOutcome;

/// Hard ceiling on worker threads regardless of what was requested.
pub const MAX_WORKERS: usize = 8;

/// One unit of work: a vendor·ref plus its previous lock entry.
#[derive(Debug, Clone)]
pub struct VendorJob {
    pub vendor: VendorSpec,
    pub spec: BranchSpec,
    pub prev: Option<LockDetails>,
}

/// Outcome of one job; exactly one of `outcome`/`error` is set.
#[derive(Debug)]
pub struct VendorJobResult {
    pub vendor: String,
    pub ref_: String,
    pub outcome: Option<SyncOutcome>,
    pub error: Option<Error>,
}

/// First error in collection order, if any job failed.
pub fn first_error(results: &[VendorJobResult]) -> Option<&Error> {
    results.iter().find_map(|r| r.error.as_ref())
}

/// Bounded worker pool.
#[derive(Debug, Clone, Copy)]
pub struct ParallelExecutor {
    max_workers: usize,
}

impl ParallelExecutor {
    /// `max_workers = min(requested || available parallelism, 8)`.
    pub fn new(requested: Option<usize>) -> Self {
        let natural = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let max_workers = requested.unwrap_or(natural).clamp(1, MAX_WORKERS);
        Self { max_workers }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run every job, returning one result per input vendor.
    ///
    /// Order of results is not guaranteed. Cancellation is checked before
    /// each job is picked up; jobs observed after cancellation publish
    /// `Error::Cancelled` without running.
    pub fn run<F>(
        &self,
        jobs: Vec<VendorJob>,
        run_job: F,
        cancel: &CancelToken,
    ) -> Vec<VendorJobResult>
    where
        F: Fn(&VendorJob, &CancelToken) -> Result<SyncOutcome> + Send + Sync,
    {
        if jobs.is_empty() {
            return Vec::new();
        }

        let worker_count = self.max_workers.min(jobs.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let (tx, rx) = mpsc::channel::<VendorJobResult>();

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let queue = Arc::clone(&queue);
                let tx = tx.clone();
                let run_job = &run_job;
                scope.spawn(move || {
                    loop {
                        let job = queue.lock().unwrap().pop_front();
                        let Some(job) = job else { break };

                        let result = if cancel.is_cancelled() {
                            VendorJobResult {
                                vendor: job.vendor.name.clone(),
                                ref_: job.spec.ref_.clone(),
                                outcome: None,
                                error: Some(Error::Cancelled),
                            }
                        } else {
                            match run_job(&job, cancel) {
                                Ok(outcome) => VendorJobResult {
                                    vendor: job.vendor.name.clone(),
                                    ref_: job.spec.ref_.clone(),
                                    outcome: Some(outcome),
                                    error: None,
                                },
                                Err(e) => VendorJobResult {
                                    vendor: job.vendor.name.clone(),
                                    ref_: job.spec.ref_.clone(),
                                    outcome: None,
                                    error: Some(e),
                                },
                            }
                        };

                        if tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);
            rx.into_iter().collect()
        })
    }
}
