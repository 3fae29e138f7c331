// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Job execution pool: a handful of tasks that poll the control-plane store
//! for queued jobs, claim a lease, dispatch to the matching handler, and
//! record completion. One [`Worker`] per pool member; [`WorkerPool`] spawns
//! and owns the tokio tasks.

use std::time::Duration;
use tracing::{info, warn};
use wsa_approval::ApprovalService;
use wsa_store::{CPStore, DEFAULT_LEASE_MS};

/// How long a worker with no claimable job waits before polling again.
pub const IDLE_POLL_MS: u64 = 250;

/// How long a worker waits after losing a lease-claim race before retrying.
pub const LOST_RACE_BACKOFF_MS: u64 = 100;

/// Worker count when none is configured, taken from the original
/// implementation's fixed pool of two.
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Outcome of a single poll/claim/dispatch cycle, exposed mainly for tests:
/// [`Worker::run_forever`] loops over this forever and never returns it.
#[derive(Debug, PartialEq, Eq)]
pub enum RunOnceOutcome {
    /// No queued job was available; caller should idle-sleep.
    NoJob,
    /// A job was queued but another worker claimed it first; caller should
    /// back off briefly before retrying.
    LostRace,
    /// A job was claimed, dispatched, and completed (successfully or not).
    Completed { job_id: String, ok: bool },
}

/// A single polling loop bound to one worker id. Cheap to construct; clone
/// the underlying store/approval service rather than the worker itself.
pub struct Worker {
    store: CPStore,
    approvals: ApprovalService,
    worker_id: String,
    lease_ms: i64,
}

impl Worker {
    pub fn new(store: CPStore, approvals: ApprovalService, worker_id: impl Into<String>) -> Self {
        Self { store, approvals, worker_id: worker_id.into(), lease_ms: DEFAULT_LEASE_MS }
    }

    /// Overrides the lease duration used when claiming jobs. Defaults to
    /// [`DEFAULT_LEASE_MS`].
    pub fn with_lease_ms(mut self, lease_ms: i64) -> Self {
        self.lease_ms = lease_ms;
        self
    }

    /// Runs the poll/claim/dispatch/complete cycle once. Never panics on
    /// handler failure: errors are recorded on the job via `complete_job`.
    pub async fn run_once(&self) -> RunOnceOutcome {
        let job = match self.store.fetch_next_queued_job().await {
            Ok(Some(job)) => job,
            Ok(None) => return RunOnceOutcome::NoJob,
            Err(e) => {
                warn!(error = %e, "failed to poll for queued jobs");
                return RunOnceOutcome::NoJob;
            }
        };

        let claimed = match self.store.claim_job_lease(&job.job_id, &self.worker_id, self.lease_ms).await {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(error = %e, job_id = %job.job_id, "failed to claim lease");
                return RunOnceOutcome::LostRace;
            }
        };
        if !claimed {
            return RunOnceOutcome::LostRace;
        }

        let ok = match wsa_handlers::dispatch(&job, &self.store, &self.approvals).await {
            Ok((bytes, content_type)) => {
                if let Err(e) = self.store.put_result(&job.job_id, &bytes, &content_type).await {
                    warn!(error = %e, job_id = %job.job_id, "failed to persist result");
                    let _ = self.store.complete_job(&job.job_id, false, Some(&e.to_string())).await;
                    return RunOnceOutcome::Completed { job_id: job.job_id, ok: false };
                }
                true
            }
            Err(e) => {
                if let Err(store_err) = self.store.complete_job(&job.job_id, false, Some(&e.to_string())).await {
                    warn!(error = %store_err, job_id = %job.job_id, "failed to record job failure");
                }
                return RunOnceOutcome::Completed { job_id: job.job_id, ok: false };
            }
        };

        if let Err(e) = self.store.complete_job(&job.job_id, ok, None).await {
            warn!(error = %e, job_id = %job.job_id, "failed to record job success");
        }
        RunOnceOutcome::Completed { job_id: job.job_id, ok }
    }

    /// Runs [`Self::run_once`] forever, sleeping between cycles according to
    /// the outcome. Intended to be spawned on its own tokio task.
    pub async fn run_forever(&self) -> ! {
        loop {
            match self.run_once().await {
                RunOnceOutcome::NoJob => tokio::time::sleep(Duration::from_millis(IDLE_POLL_MS)).await,
                RunOnceOutcome::LostRace => tokio::time::sleep(Duration::from_millis(LOST_RACE_BACKOFF_MS)).await,
                RunOnceOutcome::Completed { job_id, ok } => {
                    info!(job_id = %job_id, ok, worker_id = %self.worker_id, "job completed");
                }
            }
        }
    }
}

/// Owns a fixed-size fleet of [`Worker`]s and spawns each as a tokio task.
pub struct WorkerPool {
    store: CPStore,
    approvals: ApprovalService,
    worker_count: usize,
    lease_ms: i64,
}

impl WorkerPool {
    pub fn new(store: CPStore, approvals: ApprovalService, worker_count: usize) -> Self {
        Self { store, approvals, worker_count, lease_ms: DEFAULT_LEASE_MS }
    }

    /// Overrides the lease duration each spawned worker claims jobs with.
    /// Defaults to [`DEFAULT_LEASE_MS`].
    pub fn with_lease_ms(mut self, lease_ms: i64) -> Self {
        self.lease_ms = lease_ms;
        self
    }

    /// Spawns `worker_count` tasks, each running its own `Worker::run_forever`
    /// loop with a distinct `worker_id`. Returns immediately; the returned
    /// handles are never awaited in normal operation (the daemon process
    /// exits by being killed), but are returned for tests and graceful
    /// shutdown paths.
    pub fn spawn(&self) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.worker_count)
            .map(|i| {
                let worker = Worker::new(self.store.clone(), self.approvals.clone(), format!("worker-{i}"))
                    .with_lease_ms(self.lease_ms);
                tokio::spawn(async move {
                    worker.run_forever().await;
                })
            })
            .collect()
    }
}

/// Convenience wrapper so callers that only need the store/approvals as a
/// bundle don't have to thread two `Arc`s separately.
pub struct WorkerHandles(pub Vec<tokio::task::JoinHandle<()>>);

impl Drop for WorkerHandles {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Starts the default-size pool and wraps its handles so they abort when
/// dropped, for use in integration tests that need a scoped worker pool.
pub fn start_default_pool(store: CPStore, approvals: ApprovalService) -> WorkerHandles {
    let pool = WorkerPool::new(store, approvals, DEFAULT_WORKER_COUNT);
    WorkerHandles(pool.spawn())
}
