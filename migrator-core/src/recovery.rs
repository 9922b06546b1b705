//! Crash-recovery scanner
//!
//! Run once at process start, and on demand. Every `migrating` record, plus
//! every `locked` record older than the staleness threshold, goes back through
//! the worker. Mints are processed concurrently up to a bound and independently
//! of each other: one mint's error never stops the pass. Running several
//! passes at once, from one or many processes, is safe because the lock
//! serializes work per mint.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::MigratorResult;
use crate::machine::AdvanceOutcome;
use crate::store::TokenStore;
use crate::types::{Mint, ScanFilter, TokenStatus};
use crate::worker::{MigrationWorker, RunOutcome};

/// Tally of one recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Records picked up by the pass
    pub scanned: usize,
    /// Reached `migrated`
    pub migrated: usize,
    /// Stopped on a retryable failure, the step budget, or a lost lease
    pub retry_pending: usize,
    /// Moved to `migration_failed`
    pub failed: usize,
    /// Found in a status the workflow does not advance
    pub halted: usize,
    /// Locked by another process
    pub contended: usize,
    /// Processing errored (store unavailable, task panic...)
    pub errors: usize,
}

impl ScanReport {
    fn record(&mut self, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Contended => self.contended += 1,
            RunOutcome::Ran { last, .. } => match last {
                AdvanceOutcome::Migrated => self.migrated += 1,
                AdvanceOutcome::Failed { .. } => self.failed += 1,
                AdvanceOutcome::Halted { .. } => self.halted += 1,
                AdvanceOutcome::Retryable { .. }
                | AdvanceOutcome::StepCompleted { .. }
                | AdvanceOutcome::LockLost => self.retry_pending += 1,
            },
        }
    }
}

/// Finds interrupted migrations and resumes them
pub struct CrashRecoveryScanner {
    store: Arc<dyn TokenStore>,
    worker: Arc<MigrationWorker>,
    concurrency: usize,
    stale_locked: Duration,
}

impl CrashRecoveryScanner {
    pub fn new(
        store: Arc<dyn TokenStore>,
        worker: Arc<MigrationWorker>,
        concurrency: usize,
        stale_locked: Duration,
    ) -> Self {
        Self {
            store,
            worker,
            concurrency: concurrency.max(1),
            stale_locked,
        }
    }

    /// Mints the pass should pick up, in mint order
    pub async fn candidates(&self) -> MigratorResult<Vec<Mint>> {
        let mut mints = BTreeSet::new();
        for record in self
            .store
            .scan(&ScanFilter::status(TokenStatus::Migrating))
            .await?
        {
            mints.insert(record.mint);
        }

        let stale = chrono::Duration::from_std(self.stale_locked)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let threshold = Utc::now() - stale;
        for record in self
            .store
            .scan(&ScanFilter::status(TokenStatus::Locked).locked_before(threshold))
            .await?
        {
            mints.insert(record.mint);
        }
        Ok(mints.into_iter().collect())
    }

    /// Resume every candidate; store errors during the initial scan fail the pass
    pub async fn resume_all(&self) -> MigratorResult<ScanReport> {
        let mints = self.candidates().await?;
        let mut report = ScanReport {
            scanned: mints.len(),
            ..Default::default()
        };
        if mints.is_empty() {
            info!("recovery scan found no interrupted migrations");
            return Ok(report);
        }
        info!(count = mints.len(), "resuming interrupted migrations");

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for mint in mints {
            let worker = self.worker.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = worker.run_mint(&mint).await;
                (mint, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => report.record(&outcome),
                Ok((mint, Err(e))) => {
                    warn!(mint = %mint, error = %e, "recovery of mint failed");
                    report.errors += 1;
                }
                Err(e) => {
                    error!(error = %e, "recovery task panicked");
                    report.errors += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            migrated = report.migrated,
            retry_pending = report.retry_pending,
            failed = report.failed,
            contended = report.contended,
            errors = report.errors,
            "recovery scan complete"
        );
        Ok(report)
    }
}
