//! Operator actions
//!
//! Manual transitions behind the administrative surface. Each action takes the
//! mint's migration lock for the duration of its write, so it never races a
//! worker; a held lock is reported as [`MigratorError::LockContended`].
//!
//! `withdraw` is the exception. When a worker holds the lock it only records
//! an abort request on the record, a field no other writer touches; the
//! worker takes the `withdrawn` edge once its current step is recorded.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{MigratorError, MigratorResult};
use crate::lock::LockLease;
use crate::machine::MigrationStateMachine;
use crate::store::TokenStore;
use crate::types::{
    MigrationStep, Mint, RecordUpdate, StepReceipt, TokenMigrationRecord, TokenStatus, Workflow,
};
use crate::worker::MigrationQueue;

/// Manual migration controls
#[derive(Clone)]
pub struct OperatorActions {
    machine: MigrationStateMachine,
    queue: Option<Arc<MigrationQueue>>,
}

impl OperatorActions {
    pub fn new(machine: MigrationStateMachine) -> Self {
        Self {
            machine,
            queue: None,
        }
    }

    /// Hand resumed mints to this queue
    pub fn with_queue(mut self, queue: Arc<MigrationQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        self.machine.store()
    }

    pub fn workflow(&self) -> &Workflow {
        self.machine.workflow()
    }

    /// Read-only snapshot, no lock taken
    pub async fn snapshot(&self, mint: &Mint) -> MigratorResult<TokenMigrationRecord> {
        self.machine
            .store()
            .get(mint)
            .await?
            .ok_or_else(|| MigratorError::UnknownMint(mint.to_string()))
    }

    /// Re-enter a failed migration into the workflow
    ///
    /// `migration_failed` takes the retry edge back to `migrating` and drops
    /// the stored failure; the write-ahead marker is kept so the failed step
    /// is checked before it is executed again. `locked` and `migrating`
    /// records are accepted unchanged. The mint is then queued for a worker.
    pub async fn resume(&self, mint: &Mint) -> MigratorResult<TokenMigrationRecord> {
        let lease = self.lease(mint).await?;
        let result = self.resume_locked(mint).await;
        self.release(&lease).await;
        let record = result?;

        if let Some(queue) = &self.queue {
            if !queue.enqueue(mint.clone()).await {
                info!(mint = %mint, "resumed mint already queued");
            }
        }
        Ok(record)
    }

    async fn resume_locked(&self, mint: &Mint) -> MigratorResult<TokenMigrationRecord> {
        let record = self.snapshot(mint).await?;
        match record.status {
            TokenStatus::MigrationFailed => {
                let mut progress = record.migration_progress.clone();
                progress.clear_failure();
                let record = self
                    .machine
                    .store()
                    .update(
                        mint,
                        RecordUpdate::new()
                            .status(TokenStatus::Migrating)
                            .progress(progress)
                            .expect_status(TokenStatus::MigrationFailed),
                    )
                    .await?;
                info!(mint = %mint, "failed migration resumed by operator");
                self.machine.publish(&record, None).await;
                Ok(record)
            }
            TokenStatus::Locked | TokenStatus::Migrating => Ok(record),
            status => Err(MigratorError::InvalidState {
                operation: "resume",
                status,
            }),
        }
    }

    /// Record a step completion reported by the external workflow executor
    ///
    /// `step` defaults to the next expected step. Only that step, or one
    /// already recorded, is accepted. Completing the last step moves the
    /// record to `migrated`.
    pub async fn finalize(
        &self,
        mint: &Mint,
        step: Option<MigrationStep>,
        receipt: StepReceipt,
    ) -> MigratorResult<TokenMigrationRecord> {
        let lease = self.lease(mint).await?;
        let result = self.finalize_locked(mint, step, receipt).await;
        self.release(&lease).await;
        result
    }

    async fn finalize_locked(
        &self,
        mint: &Mint,
        step: Option<MigrationStep>,
        receipt: StepReceipt,
    ) -> MigratorResult<TokenMigrationRecord> {
        let record = self.snapshot(mint).await?;
        if !matches!(record.status, TokenStatus::Locked | TokenStatus::Migrating) {
            return Err(MigratorError::InvalidState {
                operation: "finalize",
                status: record.status,
            });
        }

        let workflow = self.machine.workflow();
        let mut progress = record.migration_progress.clone();
        let expected = workflow.next_step(&progress);
        let step = match step.or(expected) {
            Some(step) => step,
            None => {
                return Err(MigratorError::InvalidStep(
                    "every workflow step is already recorded".to_string(),
                ))
            }
        };

        if !workflow.contains(step) {
            return Err(MigratorError::InvalidStep(format!(
                "step {} is not part of the workflow",
                step
            )));
        }
        if progress.is_completed(step) {
            info!(mint = %mint, step = %step, "step completion already recorded");
            return Ok(record);
        }
        if Some(step) != expected {
            return Err(MigratorError::InvalidStep(format!(
                "expected completion of {}, got {}",
                expected.map(|s| s.to_string()).unwrap_or_default(),
                step
            )));
        }

        progress.complete(step, receipt, true, Utc::now());
        let status = if workflow.is_complete(&progress) {
            TokenStatus::Migrated
        } else {
            TokenStatus::Migrating
        };

        // locked records pass through migrating first
        if record.status == TokenStatus::Locked {
            self.machine
                .store()
                .update(
                    mint,
                    RecordUpdate::new()
                        .status(TokenStatus::Migrating)
                        .expect_status(TokenStatus::Locked),
                )
                .await?;
        }
        let record = self
            .machine
            .store()
            .update(
                mint,
                RecordUpdate::new()
                    .status(status)
                    .progress(progress)
                    .expect_status(TokenStatus::Migrating),
            )
            .await?;

        info!(mint = %mint, step = %step, status = %record.status, "step completion reported");
        self.machine.publish(&record, Some(step)).await;
        Ok(record)
    }

    /// Abort a migration that has not completed
    ///
    /// With the lock free the record moves to `withdrawn` at once. While a
    /// worker holds it, the returned record still shows the running status
    /// with `abort_requested_at` set; no further step starts after the
    /// current one.
    pub async fn withdraw(&self, mint: &Mint) -> MigratorResult<TokenMigrationRecord> {
        match self.machine.locker().acquire(mint).await? {
            Some(lease) => {
                let result = self.withdraw_locked(mint).await;
                self.release(&lease).await;
                result
            }
            None => self.request_abort(mint).await,
        }
    }

    async fn withdraw_locked(&self, mint: &Mint) -> MigratorResult<TokenMigrationRecord> {
        let current = self.snapshot(mint).await?;
        let record = self
            .machine
            .store()
            .update(
                mint,
                RecordUpdate::new()
                    .status(TokenStatus::Withdrawn)
                    .abort_requested(None)
                    .expect_status(current.status),
            )
            .await?;
        info!(mint = %mint, from = %current.status, "migration withdrawn by operator");
        self.machine.publish(&record, None).await;
        Ok(record)
    }

    async fn request_abort(&self, mint: &Mint) -> MigratorResult<TokenMigrationRecord> {
        // the holder may move locked to migrating between our read and write
        let mut attempts = 0;
        loop {
            let current = self.snapshot(mint).await?;
            if !matches!(current.status, TokenStatus::Locked | TokenStatus::Migrating) {
                return Err(MigratorError::InvalidTransition {
                    from: current.status,
                    to: TokenStatus::Withdrawn,
                });
            }
            if current.abort_requested() {
                return Ok(current);
            }
            let result = self
                .machine
                .store()
                .update(
                    mint,
                    RecordUpdate::new()
                        .abort_requested(Some(Utc::now()))
                        .expect_status(current.status),
                )
                .await;
            match result {
                Ok(record) => {
                    info!(
                        mint = %mint,
                        status = %record.status,
                        "withdraw requested, running attempt stops after its current step"
                    );
                    return Ok(record);
                }
                Err(MigratorError::StatusConflict { .. }) if attempts < 2 => attempts += 1,
                Err(e) => return Err(e),
            }
        }
    }

    /// Mark a migrated token's pool fees as collected
    pub async fn harvest(&self, mint: &Mint) -> MigratorResult<TokenMigrationRecord> {
        self.transition(mint, TokenStatus::Harvested).await
    }

    async fn transition(&self, mint: &Mint, target: TokenStatus) -> MigratorResult<TokenMigrationRecord> {
        let lease = self.lease(mint).await?;
        let result = self.transition_locked(mint, target).await;
        self.release(&lease).await;
        result
    }

    async fn transition_locked(
        &self,
        mint: &Mint,
        target: TokenStatus,
    ) -> MigratorResult<TokenMigrationRecord> {
        let current = self.snapshot(mint).await?;
        let record = self
            .machine
            .store()
            .update(
                mint,
                RecordUpdate::new()
                    .status(target)
                    .expect_status(current.status),
            )
            .await?;
        info!(mint = %mint, from = %current.status, to = %target, "operator transition");
        self.machine.publish(&record, None).await;
        Ok(record)
    }

    async fn lease(&self, mint: &Mint) -> MigratorResult<LockLease> {
        self.machine
            .locker()
            .acquire(mint)
            .await?
            .ok_or_else(|| MigratorError::LockContended(mint.to_string()))
    }

    async fn release(&self, lease: &LockLease) {
        if let Err(e) = self.machine.locker().release(lease).await {
            warn!(mint = %lease.mint, error = %e, "failed to release migration lock");
        }
    }
}
