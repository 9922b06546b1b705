//! Migration state machine
//!
//! `advance` runs exactly one workflow step for a mint whose lock the caller
//! holds:
//!
//! 1. Renew the lease for a full TTL; stop if it was lost.
//! 2. Take the `withdrawn` edge if an operator asked to abort.
//! 3. Move `locked` to `migrating` on the first call.
//! 4. Pick the first step not recorded complete in the progress blob.
//! 5. If the write-ahead marker names that step, an earlier attempt may have
//!    run it without recording the outcome: ask the executor's idempotency
//!    check first and record a positive answer without executing again.
//! 6. Otherwise persist the marker, renew the lease, execute under the step's
//!    timeout, confirm the lease again and persist the outcome.
//!
//! Every external call starts with a freshly renewed lease, and the lock TTL
//! exceeds every step timeout, so another process cannot take the mint over
//! while a step is running.
//!
//! Retryable failures leave the record `migrating` with the marker in place.
//! Fatal failures move it to `migration_failed` with the reason stored in the
//! progress blob. Store errors are returned as-is: nothing further is
//! attempted while the store cannot be trusted.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::MigratorConfig;
use crate::error::{MigratorError, MigratorResult};
use crate::fanout::NotificationFanout;
use crate::lock::{LockLease, MintLocker};
use crate::steps::{StepContext, StepError, StepExecutor, StepResult};
use crate::store::TokenStore;
use crate::types::{
    idempotency_key, MigrationEvent, MigrationProgress, MigrationStep, Mint, RecordUpdate,
    StepReceipt, TokenMigrationRecord, TokenStatus, Workflow,
};

/// Result of a single `advance` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// A step was recorded complete and more steps remain
    StepCompleted {
        step: MigrationStep,
        /// Completion came from the idempotency check, not a fresh execute
        recovered: bool,
        remaining: usize,
    },
    /// The last step completed; the record is `migrated`
    Migrated,
    /// Transient failure; the record stays `migrating`
    Retryable { step: MigrationStep, reason: String },
    /// Fatal failure; the record is `migration_failed`
    Failed { step: MigrationStep, reason: String },
    /// The record is not in a status `advance` works on
    Halted { status: TokenStatus },
    /// The lease expired or was taken over; nothing was written
    LockLost,
}

impl AdvanceOutcome {
    /// Another `advance` under the same lease can make progress
    pub fn should_continue(&self) -> bool {
        matches!(self, AdvanceOutcome::StepCompleted { .. })
    }
}

/// Migration state machine
#[derive(Clone)]
pub struct MigrationStateMachine {
    store: Arc<dyn TokenStore>,
    locker: MintLocker,
    executor: Arc<dyn StepExecutor>,
    fanout: Option<NotificationFanout>,
    workflow: Workflow,
    config: MigratorConfig,
}

impl MigrationStateMachine {
    pub fn new(
        store: Arc<dyn TokenStore>,
        locker: MintLocker,
        executor: Arc<dyn StepExecutor>,
        config: MigratorConfig,
    ) -> Self {
        Self {
            store,
            locker,
            executor,
            fanout: None,
            workflow: config.workflow(),
            config,
        }
    }

    pub fn with_fanout(mut self, fanout: NotificationFanout) -> Self {
        self.fanout = Some(fanout);
        self
    }

    pub fn with_workflow(mut self, workflow: Workflow) -> Self {
        self.workflow = workflow;
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn locker(&self) -> &MintLocker {
        &self.locker
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Run the next unexecuted step for the lease's mint
    pub async fn advance(&self, lease: &LockLease) -> MigratorResult<AdvanceOutcome> {
        let mint = &lease.mint;
        if !self.locker.extend(lease).await? {
            warn!(mint = %mint, "migration lock lost before step");
            return Ok(AdvanceOutcome::LockLost);
        }

        let mut record = self.load(mint).await?;
        if record.abort_requested()
            && matches!(record.status, TokenStatus::Locked | TokenStatus::Migrating)
        {
            return self.withdraw_requested(&record).await;
        }
        match record.status {
            TokenStatus::Locked => {
                record = self
                    .store
                    .update(
                        mint,
                        RecordUpdate::new()
                            .status(TokenStatus::Migrating)
                            .expect_status(TokenStatus::Locked),
                    )
                    .await?;
                info!(mint = %mint, "migration started");
            }
            TokenStatus::Migrating => {}
            status => {
                debug!(mint = %mint, status = %status, "record not advanceable");
                return Ok(AdvanceOutcome::Halted { status });
            }
        }

        let mut progress = record.migration_progress.clone();
        let step = match self.workflow.next_step(&progress) {
            Some(step) => step,
            None => return self.finish_completed(mint).await,
        };
        let ctx = self.context(mint, step, &progress);

        if progress.is_in_flight(step) {
            debug!(mint = %mint, step = %step, "step was started earlier, checking completion");
            match self.bounded(step, self.executor.check(&ctx)).await {
                Ok(Some(receipt)) => {
                    info!(mint = %mint, step = %step, "step already took effect, recording it");
                    return self
                        .record_success(lease, progress, step, receipt, true)
                        .await;
                }
                Ok(None) => {}
                Err(StepError::Retryable(reason)) => {
                    return self.record_retryable(mint, progress, step, reason).await;
                }
                Err(StepError::Fatal(reason)) => {
                    return self.record_fatal(mint, progress, step, reason).await;
                }
            }
        }

        // write-ahead marker: a crash from here on makes the next attempt check first
        progress.begin(step, ctx.idempotency_key.clone(), Utc::now());
        self.store
            .update(
                mint,
                RecordUpdate::new()
                    .progress(progress.clone())
                    .expect_status(TokenStatus::Migrating),
            )
            .await?;

        if !self.locker.extend(lease).await? {
            warn!(mint = %mint, step = %step, "migration lock lost before execute");
            return Ok(AdvanceOutcome::LockLost);
        }
        let ctx = StepContext {
            attempt: progress.attempts,
            ..ctx
        };
        debug!(mint = %mint, step = %step, attempt = ctx.attempt, "executing step");
        let result = self.bounded(step, self.executor.execute(&ctx)).await;

        if !self.locker.is_held(lease).await? {
            warn!(
                mint = %mint,
                step = %step,
                "migration lock lost during step, leaving outcome to the next holder"
            );
            return Ok(AdvanceOutcome::LockLost);
        }

        match result {
            Ok(receipt) => self.record_success(lease, progress, step, receipt, false).await,
            Err(StepError::Retryable(reason)) => {
                self.record_retryable(mint, progress, step, reason).await
            }
            Err(StepError::Fatal(reason)) => self.record_fatal(mint, progress, step, reason).await,
        }
    }

    async fn load(&self, mint: &Mint) -> MigratorResult<TokenMigrationRecord> {
        self.store
            .get(mint)
            .await?
            .ok_or_else(|| MigratorError::UnknownMint(mint.to_string()))
    }

    fn context(&self, mint: &Mint, step: MigrationStep, progress: &MigrationProgress) -> StepContext {
        StepContext {
            mint: mint.clone(),
            step,
            idempotency_key: idempotency_key(mint, step),
            attempt: progress.attempts.saturating_add(1),
            completed: progress
                .completed
                .iter()
                .map(|(step, done)| (*step, done.receipt.clone()))
                .collect(),
        }
    }

    /// Apply the step's timeout to an executor call
    async fn bounded<T, F>(&self, step: MigrationStep, call: F) -> StepResult<T>
    where
        F: std::future::Future<Output = StepResult<T>>,
    {
        let limit: Duration = self.config.step_timeout(step);
        match timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(StepError::Retryable(format!(
                "step {} timed out after {}s",
                step,
                limit.as_secs()
            ))),
        }
    }

    async fn record_success(
        &self,
        lease: &LockLease,
        mut progress: MigrationProgress,
        step: MigrationStep,
        receipt: StepReceipt,
        recovered: bool,
    ) -> MigratorResult<AdvanceOutcome> {
        let mint = &lease.mint;
        progress.complete(step, receipt, recovered, Utc::now());
        let finished = self.workflow.is_complete(&progress);
        let remaining = self.workflow.remaining(&progress);

        let mut update = RecordUpdate::new()
            .progress(progress.clone())
            .expect_status(TokenStatus::Migrating);
        if finished {
            update = update.status(TokenStatus::Migrated);
        }

        let record = match self.store.update(mint, update).await {
            Ok(record) => record,
            Err(MigratorError::StatusConflict { found, .. }) => {
                // status moved under us (operator abort); keep the receipt anyway
                warn!(mint = %mint, step = %step, status = %found, "status changed during step");
                self.store
                    .update(
                        mint,
                        RecordUpdate::new().progress(progress).expect_status(found),
                    )
                    .await?;
                return Ok(AdvanceOutcome::Halted { status: found });
            }
            Err(e) => return Err(e),
        };

        info!(mint = %mint, step = %step, recovered, remaining, "migration step completed");
        self.publish(&record, Some(step)).await;

        if finished {
            if record.abort_requested() {
                warn!(mint = %mint, "withdraw requested during the last step, migration completed");
            }
            info!(mint = %mint, "migration complete");
            Ok(AdvanceOutcome::Migrated)
        } else {
            Ok(AdvanceOutcome::StepCompleted {
                step,
                recovered,
                remaining,
            })
        }
    }

    async fn record_retryable(
        &self,
        mint: &Mint,
        mut progress: MigrationProgress,
        step: MigrationStep,
        reason: String,
    ) -> MigratorResult<AdvanceOutcome> {
        warn!(mint = %mint, step = %step, reason = %reason, "retryable step failure");
        progress.note_retryable(reason.clone());
        self.store
            .update(
                mint,
                RecordUpdate::new()
                    .progress(progress)
                    .expect_status(TokenStatus::Migrating),
            )
            .await?;
        Ok(AdvanceOutcome::Retryable { step, reason })
    }

    async fn record_fatal(
        &self,
        mint: &Mint,
        mut progress: MigrationProgress,
        step: MigrationStep,
        reason: String,
    ) -> MigratorResult<AdvanceOutcome> {
        error!(mint = %mint, step = %step, reason = %reason, "fatal step failure");
        progress.fail(step, reason.clone(), Utc::now());
        let record = self
            .store
            .update(
                mint,
                RecordUpdate::new()
                    .status(TokenStatus::MigrationFailed)
                    .progress(progress)
                    .expect_status(TokenStatus::Migrating),
            )
            .await?;
        self.publish(&record, Some(step)).await;
        Ok(AdvanceOutcome::Failed { step, reason })
    }

    /// Operator withdraw recorded while another attempt held the lock
    async fn withdraw_requested(&self, record: &TokenMigrationRecord) -> MigratorResult<AdvanceOutcome> {
        let record = self
            .store
            .update(
                &record.mint,
                RecordUpdate::new()
                    .status(TokenStatus::Withdrawn)
                    .abort_requested(None)
                    .expect_status(record.status),
            )
            .await?;
        info!(mint = %record.mint, "migration withdrawn on operator request");
        self.publish(&record, None).await;
        Ok(AdvanceOutcome::Halted {
            status: TokenStatus::Withdrawn,
        })
    }

    /// Every step is recorded but the status never moved (completions
    /// reported by the external executor)
    async fn finish_completed(&self, mint: &Mint) -> MigratorResult<AdvanceOutcome> {
        let record = self
            .store
            .update(
                mint,
                RecordUpdate::new()
                    .status(TokenStatus::Migrated)
                    .expect_status(TokenStatus::Migrating),
            )
            .await?;
        info!(mint = %mint, "all steps recorded, migration complete");
        self.publish(&record, None).await;
        Ok(AdvanceOutcome::Migrated)
    }

    /// Best-effort fanout; a failed publish never fails the step
    pub async fn publish(&self, record: &TokenMigrationRecord, step: Option<MigrationStep>) {
        if let Some(fanout) = &self.fanout {
            let event = MigrationEvent::from_record(record, &self.workflow, step);
            if let Err(e) = fanout.publish(&event).await {
                warn!(mint = %record.mint, error = %e, "failed to publish migration event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::LocalEventBus;
    use crate::lock::{LockService, MemoryLockService};
    use crate::store::MemoryTokenStore;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use tokio::sync::Mutex;

    /// Executor answering from per-step scripts, counting calls
    #[derive(Default)]
    struct Scripted {
        execute: Mutex<HashMap<MigrationStep, VecDeque<StepResult<StepReceipt>>>>,
        check: Mutex<HashMap<MigrationStep, StepResult<Option<StepReceipt>>>>,
        executed: Mutex<Vec<MigrationStep>>,
        checked: Mutex<Vec<MigrationStep>>,
    }

    impl Scripted {
        async fn on_execute(&self, step: MigrationStep, result: StepResult<StepReceipt>) {
            self.execute.lock().await.entry(step).or_default().push_back(result);
        }

        async fn on_check(&self, step: MigrationStep, result: StepResult<Option<StepReceipt>>) {
            self.check.lock().await.insert(step, result);
        }
    }

    #[async_trait]
    impl StepExecutor for Scripted {
        async fn check(&self, ctx: &StepContext) -> StepResult<Option<StepReceipt>> {
            self.checked.lock().await.push(ctx.step);
            self.check
                .lock()
                .await
                .get(&ctx.step)
                .cloned()
                .unwrap_or(Ok(None))
        }

        async fn execute(&self, ctx: &StepContext) -> StepResult<StepReceipt> {
            self.executed.lock().await.push(ctx.step);
            self.execute
                .lock()
                .await
                .get_mut(&ctx.step)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| Ok(StepReceipt::with_signature(format!("sig-{}", ctx.step))))
        }
    }

    struct Harness {
        store: Arc<MemoryTokenStore>,
        locks: Arc<MemoryLockService>,
        executor: Arc<Scripted>,
        machine: MigrationStateMachine,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryTokenStore::new());
        let locks = Arc::new(MemoryLockService::new());
        let executor = Arc::new(Scripted::default());
        let config = MigratorConfig::test();
        let locker = MintLocker::new(locks.clone(), config.key_prefix.clone(), config.lock_ttl());
        let machine = MigrationStateMachine::new(store.clone(), locker, executor.clone(), config);
        Harness {
            store,
            locks,
            executor,
            machine,
        }
    }

    async fn lease(h: &Harness, mint: &str) -> LockLease {
        h.machine
            .locker()
            .acquire(&Mint::from(mint))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_three_advances_reach_migrated() {
        let h = harness();
        h.store
            .insert(TokenMigrationRecord::locked("M1", Utc::now()))
            .await
            .unwrap();
        let lease = lease(&h, "M1").await;

        assert_eq!(
            h.machine.advance(&lease).await.unwrap(),
            AdvanceOutcome::StepCompleted {
                step: MigrationStep::Withdraw,
                recovered: false,
                remaining: 2
            }
        );
        assert!(h.machine.advance(&lease).await.unwrap().should_continue());
        assert_eq!(h.machine.advance(&lease).await.unwrap(), AdvanceOutcome::Migrated);

        let record = h.store.get(&Mint::from("M1")).await.unwrap().unwrap();
        assert_eq!(record.status, TokenStatus::Migrated);
        assert!(record.migration_progress.in_flight.is_none());
        assert_eq!(
            *h.executor.executed.lock().await,
            vec![
                MigrationStep::Withdraw,
                MigrationStep::CreatePool,
                MigrationStep::LockLiquidity
            ]
        );
        assert!(h.executor.checked.lock().await.is_empty());

        // a settled record is left alone
        assert_eq!(
            h.machine.advance(&lease).await.unwrap(),
            AdvanceOutcome::Halted {
                status: TokenStatus::Migrated
            }
        );
    }

    #[tokio::test]
    async fn test_retryable_failure_keeps_migrating_and_checks_next_time() {
        let h = harness();
        h.store
            .insert(TokenMigrationRecord::locked("M1", Utc::now()))
            .await
            .unwrap();
        h.executor
            .on_execute(MigrationStep::Withdraw, Err(StepError::retryable("rpc timeout")))
            .await;
        let lease = lease(&h, "M1").await;

        let outcome = h.machine.advance(&lease).await.unwrap();
        assert!(matches!(outcome, AdvanceOutcome::Retryable { step: MigrationStep::Withdraw, .. }));
        let record = h.store.get(&Mint::from("M1")).await.unwrap().unwrap();
        assert_eq!(record.status, TokenStatus::Migrating);
        assert!(record.migration_progress.is_in_flight(MigrationStep::Withdraw));
        assert_eq!(record.migration_progress.last_error.as_deref(), Some("rpc timeout"));

        // the retry checks first; nothing found, so it executes again
        let outcome = h.machine.advance(&lease).await.unwrap();
        assert!(outcome.should_continue());
        assert_eq!(*h.executor.checked.lock().await, vec![MigrationStep::Withdraw]);
        assert_eq!(h.executor.executed.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_step_found_done_is_not_reexecuted() {
        let h = harness();
        let mut record = TokenMigrationRecord::locked("M1", Utc::now());
        record.status = TokenStatus::Migrating;
        record.migration_progress.complete(
            MigrationStep::Withdraw,
            StepReceipt::with_signature("sig-w"),
            false,
            Utc::now(),
        );
        record.migration_progress.begin(
            MigrationStep::CreatePool,
            "M1:create_pool".to_string(),
            Utc::now(),
        );
        h.store.put_raw(record).await;
        h.executor
            .on_check(
                MigrationStep::CreatePool,
                Ok(Some(StepReceipt::with_signature("sig-pool").with_data("poolId", "P1"))),
            )
            .await;
        let lease = lease(&h, "M1").await;

        let outcome = h.machine.advance(&lease).await.unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::StepCompleted {
                step: MigrationStep::CreatePool,
                recovered: true,
                remaining: 1
            }
        );
        assert!(h.executor.executed.lock().await.is_empty());

        let record = h.store.get(&Mint::from("M1")).await.unwrap().unwrap();
        assert_eq!(
            record.migration_progress.receipt(MigrationStep::CreatePool).unwrap().data["poolId"],
            "P1"
        );
    }

    #[tokio::test]
    async fn test_fatal_failure_stores_reason() {
        let h = harness();
        h.store
            .insert(TokenMigrationRecord::locked("M1", Utc::now()))
            .await
            .unwrap();
        h.executor
            .on_execute(MigrationStep::Withdraw, Err(StepError::fatal("curve account malformed")))
            .await;
        let lease = lease(&h, "M1").await;

        let outcome = h.machine.advance(&lease).await.unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::Failed {
                step: MigrationStep::Withdraw,
                reason: "curve account malformed".to_string()
            }
        );
        let record = h.store.get(&Mint::from("M1")).await.unwrap().unwrap();
        assert_eq!(record.status, TokenStatus::MigrationFailed);
        assert_eq!(
            record.migration_progress.failure.unwrap().reason,
            "curve account malformed"
        );
    }

    #[tokio::test]
    async fn test_lost_lease_writes_nothing() {
        let h = harness();
        h.store
            .insert(TokenMigrationRecord::locked("M1", Utc::now()))
            .await
            .unwrap();
        let lease = lease(&h, "M1").await;
        h.locks.release(&lease.key, &lease.owner).await.unwrap();

        assert_eq!(h.machine.advance(&lease).await.unwrap(), AdvanceOutcome::LockLost);
        let record = h.store.get(&Mint::from("M1")).await.unwrap().unwrap();
        assert_eq!(record.status, TokenStatus::Locked);
        assert!(h.executor.executed.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let h = harness();
        h.store
            .insert(TokenMigrationRecord::locked("M1", Utc::now()))
            .await
            .unwrap();
        let lease = lease(&h, "M1").await;
        h.store.set_available(false);

        let err = h.machine.advance(&lease).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(h.executor.executed.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_each_step_publishes_one_event() {
        let h = harness();
        let fanout = NotificationFanout::new(Arc::new(LocalEventBus::new()));
        let relay = fanout.start_relay().await.unwrap();
        let machine = h.machine.clone().with_fanout(fanout.clone());
        let mut sub = fanout.subscribe(&Mint::from("M1")).await;

        h.store
            .insert(TokenMigrationRecord::locked("M1", Utc::now()))
            .await
            .unwrap();
        h.executor
            .on_execute(MigrationStep::Withdraw, Err(StepError::retryable("blip")))
            .await;
        let lease = lease(&h, "M1").await;
        while machine.advance(&lease).await.unwrap() != AdvanceOutcome::Migrated {}

        let mut names = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
                .await
                .unwrap()
                .unwrap();
            names.push(event.step);
        }
        assert_eq!(
            names,
            vec![
                Some(MigrationStep::Withdraw),
                Some(MigrationStep::CreatePool),
                Some(MigrationStep::LockLiquidity)
            ]
        );
        relay.stop().await;
    }

    #[tokio::test]
    async fn test_abort_request_withdraws_instead_of_stepping() {
        let h = harness();
        let mut record = TokenMigrationRecord::locked("M1", Utc::now());
        record.status = TokenStatus::Migrating;
        record.abort_requested_at = Some(Utc::now());
        h.store.put_raw(record).await;
        let lease = lease(&h, "M1").await;

        assert_eq!(
            h.machine.advance(&lease).await.unwrap(),
            AdvanceOutcome::Halted {
                status: TokenStatus::Withdrawn
            }
        );
        let record = h.store.get(&Mint::from("M1")).await.unwrap().unwrap();
        assert_eq!(record.status, TokenStatus::Withdrawn);
        assert!(!record.abort_requested());
        assert!(h.executor.executed.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_status_change_during_step_keeps_receipt() {
        /// Moves the record out of `migrating` while its step runs
        struct Interfering {
            store: Arc<MemoryTokenStore>,
        }

        #[async_trait]
        impl StepExecutor for Interfering {
            async fn check(&self, _ctx: &StepContext) -> StepResult<Option<StepReceipt>> {
                Ok(None)
            }

            async fn execute(&self, ctx: &StepContext) -> StepResult<StepReceipt> {
                self.store
                    .update(
                        &ctx.mint,
                        RecordUpdate::new()
                            .status(TokenStatus::Withdrawn)
                            .expect_status(TokenStatus::Migrating),
                    )
                    .await
                    .map_err(|e| StepError::fatal(e.to_string()))?;
                Ok(StepReceipt::with_signature("sig-w"))
            }
        }

        let store = Arc::new(MemoryTokenStore::new());
        let config = MigratorConfig::test();
        let locker = MintLocker::new(
            Arc::new(MemoryLockService::new()),
            config.key_prefix.clone(),
            config.lock_ttl(),
        );
        let executor = Arc::new(Interfering {
            store: store.clone(),
        });
        let machine = MigrationStateMachine::new(store.clone(), locker.clone(), executor, config);
        store
            .insert(TokenMigrationRecord::locked("M1", Utc::now()))
            .await
            .unwrap();
        let lease = locker.acquire(&Mint::from("M1")).await.unwrap().unwrap();

        assert_eq!(
            machine.advance(&lease).await.unwrap(),
            AdvanceOutcome::Halted {
                status: TokenStatus::Withdrawn
            }
        );
        let record = store.get(&Mint::from("M1")).await.unwrap().unwrap();
        assert_eq!(record.status, TokenStatus::Withdrawn);
        assert_eq!(
            record
                .migration_progress
                .receipt(MigrationStep::Withdraw)
                .unwrap()
                .tx_signature
                .as_deref(),
            Some("sig-w")
        );
    }

    #[tokio::test]
    async fn test_step_timeout_is_retryable() {
        struct Slow;

        #[async_trait]
        impl StepExecutor for Slow {
            async fn check(&self, _ctx: &StepContext) -> StepResult<Option<StepReceipt>> {
                Ok(None)
            }

            async fn execute(&self, _ctx: &StepContext) -> StepResult<StepReceipt> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(StepReceipt::default())
            }
        }

        let store = Arc::new(MemoryTokenStore::new());
        let mut config = MigratorConfig::test();
        config.step_timeouts.insert(MigrationStep::Withdraw, 0);
        let locker = MintLocker::new(
            Arc::new(MemoryLockService::new()),
            config.key_prefix.clone(),
            config.lock_ttl(),
        );
        let machine = MigrationStateMachine::new(store.clone(), locker.clone(), Arc::new(Slow), config);
        store
            .insert(TokenMigrationRecord::locked("M1", Utc::now()))
            .await
            .unwrap();
        let lease = locker.acquire(&Mint::from("M1")).await.unwrap().unwrap();

        let outcome = machine.advance(&lease).await.unwrap();
        assert!(matches!(outcome, AdvanceOutcome::Retryable { reason, .. } if reason.contains("timed out")));
    }
}
