//! Migration worker and queue
//!
//! The worker owns the lock lifecycle for one mint at a time: acquire, drive
//! `advance` until the record stops making progress, release. The queue is
//! the in-process hand-off between the scheduler (or operator actions) and a
//! pool of workers.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::MigratorResult;
use crate::lock::LockLease;
use crate::machine::{AdvanceOutcome, MigrationStateMachine};
use crate::types::Mint;

/// Result of one lock-holding run over a mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another attempt holds the lock; skip this mint for now
    Contended,
    /// The run ended after `steps` advances with `last` as the final outcome
    Ran { steps: usize, last: AdvanceOutcome },
}

impl RunOutcome {
    pub fn is_migrated(&self) -> bool {
        matches!(
            self,
            RunOutcome::Ran {
                last: AdvanceOutcome::Migrated,
                ..
            }
        )
    }
}

/// Drives the state machine for one mint per call
pub struct MigrationWorker {
    machine: MigrationStateMachine,
    max_steps: usize,
    stopping: AtomicBool,
}

impl MigrationWorker {
    pub fn new(machine: MigrationStateMachine, max_steps: usize) -> Self {
        Self {
            machine,
            max_steps: max_steps.max(1),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn machine(&self) -> &MigrationStateMachine {
        &self.machine
    }

    /// Stop starting new steps; a step already running finishes
    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Acquire the mint's lock, advance until blocked or done, release
    pub async fn run_mint(&self, mint: &Mint) -> MigratorResult<RunOutcome> {
        let locker = self.machine.locker();
        let lease = match locker.acquire(mint).await? {
            Some(lease) => lease,
            None => return Ok(RunOutcome::Contended),
        };

        let result = self.drive(&lease).await;

        if let Err(e) = locker.release(&lease).await {
            warn!(mint = %mint, error = %e, "failed to release migration lock");
        }
        result
    }

    async fn drive(&self, lease: &LockLease) -> MigratorResult<RunOutcome> {
        let mut steps = 0;
        loop {
            let outcome = self.machine.advance(lease).await?;
            steps += 1;
            if !outcome.should_continue() || steps >= self.max_steps || self.is_stopping() {
                debug!(mint = %lease.mint, steps, outcome = ?outcome, "migration run finished");
                return Ok(RunOutcome::Ran {
                    steps,
                    last: outcome,
                });
            }
        }
    }

    /// Process everything queued, one mint at a time
    pub async fn drain(&self, queue: &MigrationQueue) -> Vec<(Mint, MigratorResult<RunOutcome>)> {
        let mut results = Vec::new();
        while let Some(mint) = queue.try_next().await {
            let result = self.run_mint(&mint).await;
            queue.finish(&mint).await;
            results.push((mint, result));
        }
        results
    }

    /// Drain `queue` with up to `concurrency` mints in flight
    pub fn spawn_pool(
        self: Arc<Self>,
        queue: Arc<MigrationQueue>,
        concurrency: usize,
    ) -> WorkerPoolHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let worker = self.clone();

        let task = tokio::spawn(async move {
            info!(concurrency, "migration worker pool started");
            let mut running = JoinSet::new();
            loop {
                let permit = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    permit = permits.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                let mint = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    mint = queue.next() => mint,
                };

                let worker = worker.clone();
                let queue = queue.clone();
                running.spawn(async move {
                    let _permit = permit;
                    match worker.run_mint(&mint).await {
                        Ok(RunOutcome::Contended) => {
                            debug!(mint = %mint, "mint locked elsewhere, skipped");
                        }
                        Ok(RunOutcome::Ran { steps, last }) => {
                            info!(mint = %mint, steps, outcome = ?last, "migration run done");
                        }
                        Err(e) => {
                            error!(mint = %mint, error = %e, "migration run failed");
                        }
                    }
                    queue.finish(&mint).await;
                });

                // reap finished runs so the set does not grow
                while running.try_join_next().is_some() {}
            }

            worker.request_stop();
            while running.join_next().await.is_some() {}
            info!("migration worker pool stopped");
        });

        WorkerPoolHandle {
            worker: self,
            shutdown_tx,
            task,
        }
    }
}

/// Handle to a running worker pool
pub struct WorkerPoolHandle {
    worker: Arc<MigrationWorker>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl WorkerPoolHandle {
    /// Stop taking mints, let in-flight steps finish, and wait
    pub async fn stop(self) {
        self.worker.request_stop();
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<Mint>,
    /// Queued or currently being processed
    pending: HashSet<Mint>,
}

/// Bounded, de-duplicating queue of mints awaiting a worker
#[derive(Debug)]
pub struct MigrationQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl MigrationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Queue `mint`; false when it is already pending or the queue is full
    pub async fn enqueue(&self, mint: Mint) -> bool {
        let mut state = self.state.lock().await;
        if state.pending.contains(&mint) {
            return false;
        }
        if state.queue.len() >= self.capacity {
            warn!(mint = %mint, capacity = self.capacity, "migration queue full");
            return false;
        }
        state.pending.insert(mint.clone());
        state.queue.push_back(mint);
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Take the next mint without waiting
    pub async fn try_next(&self) -> Option<Mint> {
        self.state.lock().await.queue.pop_front()
    }

    /// Wait for the next mint
    pub async fn next(&self) -> Mint {
        loop {
            if let Some(mint) = self.try_next().await {
                return mint;
            }
            self.notify.notified().await;
        }
    }

    /// Mark a dequeued mint as done so it can be queued again
    pub async fn finish(&self, mint: &Mint) {
        self.state.lock().await.pending.remove(mint);
    }

    /// Mints waiting for a worker
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.queue.is_empty()
    }

    pub async fn is_pending(&self, mint: &Mint) -> bool {
        self.state.lock().await.pending.contains(mint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigratorConfig;
    use crate::lock::{MemoryLockService, MintLocker};
    use crate::steps::{StepContext, StepExecutor, StepResult};
    use crate::store::{MemoryTokenStore, TokenStore};
    use crate::types::{StepReceipt, TokenMigrationRecord, TokenStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;

    struct AlwaysOk;

    #[async_trait]
    impl StepExecutor for AlwaysOk {
        async fn check(&self, _ctx: &StepContext) -> StepResult<Option<StepReceipt>> {
            Ok(None)
        }

        async fn execute(&self, ctx: &StepContext) -> StepResult<StepReceipt> {
            Ok(StepReceipt::with_signature(ctx.idempotency_key.clone()))
        }
    }

    fn worker(store: Arc<MemoryTokenStore>, locks: Arc<MemoryLockService>) -> MigrationWorker {
        let config = MigratorConfig::test();
        let locker = MintLocker::new(locks, config.key_prefix.clone(), config.lock_ttl());
        let max_steps = config.max_steps_per_run;
        let machine = MigrationStateMachine::new(store, locker, Arc::new(AlwaysOk), config);
        MigrationWorker::new(machine, max_steps)
    }

    #[tokio::test]
    async fn test_queue_deduplicates_pending_mints() {
        let queue = MigrationQueue::new(8);
        assert!(queue.enqueue(Mint::from("M1")).await);
        assert!(!queue.enqueue(Mint::from("M1")).await);

        let mint = queue.try_next().await.unwrap();
        // still being processed
        assert!(!queue.enqueue(Mint::from("M1")).await);
        queue.finish(&mint).await;
        assert!(queue.enqueue(Mint::from("M1")).await);
    }

    #[tokio::test]
    async fn test_queue_capacity() {
        let queue = MigrationQueue::new(1);
        assert!(queue.enqueue(Mint::from("A")).await);
        assert!(!queue.enqueue(Mint::from("B")).await);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_run_mint_releases_lock() {
        let store = Arc::new(MemoryTokenStore::new());
        let locks = Arc::new(MemoryLockService::new());
        store
            .insert(TokenMigrationRecord::locked("M1", Utc::now()))
            .await
            .unwrap();
        let worker = worker(store.clone(), locks.clone());

        let outcome = worker.run_mint(&Mint::from("M1")).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Ran {
                steps: 3,
                last: AdvanceOutcome::Migrated
            }
        );
        assert_eq!(locks.held_count().await, 0);
    }

    #[tokio::test]
    async fn test_run_mint_reports_contention() {
        let store = Arc::new(MemoryTokenStore::new());
        let locks = Arc::new(MemoryLockService::new());
        store
            .insert(TokenMigrationRecord::locked("M1", Utc::now()))
            .await
            .unwrap();
        let worker = worker(store.clone(), locks.clone());
        let _held = worker
            .machine()
            .locker()
            .acquire(&Mint::from("M1"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            worker.run_mint(&Mint::from("M1")).await.unwrap(),
            RunOutcome::Contended
        );
        let record = store.get(&Mint::from("M1")).await.unwrap().unwrap();
        assert_eq!(record.status, TokenStatus::Locked);
    }

    #[tokio::test]
    async fn test_pool_drains_queue() {
        let store = Arc::new(MemoryTokenStore::new());
        let locks = Arc::new(MemoryLockService::new());
        for mint in ["A", "B", "C"] {
            store
                .insert(TokenMigrationRecord::locked(mint, Utc::now()))
                .await
                .unwrap();
        }
        let queue = Arc::new(MigrationQueue::new(8));
        let handle = Arc::new(worker(store.clone(), locks)).spawn_pool(queue.clone(), 2);

        for mint in ["A", "B", "C"] {
            queue.enqueue(Mint::from(mint)).await;
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let migrated = store
                .scan(&crate::types::ScanFilter::status(TokenStatus::Migrated))
                .await
                .unwrap();
            if migrated.len() == 3 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "pool did not drain");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.stop().await;
    }
}
