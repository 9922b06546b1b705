//! Migration scheduler
//!
//! A periodic tick that finds tokens ready for migration and queues them:
//! `locked` records whose curve completed at least `min_locked_age` ago, and
//! `migrating` records idle for longer than `retry_delay` (a retryable failure
//! left them behind). `tick` is callable directly so tests drive it one step
//! at a time; `start` runs it on an interval until the handle is stopped.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::MigratorConfig;
use crate::error::MigratorResult;
use crate::store::TokenStore;
use crate::types::{Mint, ScanFilter, TokenStatus};
use crate::worker::MigrationQueue;

/// Result of one scheduler tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Records found eligible
    pub eligible: usize,
    /// Newly queued
    pub enqueued: usize,
    /// Already pending or rejected by a full queue
    pub skipped: usize,
}

/// Finds eligible tokens and feeds the migration queue
pub struct Scheduler {
    store: Arc<dyn TokenStore>,
    queue: Arc<MigrationQueue>,
    interval: Duration,
    min_locked_age: Duration,
    retry_delay: Duration,
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}

impl Scheduler {
    pub fn new(store: Arc<dyn TokenStore>, queue: Arc<MigrationQueue>, config: &MigratorConfig) -> Self {
        Self {
            store,
            queue,
            interval: config.scheduler_interval(),
            min_locked_age: Duration::from_secs(config.min_locked_age_secs),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }

    /// Mints eligible right now, in mint order
    pub async fn eligible(&self) -> MigratorResult<Vec<Mint>> {
        let now = Utc::now();
        let mut mints = BTreeSet::new();

        // scan cutoffs are strict; one extra millisecond makes them inclusive
        let locked_cutoff = now - chrono_duration(self.min_locked_age) + chrono::Duration::milliseconds(1);
        for record in self
            .store
            .scan(&ScanFilter::status(TokenStatus::Locked).locked_before(locked_cutoff))
            .await?
        {
            mints.insert(record.mint);
        }

        let retry_cutoff = now - chrono_duration(self.retry_delay) + chrono::Duration::milliseconds(1);
        for record in self
            .store
            .scan(&ScanFilter::status(TokenStatus::Migrating).updated_before(retry_cutoff))
            .await?
        {
            mints.insert(record.mint);
        }
        Ok(mints.into_iter().collect())
    }

    /// Queue every eligible mint once
    pub async fn tick(&self) -> MigratorResult<TickReport> {
        let mints = self.eligible().await?;
        let mut report = TickReport {
            eligible: mints.len(),
            ..Default::default()
        };
        for mint in mints {
            if self.queue.enqueue(mint).await {
                report.enqueued += 1;
            } else {
                report.skipped += 1;
            }
        }
        if report.eligible > 0 {
            info!(
                eligible = report.eligible,
                enqueued = report.enqueued,
                skipped = report.skipped,
                "scheduler tick"
            );
        } else {
            debug!("scheduler tick found nothing to migrate");
        }
        Ok(report)
    }

    /// Run `tick` on the configured interval; ticks never overlap
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let scheduler = self;

        let task = tokio::spawn(async move {
            let mut timer = interval(scheduler.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = scheduler.interval.as_secs(), "scheduler started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("scheduler received shutdown signal");
                        break;
                    }
                    _ = timer.tick() => {
                        if let Err(e) = scheduler.tick().await {
                            error!(error = %e, "scheduler tick failed");
                        }
                    }
                }
            }

            info!("scheduler stopped");
        });

        SchedulerHandle { shutdown_tx, task }
    }
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the timer and wait for an in-progress tick to finish
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTokenStore;
    use crate::types::TokenMigrationRecord;

    fn scheduler(store: Arc<MemoryTokenStore>, queue: Arc<MigrationQueue>) -> Scheduler {
        let mut config = MigratorConfig::test();
        config.min_locked_age_secs = 60;
        config.retry_delay_secs = 60;
        Scheduler::new(store, queue, &config)
    }

    #[tokio::test]
    async fn test_tick_picks_old_locked_and_idle_migrating() {
        let store = Arc::new(MemoryTokenStore::new());
        let queue = Arc::new(MigrationQueue::new(16));
        let old = Utc::now() - chrono::Duration::minutes(5);

        store.put_raw(TokenMigrationRecord::locked("OLD", old)).await;
        store.put_raw(TokenMigrationRecord::locked("NEW", Utc::now())).await;
        let mut idle = TokenMigrationRecord::locked("IDLE", old);
        idle.status = TokenStatus::Migrating;
        idle.last_updated = old;
        store.put_raw(idle).await;
        let mut busy = TokenMigrationRecord::locked("BUSY", old);
        busy.status = TokenStatus::Migrating;
        store.put_raw(busy).await;
        store.put_raw(TokenMigrationRecord::new("ACTIVE")).await;

        let report = scheduler(store, queue.clone()).tick().await.unwrap();
        assert_eq!(
            report,
            TickReport {
                eligible: 2,
                enqueued: 2,
                skipped: 0
            }
        );
        assert!(queue.is_pending(&Mint::from("OLD")).await);
        assert!(queue.is_pending(&Mint::from("IDLE")).await);
    }

    #[tokio::test]
    async fn test_repeated_tick_does_not_double_queue() {
        let store = Arc::new(MemoryTokenStore::new());
        let queue = Arc::new(MigrationQueue::new(16));
        store
            .put_raw(TokenMigrationRecord::locked(
                "M1",
                Utc::now() - chrono::Duration::minutes(5),
            ))
            .await;
        let scheduler = scheduler(store, queue.clone());

        assert_eq!(scheduler.tick().await.unwrap().enqueued, 1);
        let second = scheduler.tick().await.unwrap();
        assert_eq!(second.enqueued, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let store = Arc::new(MemoryTokenStore::new());
        let queue = Arc::new(MigrationQueue::new(16));
        store
            .put_raw(TokenMigrationRecord::locked(
                "M1",
                Utc::now() - chrono::Duration::minutes(5),
            ))
            .await;

        let handle = Arc::new(scheduler(store, queue.clone())).start();
        // the first interval tick fires immediately
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while queue.is_empty().await {
            assert!(tokio::time::Instant::now() < deadline, "scheduler never ticked");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.is_running());
        handle.stop().await;
    }
}
