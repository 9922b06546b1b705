//! Migration Coordinator Core
//!
//! Drives a token from the moment its bonding curve completes (`locked`) to a
//! fully migrated liquidity pool (`migrated`) through a fixed series of
//! external steps, surviving process crashes and running safely with several
//! worker processes against the same store.
//!
//! # Architecture
//!
//! - **Store**: durable per-token migration records ([`store::TokenStore`])
//! - **Lock**: a shared, TTL-bounded, owner-fenced per-mint lock ([`lock::MintLocker`])
//! - **State machine**: one step per `advance` call, with a write-ahead
//!   in-flight marker so a crash never re-issues a completed step
//! - **Worker / Scheduler**: queue eligible mints and drive them under the lock
//! - **Recovery**: resume every interrupted migration at start-up
//! - **Fanout**: per-mint event subscriptions fed from a cross-process bus
//! - **Operator**: manual resume, finalize, withdraw and fee-harvest actions
//!
//! # Status graph
//!
//! ```text
//! active -> locked -> migrating -> migrated
//!                        |   ^
//!                        v   |
//!                  migration_failed
//! locked | migrating -> withdrawn
//! migrated -> harvested
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use migrator_core::lock::{MemoryLockService, MintLocker};
//! use migrator_core::steps::RemoteStepExecutor;
//! use migrator_core::store::MemoryTokenStore;
//! use migrator_core::{MigrationStateMachine, MigrationWorker, MigratorConfig};
//!
//! async fn example() -> migrator_core::MigratorResult<()> {
//!     let config = MigratorConfig::development();
//!     let locker = MintLocker::new(
//!         Arc::new(MemoryLockService::new()),
//!         config.key_prefix.clone(),
//!         config.lock_ttl(),
//!     );
//!     let executor = RemoteStepExecutor::new(
//!         "http://localhost:8900",
//!         std::time::Duration::from_secs(config.step_timeout_secs),
//!     )?;
//!     let max_steps = config.max_steps_per_run;
//!     let machine = MigrationStateMachine::new(
//!         Arc::new(MemoryTokenStore::new()),
//!         locker,
//!         Arc::new(executor),
//!         config,
//!     );
//!     let worker = MigrationWorker::new(machine, max_steps);
//!     worker.run_mint(&"So1anaMint".into()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fanout;
pub mod lock;
pub mod machine;
pub mod operator;
pub mod recovery;
pub mod scheduler;
pub mod steps;
pub mod store;
pub mod types;
pub mod worker;

pub use config::MigratorConfig;
pub use error::{MigratorError, MigratorResult};
pub use fanout::{EventBus, NotificationFanout, Subscription};
pub use lock::{LockLease, LockService, MintLocker, OwnerToken};
pub use machine::{AdvanceOutcome, MigrationStateMachine};
pub use operator::OperatorActions;
pub use recovery::{CrashRecoveryScanner, ScanReport};
pub use scheduler::{Scheduler, SchedulerHandle, TickReport};
pub use steps::{StepContext, StepError, StepExecutor, StepResult};
pub use store::TokenStore;
pub use types::{
    MigrationEvent, MigrationProgress, MigrationStep, Mint, TokenMigrationRecord, TokenStatus,
    Workflow,
};
pub use worker::{MigrationQueue, MigrationWorker, RunOutcome, WorkerPoolHandle};
