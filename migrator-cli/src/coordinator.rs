//! Process assembly
//!
//! Wires the configured store, lock service, event bus and step executor into
//! the components one coordinator process runs.

use migrator_core::fanout::{EventBus, LocalEventBus, RedisEventBus};
use migrator_core::lock::{LockService, MemoryLockService, RedisLockService};
use migrator_core::steps::RemoteStepExecutor;
use migrator_core::store::StoreBackend;
use migrator_core::{
    CrashRecoveryScanner, MigrationQueue, MigrationStateMachine, MigrationWorker, MigratorConfig,
    MintLocker, NotificationFanout, OperatorActions, Scheduler, TokenStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::commands::{BackendKind, Cli, StoreKind};
use crate::error::{CliError, CliResult};

/// Everything a coordinator process runs, sharing one store and one lock service
pub struct Coordinator {
    pub config: MigratorConfig,
    pub store: Arc<dyn TokenStore>,
    pub fanout: NotificationFanout,
    pub queue: Arc<MigrationQueue>,
    pub worker: Arc<MigrationWorker>,
    pub operator: OperatorActions,
}

/// Environment configuration with command-line overrides applied
pub fn load_config(cli: &Cli) -> CliResult<MigratorConfig> {
    let mut config = MigratorConfig::from_env();
    if let Some(url) = &cli.redis_url {
        config.redis_url = Some(url.clone());
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn store_backend(kind: StoreKind, config: &MigratorConfig) -> StoreBackend {
    match kind {
        StoreKind::Memory => StoreBackend::Memory,
        StoreKind::Sled => StoreBackend::Sled {
            data_dir: config.data_dir.clone(),
        },
    }
}

impl Coordinator {
    pub async fn build(cli: &Cli) -> CliResult<Self> {
        let config = load_config(cli)?;

        let store = store_backend(cli.store, &config).open()?;
        store.ping().await?;

        let (locks, bus): (Arc<dyn LockService>, Arc<dyn EventBus>) = match cli.backend {
            BackendKind::Memory => {
                warn!("in-process lock service: do not run other coordinators against this store");
                (
                    Arc::new(MemoryLockService::new()),
                    Arc::new(LocalEventBus::new()),
                )
            }
            BackendKind::Redis => {
                let url = config
                    .redis_url
                    .clone()
                    .ok_or_else(|| CliError::config("--redis-url is required with --backend redis"))?;
                (
                    Arc::new(RedisLockService::connect(&url).await?),
                    Arc::new(RedisEventBus::connect(&url, config.event_channel_name()).await?),
                )
            }
        };

        let executor_url = cli
            .executor_url
            .as_deref()
            .ok_or_else(|| CliError::config("--executor-url is required"))?;
        // the state machine applies each step's own timeout on top of this
        let request_timeout = config
            .step_timeouts
            .values()
            .copied()
            .fold(config.step_timeout_secs, u64::max);
        let executor = RemoteStepExecutor::new(executor_url, Duration::from_secs(request_timeout))?;

        let locker = MintLocker::new(locks, config.key_prefix.clone(), config.lock_ttl());
        let fanout = NotificationFanout::new(bus);
        let machine = MigrationStateMachine::new(store.clone(), locker, Arc::new(executor), config.clone())
            .with_fanout(fanout.clone());

        let queue = Arc::new(MigrationQueue::new(config.queue_capacity));
        let worker = Arc::new(MigrationWorker::new(machine.clone(), config.max_steps_per_run));
        let operator = OperatorActions::new(machine).with_queue(queue.clone());

        info!(
            prefix = %config.key_prefix,
            store = ?cli.store,
            backend = ?cli.backend,
            workflow_steps = config.workflow().len(),
            "coordinator assembled"
        );

        Ok(Self {
            config,
            store,
            fanout,
            queue,
            worker,
            operator,
        })
    }

    pub fn scanner(&self) -> CrashRecoveryScanner {
        CrashRecoveryScanner::new(
            self.store.clone(),
            self.worker.clone(),
            self.config.concurrency,
            Duration::from_secs(self.config.stale_locked_secs),
        )
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.store.clone(), self.queue.clone(), &self.config)
    }
}
