//! Migrator Configuration
//!
//! Timing, concurrency and backend settings for the migration coordinator.
//! Supports loading from environment variables with the MIGRATOR_ prefix.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use crate::error::{MigratorError, MigratorResult};
use crate::types::{MigrationStep, Workflow};

/// Migration coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigratorConfig {
    /// Namespace prepended to every shared-store key (e.g. `mainnet:`)
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Lock entry expiry in seconds
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
    /// Scheduler tick interval in seconds
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_secs: u64,
    /// A locked token becomes eligible this long after `locked_at`
    #[serde(default = "default_min_locked_age")]
    pub min_locked_age_secs: u64,
    /// A migrating token untouched for this long is retried by the scheduler
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// The recovery scanner also picks up tokens locked longer than this
    #[serde(default = "default_stale_locked")]
    pub stale_locked_secs: u64,
    /// Mints processed concurrently by the scanner and the worker pool
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Pending mints the in-process queue holds
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-step external call timeout in seconds
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
    /// Overrides of `step_timeout_secs` for individual steps
    #[serde(default)]
    pub step_timeouts: BTreeMap<MigrationStep, u64>,
    /// Upper bound on `advance` calls per lock acquisition
    #[serde(default = "default_max_steps_per_run")]
    pub max_steps_per_run: usize,
    /// Append the position NFT transfer and vault deposit to the workflow
    #[serde(default)]
    pub position_custody: bool,
    /// Append fee-authority registration to the workflow
    #[serde(default)]
    pub register_fee_authority: bool,
    /// Shared store URL for locks and cross-process events
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Sled data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Cross-process event channel, without the key prefix
    #[serde(default = "default_event_channel")]
    pub event_channel: String,
}

fn default_key_prefix() -> String {
    "mainnet:".to_string()
}

fn default_lock_ttl() -> u64 {
    120
}

fn default_scheduler_interval() -> u64 {
    120
}

fn default_min_locked_age() -> u64 {
    5
}

fn default_retry_delay() -> u64 {
    120
}

fn default_stale_locked() -> u64 {
    300
}

fn default_concurrency() -> usize {
    5
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_step_timeout() -> u64 {
    90
}

fn default_max_steps_per_run() -> usize {
    16
}

fn default_data_dir() -> String {
    "./data/migrator".to_string()
}

fn default_event_channel() -> String {
    "migration:events".to_string()
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            lock_ttl_secs: default_lock_ttl(),
            scheduler_interval_secs: default_scheduler_interval(),
            min_locked_age_secs: default_min_locked_age(),
            retry_delay_secs: default_retry_delay(),
            stale_locked_secs: default_stale_locked(),
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            step_timeout_secs: default_step_timeout(),
            step_timeouts: BTreeMap::new(),
            max_steps_per_run: default_max_steps_per_run(),
            position_custody: false,
            register_fee_authority: false,
            redis_url: None,
            data_dir: default_data_dir(),
            event_channel: default_event_channel(),
        }
    }
}

impl MigratorConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - MIGRATOR_NETWORK: network namespace, becomes the `<network>:` key prefix
    /// - MIGRATOR_LOCK_TTL: lock expiry in seconds
    /// - MIGRATOR_SCHEDULER_INTERVAL: scheduler tick interval in seconds
    /// - MIGRATOR_MIN_LOCKED_AGE: seconds a token stays locked before it is eligible
    /// - MIGRATOR_RETRY_DELAY: seconds before an idle migrating token is retried
    /// - MIGRATOR_STALE_LOCKED: seconds after which the scanner picks up locked tokens
    /// - MIGRATOR_CONCURRENCY: mints processed concurrently
    /// - MIGRATOR_STEP_TIMEOUT: default per-step timeout in seconds
    /// - MIGRATOR_STEP_TIMEOUT_<STEP>: per-step override, e.g. MIGRATOR_STEP_TIMEOUT_CREATE_POOL
    /// - MIGRATOR_POSITION_CUSTODY: run the position NFT transfer and vault deposit steps (true/false)
    /// - MIGRATOR_FEE_AUTHORITY: run the fee-authority registration step (true/false)
    /// - MIGRATOR_REDIS_URL: shared store URL
    /// - MIGRATOR_DATA_DIR: sled data directory
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut step_timeouts = BTreeMap::new();
        for step in Workflow::full().steps() {
            let var = format!("MIGRATOR_STEP_TIMEOUT_{}", step.as_str().to_uppercase());
            if let Some(secs) = env_parse::<u64>(&var) {
                step_timeouts.insert(*step, secs);
            }
        }

        Self {
            key_prefix: env::var("MIGRATOR_NETWORK")
                .map(|network| format!("{}:", network))
                .unwrap_or(defaults.key_prefix),
            lock_ttl_secs: env_parse("MIGRATOR_LOCK_TTL").unwrap_or(defaults.lock_ttl_secs),
            scheduler_interval_secs: env_parse("MIGRATOR_SCHEDULER_INTERVAL")
                .unwrap_or(defaults.scheduler_interval_secs),
            min_locked_age_secs: env_parse("MIGRATOR_MIN_LOCKED_AGE")
                .unwrap_or(defaults.min_locked_age_secs),
            retry_delay_secs: env_parse("MIGRATOR_RETRY_DELAY").unwrap_or(defaults.retry_delay_secs),
            stale_locked_secs: env_parse("MIGRATOR_STALE_LOCKED")
                .unwrap_or(defaults.stale_locked_secs),
            concurrency: env_parse("MIGRATOR_CONCURRENCY").unwrap_or(defaults.concurrency),
            queue_capacity: defaults.queue_capacity,
            step_timeout_secs: env_parse("MIGRATOR_STEP_TIMEOUT")
                .unwrap_or(defaults.step_timeout_secs),
            step_timeouts,
            max_steps_per_run: defaults.max_steps_per_run,
            position_custody: env_flag("MIGRATOR_POSITION_CUSTODY"),
            register_fee_authority: env_flag("MIGRATOR_FEE_AUTHORITY"),
            redis_url: env::var("MIGRATOR_REDIS_URL").ok(),
            data_dir: env::var("MIGRATOR_DATA_DIR").unwrap_or(defaults.data_dir),
            event_channel: defaults.event_channel,
        }
    }

    /// Development configuration (devnet namespace, short timings)
    pub fn development() -> Self {
        Self {
            key_prefix: "devnet:".to_string(),
            scheduler_interval_secs: 15,
            min_locked_age_secs: 0,
            retry_delay_secs: 30,
            stale_locked_secs: 60,
            step_timeout_secs: 30,
            lock_ttl_secs: 60,
            ..Self::default()
        }
    }

    /// Test configuration: everything is immediately eligible, timings in seconds
    pub fn test() -> Self {
        Self {
            key_prefix: "test:".to_string(),
            lock_ttl_secs: 10,
            scheduler_interval_secs: 1,
            min_locked_age_secs: 0,
            retry_delay_secs: 0,
            stale_locked_secs: 0,
            concurrency: 4,
            queue_capacity: 64,
            step_timeout_secs: 2,
            ..Self::default()
        }
    }

    /// Reject settings the coordinator cannot run safely with
    pub fn validate(&self) -> MigratorResult<()> {
        if self.concurrency == 0 {
            return Err(MigratorError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(MigratorError::Configuration(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if self.max_steps_per_run == 0 {
            return Err(MigratorError::Configuration(
                "max steps per run must be at least 1".to_string(),
            ));
        }
        let longest_step = self
            .step_timeouts
            .values()
            .copied()
            .chain(std::iter::once(self.step_timeout_secs))
            .max()
            .unwrap_or(self.step_timeout_secs);
        if self.lock_ttl_secs <= longest_step {
            return Err(MigratorError::Configuration(format!(
                "lock ttl ({}s) must exceed the longest step timeout ({}s)",
                self.lock_ttl_secs, longest_step
            )));
        }
        Ok(())
    }

    pub fn workflow(&self) -> Workflow {
        let mut workflow = Workflow::standard();
        if self.position_custody {
            workflow = workflow.with_position_custody();
        }
        if self.register_fee_authority {
            workflow = workflow.with_fee_authority();
        }
        workflow
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs.max(1))
    }

    pub fn step_timeout(&self, step: MigrationStep) -> Duration {
        Duration::from_secs(
            self.step_timeouts
                .get(&step)
                .copied()
                .unwrap_or(self.step_timeout_secs),
        )
    }

    /// Full cross-process channel name
    pub fn event_channel_name(&self) -> String {
        format!("{}{}", self.key_prefix, self.event_channel)
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}
