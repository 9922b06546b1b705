//! Distributed lock service
//!
//! At most one migration attempt per mint may run across all worker
//! processes. The lock is a TTL-bounded entry in a shared key-value store:
//!
//! - `acquire` sets the key to a fresh random owner token only if it is absent,
//!   and fails fast when it is held; it never waits.
//! - `release` deletes the key only if it still holds the caller's owner token,
//!   as one atomic operation on the store.
//! - `extend` resets the expiry under the same owner check. The state machine
//!   renews the lease before every external call, so a run of many steps never
//!   outlives it.
//! - A crashed holder's entry expires on its own; the recovery scanner, not
//!   the lock, restores progress afterwards.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::MigratorResult;
use crate::types::Mint;

/// Random value proving which acquisition attempt owns a lock entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerToken(String);

impl OwnerToken {
    /// Fresh UUIDv4 token
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OwnerToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lock service interface
#[async_trait]
pub trait LockService: Send + Sync {
    /// Set `key` to a fresh owner token if absent; `None` if already held
    async fn acquire(&self, key: &str, ttl: Duration) -> MigratorResult<Option<OwnerToken>>;

    /// Delete `key` if its value is `owner`; returns whether it was deleted
    async fn release(&self, key: &str, owner: &OwnerToken) -> MigratorResult<bool>;

    /// Whether `key` is currently held by `owner`
    async fn is_held(&self, key: &str, owner: &OwnerToken) -> MigratorResult<bool>;

    /// Reset the expiry of `key` to `ttl` from now if `owner` still holds it
    async fn extend(&self, key: &str, owner: &OwnerToken, ttl: Duration) -> MigratorResult<bool>;
}

/// Shared-store key of a mint's migration lock
pub fn lock_key(prefix: &str, mint: &Mint) -> String {
    format!("{}lock:migration:{}", prefix, mint)
}

/// A held migration lock for one mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub mint: Mint,
    pub key: String,
    pub owner: OwnerToken,
}

/// Per-mint locking on top of a [`LockService`]
#[derive(Clone)]
pub struct MintLocker {
    service: Arc<dyn LockService>,
    prefix: String,
    ttl: Duration,
}

impl MintLocker {
    pub fn new(service: Arc<dyn LockService>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            service,
            prefix: prefix.into(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(&self, mint: &Mint) -> String {
        lock_key(&self.prefix, mint)
    }

    /// Try to take the mint's lock; `None` means another attempt owns it
    pub async fn acquire(&self, mint: &Mint) -> MigratorResult<Option<LockLease>> {
        let key = self.key(mint);
        match self.service.acquire(&key, self.ttl).await? {
            Some(owner) => {
                debug!(mint = %mint, owner = %owner, "migration lock acquired");
                Ok(Some(LockLease {
                    mint: mint.clone(),
                    key,
                    owner,
                }))
            }
            None => {
                debug!(mint = %mint, "migration lock held elsewhere");
                Ok(None)
            }
        }
    }

    pub async fn release(&self, lease: &LockLease) -> MigratorResult<bool> {
        let released = self.service.release(&lease.key, &lease.owner).await?;
        if !released {
            warn!(mint = %lease.mint, "migration lock expired before release");
        }
        Ok(released)
    }

    pub async fn is_held(&self, lease: &LockLease) -> MigratorResult<bool> {
        self.service.is_held(&lease.key, &lease.owner).await
    }

    /// Renew the lease for a full TTL; `false` once it was lost
    pub async fn extend(&self, lease: &LockLease) -> MigratorResult<bool> {
        let extended = self
            .service
            .extend(&lease.key, &lease.owner, self.ttl)
            .await?;
        if !extended {
            debug!(mint = %lease.mint, "migration lock no longer held, not extended");
        }
        Ok(extended)
    }
}

impl fmt::Debug for MintLocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MintLocker")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .finish()
    }
}

pub use self::redis::RedisLockService;
pub use memory::MemoryLockService;
