//! In-process lock service
//!
//! Expiry uses the tokio clock, so tests can pause time and advance past a
//! TTL. One instance shared through `Arc` stands in for the shared store
//! between simulated processes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{LockService, OwnerToken};
use crate::error::MigratorResult;

#[derive(Debug, Clone)]
struct LockEntry {
    owner: OwnerToken,
    expires_at: Instant,
}

/// In-memory lock service
#[derive(Debug, Clone, Default)]
pub struct MemoryLockService {
    entries: Arc<Mutex<HashMap<String, LockEntry>>>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unexpired entries
    pub async fn held_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn acquire(&self, key: &str, ttl: Duration) -> MigratorResult<Option<OwnerToken>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(key) {
            if entry.expires_at > now {
                return Ok(None);
            }
        }
        let owner = OwnerToken::generate();
        entries.insert(
            key.to_string(),
            LockEntry {
                owner: owner.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(Some(owner))
    }

    async fn release(&self, key: &str, owner: &OwnerToken) -> MigratorResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at <= now => {
                // an expired entry is gone as far as any owner is concerned
                entries.remove(key);
                Ok(false)
            }
            Some(entry) if &entry.owner == owner => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_held(&self, key: &str, owner: &OwnerToken) -> MigratorResult<bool> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > now && &entry.owner == owner))
    }

    async fn extend(&self, key: &str, owner: &OwnerToken, ttl: Duration) -> MigratorResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now && &entry.owner == owner => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
