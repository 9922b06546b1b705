//! In-memory token store
//!
//! Used by tests and development setups. `set_available(false)` makes every
//! call fail with `StoreUnavailable`, which is how tests drive the fail-closed
//! path.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::TokenStore;
use crate::error::{MigratorError, MigratorResult};
use crate::types::{Mint, RecordUpdate, ScanFilter, TokenMigrationRecord};

/// In-memory token store
#[derive(Debug, Clone)]
pub struct MemoryTokenStore {
    records: Arc<RwLock<HashMap<Mint, TokenMigrationRecord>>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the store going away or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Overwrite a record without any validation (test setup for crashed states)
    pub async fn put_raw(&self, record: TokenMigrationRecord) {
        self.records.write().await.insert(record.mint.clone(), record);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check_available(&self) -> MigratorResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MigratorError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ))
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, mint: &Mint) -> MigratorResult<Option<TokenMigrationRecord>> {
        self.check_available()?;
        Ok(self.records.read().await.get(mint).cloned())
    }

    async fn insert(&self, record: TokenMigrationRecord) -> MigratorResult<()> {
        self.check_available()?;
        let mut records = self.records.write().await;
        if records.contains_key(&record.mint) {
            return Err(MigratorError::AlreadyRegistered(record.mint.to_string()));
        }
        records.insert(record.mint.clone(), record);
        Ok(())
    }

    async fn update(&self, mint: &Mint, update: RecordUpdate) -> MigratorResult<TokenMigrationRecord> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let record = records
            .get_mut(mint)
            .ok_or_else(|| MigratorError::UnknownMint(mint.to_string()))?;

        // apply on a copy so a rejected update leaves the stored record untouched
        let mut next = record.clone();
        update.apply(&mut next, Utc::now())?;
        *record = next.clone();
        Ok(next)
    }

    async fn scan(&self, filter: &ScanFilter) -> MigratorResult<Vec<TokenMigrationRecord>> {
        self.check_available()?;
        let records = self.records.read().await;
        let mut matched: Vec<TokenMigrationRecord> = records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.mint.cmp(&b.mint));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn ping(&self) -> MigratorResult<()> {
        self.check_available()
    }
}
