//! Sled token store
//!
//! Records are stored as JSON under their mint. Updates run a
//! read-apply-`compare_and_swap` loop so a concurrent writer cannot be
//! silently overwritten. A record that no longer decodes (unknown status,
//! unsupported progress version) fails its own `get`/`update` but is skipped
//! by `scan`, so it cannot stall work on other mints.

use async_trait::async_trait;
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use super::TokenStore;
use crate::error::{MigratorError, MigratorResult};
use crate::types::{Mint, RecordUpdate, ScanFilter, TokenMigrationRecord};

const RECORDS_TREE: &str = "token_records";

/// Sled-backed token store
#[derive(Debug, Clone)]
pub struct SledTokenStore {
    db: sled::Db,
    records: sled::Tree,
}

impl SledTokenStore {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> MigratorResult<Self> {
        let db = sled::open(path)
            .map_err(|e| MigratorError::StoreUnavailable(format!("Failed to open sled db: {}", e)))?;
        let records = db
            .open_tree(RECORDS_TREE)
            .map_err(|e| MigratorError::Storage(format!("Failed to open records tree: {}", e)))?;
        Ok(Self { db, records })
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> MigratorResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Store raw bytes under a mint, bypassing validation
    #[cfg(test)]
    pub(crate) fn put_raw_bytes(&self, mint: &str, bytes: &[u8]) -> MigratorResult<()> {
        self.records.insert(mint, bytes)?;
        Ok(())
    }

    fn serialize<T: Serialize>(value: &T) -> MigratorResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| MigratorError::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> MigratorResult<T> {
        serde_json::from_slice(bytes).map_err(|e| MigratorError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl TokenStore for SledTokenStore {
    async fn get(&self, mint: &Mint) -> MigratorResult<Option<TokenMigrationRecord>> {
        match self.records.get(mint.as_str())? {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, record: TokenMigrationRecord) -> MigratorResult<()> {
        let bytes = Self::serialize(&record)?;
        match self
            .records
            .compare_and_swap(record.mint.as_str(), None as Option<&[u8]>, Some(bytes))?
        {
            Ok(()) => Ok(()),
            Err(_) => Err(MigratorError::AlreadyRegistered(record.mint.to_string())),
        }
    }

    async fn update(&self, mint: &Mint, update: RecordUpdate) -> MigratorResult<TokenMigrationRecord> {
        loop {
            let current = self
                .records
                .get(mint.as_str())?
                .ok_or_else(|| MigratorError::UnknownMint(mint.to_string()))?;

            let mut record: TokenMigrationRecord = Self::deserialize(&current)?;
            update.apply(&mut record, Utc::now())?;
            let bytes = Self::serialize(&record)?;

            match self
                .records
                .compare_and_swap(mint.as_str(), Some(&current), Some(bytes))?
            {
                Ok(()) => return Ok(record),
                Err(_) => {
                    debug!(mint = %mint, "record changed during update, retrying");
                }
            }
        }
    }

    async fn scan(&self, filter: &ScanFilter) -> MigratorResult<Vec<TokenMigrationRecord>> {
        let mut matched = Vec::new();
        // sled iterates in key order, so results are already sorted by mint
        for entry in self.records.iter() {
            let (key, bytes) = entry?;
            let record: TokenMigrationRecord = match Self::deserialize(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        mint = %String::from_utf8_lossy(&key),
                        error = %e,
                        "skipping undecodable token record"
                    );
                    continue;
                }
            };
            if filter.matches(&record) {
                matched.push(record);
                if filter.limit.is_some_and(|limit| matched.len() >= limit) {
                    break;
                }
            }
        }
        Ok(matched)
    }

    async fn ping(&self) -> MigratorResult<()> {
        self.records.first()?;
        Ok(())
    }
}
