//! Token store
//!
//! Persistence boundary for migration records, keyed by mint.
//!
//! - `update` is a partial merge of the coordinator-owned fields; fields other
//!   surfaces store on the record are left alone.
//! - Every status change is checked against the state graph before it is
//!   written, and an optional expected-status guard turns the write into a
//!   compare-and-set.
//! - `last_updated` is bumped by the store on every write.

pub mod memory;
pub mod sled;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::MigratorResult;
use crate::types::{Mint, RecordUpdate, ScanFilter, TokenMigrationRecord};

/// Token store interface
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Fetch a record
    async fn get(&self, mint: &Mint) -> MigratorResult<Option<TokenMigrationRecord>>;

    /// Register a new record; fails if the mint already exists
    async fn insert(&self, record: TokenMigrationRecord) -> MigratorResult<()>;

    /// Merge `update` into the stored record and return the result
    async fn update(&self, mint: &Mint, update: RecordUpdate) -> MigratorResult<TokenMigrationRecord>;

    /// Records matching `filter`, ordered by mint
    async fn scan(&self, filter: &ScanFilter) -> MigratorResult<Vec<TokenMigrationRecord>>;

    /// Cheap reachability check
    async fn ping(&self) -> MigratorResult<()>;
}

/// Which token store backend to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sled { data_dir: String },
}

impl StoreBackend {
    /// Open the selected backend
    pub fn open(&self) -> MigratorResult<Arc<dyn TokenStore>> {
        match self {
            StoreBackend::Memory => Ok(Arc::new(MemoryTokenStore::new())),
            StoreBackend::Sled { data_dir } => Ok(Arc::new(SledTokenStore::open(data_dir)?)),
        }
    }
}

pub use memory::MemoryTokenStore;
pub use self::sled::SledTokenStore;
