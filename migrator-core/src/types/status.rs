//! Token lifecycle status
//!
//! # State graph
//!
//! ```text
//! active ──→ locked ──→ migrating ──→ migrated ──→ harvested
//!              │          │    ↑
//!              │          │    └──── migration_failed  (retry edge)
//!              │          ├──────────→ migration_failed
//!              └──────────┴──────────→ withdrawn
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MigratorError;

/// Lifecycle status of a token
///
/// Unknown strings fail to parse instead of being carried through, so a legacy
/// value in the store surfaces as [`MigratorError::UnknownStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    /// Trading on the bonding curve
    Active,
    /// Curve complete, waiting for migration
    Locked,
    /// Migration workflow in progress
    Migrating,
    /// Liquidity pool created and locked
    Migrated,
    /// Pool fees collected
    Harvested,
    /// Workflow hit a fatal step failure; retryable by an operator
    MigrationFailed,
    /// Operator aborted the migration
    Withdrawn,
}

impl TokenStatus {
    /// All statuses, in graph order
    pub const ALL: [TokenStatus; 7] = [
        TokenStatus::Active,
        TokenStatus::Locked,
        TokenStatus::Migrating,
        TokenStatus::Migrated,
        TokenStatus::Harvested,
        TokenStatus::MigrationFailed,
        TokenStatus::Withdrawn,
    ];

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Locked => "locked",
            TokenStatus::Migrating => "migrating",
            TokenStatus::Migrated => "migrated",
            TokenStatus::Harvested => "harvested",
            TokenStatus::MigrationFailed => "migration_failed",
            TokenStatus::Withdrawn => "withdrawn",
        }
    }

    /// No transition leaves this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, TokenStatus::Harvested | TokenStatus::Withdrawn)
    }

    /// The workflow will not advance this record without outside intervention
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            TokenStatus::Migrated
                | TokenStatus::Harvested
                | TokenStatus::MigrationFailed
                | TokenStatus::Withdrawn
        )
    }

    /// `advance` accepts records in this status
    pub fn is_advanceable(&self) -> bool {
        matches!(self, TokenStatus::Locked | TokenStatus::Migrating)
    }

    /// Whether `target` is an edge of the state graph
    pub fn can_transition_to(&self, target: TokenStatus) -> bool {
        match (self, target) {
            (Self::Active, Self::Locked) => true,

            (Self::Locked, Self::Migrating) => true,
            (Self::Locked, Self::Withdrawn) => true,

            (Self::Migrating, Self::Migrated) => true,
            (Self::Migrating, Self::MigrationFailed) => true,
            (Self::Migrating, Self::Withdrawn) => true,

            // retry edge
            (Self::MigrationFailed, Self::Migrating) => true,

            (Self::Migrated, Self::Harvested) => true,

            _ => false,
        }
    }

    /// Validate a transition, returning the typed error on an illegal edge
    pub fn transition_to(&self, target: TokenStatus) -> Result<TokenStatus, MigratorError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(MigratorError::InvalidTransition {
                from: *self,
                to: target,
            })
        }
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenStatus {
    type Err = MigratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TokenStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| MigratorError::UnknownStatus(s.to_string()))
    }
}
