//! Core migration types
//!
//! - [`TokenStatus`]: tagged lifecycle status and its transition table
//! - [`MigrationProgress`]: versioned record of completed workflow steps
//! - [`TokenMigrationRecord`]: the per-mint record owned by the token store
//! - [`MigrationEvent`]: state-change notification sent through the fanout

pub mod event;
pub mod progress;
pub mod record;
pub mod status;

pub use event::*;
pub use progress::*;
pub use record::*;
pub use status::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Token mint address, the primary key of a migration record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mint(String);

impl Mint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Mint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Mint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Mint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Mint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
