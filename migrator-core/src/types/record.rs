//! Token migration record
//!
//! One record per mint. The coordinator owns `status`, `migration_progress`,
//! `locked_at` and `abort_requested_at`; everything else an outside surface stores against the mint
//! lives in `extra` and is never touched by a [`RecordUpdate`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{MigratorError, MigratorResult};

use super::{MigrationProgress, Mint, TokenStatus};

/// Per-mint migration record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMigrationRecord {
    pub mint: Mint,
    pub status: TokenStatus,
    #[serde(default)]
    pub migration_progress: MigrationProgress,
    pub locked_at: Option<DateTime<Utc>>,
    /// Operator withdraw waiting for the running attempt to finish its step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_requested_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Fields owned by other surfaces (social links, description...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TokenMigrationRecord {
    /// A freshly registered token
    pub fn new(mint: impl Into<Mint>) -> Self {
        let now = Utc::now();
        Self {
            mint: mint.into(),
            status: TokenStatus::Active,
            migration_progress: MigrationProgress::default(),
            locked_at: None,
            abort_requested_at: None,
            last_updated: now,
            created_at: now,
            extra: BTreeMap::new(),
        }
    }

    /// A token whose curve already completed, as the curve watcher would leave it
    pub fn locked(mint: impl Into<Mint>, locked_at: DateTime<Utc>) -> Self {
        let mut record = Self::new(mint);
        record.status = TokenStatus::Locked;
        record.locked_at = Some(locked_at);
        record
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested_at.is_some()
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Partial update of the coordinator-owned fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub status: Option<TokenStatus>,
    pub migration_progress: Option<MigrationProgress>,
    /// `Some(None)` clears the timestamp
    pub locked_at: Option<Option<DateTime<Utc>>>,
    /// `Some(None)` withdraws a pending abort request
    pub abort_requested_at: Option<Option<DateTime<Utc>>>,
    /// Reject the update unless the stored status equals this value
    pub expected_status: Option<TokenStatus>,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TokenStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: MigrationProgress) -> Self {
        self.migration_progress = Some(progress);
        self
    }

    pub fn locked_at(mut self, locked_at: Option<DateTime<Utc>>) -> Self {
        self.locked_at = Some(locked_at);
        self
    }

    pub fn abort_requested(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.abort_requested_at = Some(at);
        self
    }

    pub fn expect_status(mut self, status: TokenStatus) -> Self {
        self.expected_status = Some(status);
        self
    }

    /// Merge into `record`
    ///
    /// Checks the compare-and-set guard and the state graph before touching
    /// anything, so a rejected update leaves the record as it was. Writing the
    /// current status again is not a transition.
    pub fn apply(&self, record: &mut TokenMigrationRecord, now: DateTime<Utc>) -> MigratorResult<()> {
        if let Some(expected) = self.expected_status {
            if record.status != expected {
                return Err(MigratorError::StatusConflict {
                    expected,
                    found: record.status,
                });
            }
        }
        if let Some(target) = self.status {
            if target != record.status {
                record.status.transition_to(target)?;
            }
        }

        if let Some(target) = self.status {
            record.status = target;
        }
        if let Some(progress) = &self.migration_progress {
            record.migration_progress = progress.clone();
        }
        if let Some(locked_at) = self.locked_at {
            record.locked_at = locked_at;
        }
        if let Some(abort_requested_at) = self.abort_requested_at {
            record.abort_requested_at = abort_requested_at;
        }
        record.last_updated = now;
        Ok(())
    }
}

/// Predicate for [`crate::store::TokenStore::scan`]
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Match any of these statuses; empty matches every status
    pub statuses: Vec<TokenStatus>,
    /// Only records locked strictly before this instant
    pub locked_before: Option<DateTime<Utc>>,
    /// Only records last written strictly before this instant
    pub updated_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ScanFilter {
    pub fn status(status: TokenStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Default::default()
        }
    }

    pub fn statuses(statuses: impl IntoIterator<Item = TokenStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn locked_before(mut self, at: DateTime<Utc>) -> Self {
        self.locked_before = Some(at);
        self
    }

    pub fn updated_before(mut self, at: DateTime<Utc>) -> Self {
        self.updated_before = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &TokenMigrationRecord) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&record.status) {
            return false;
        }
        if let Some(before) = self.locked_before {
            match record.locked_at {
                Some(locked_at) if locked_at < before => {}
                _ => return false,
            }
        }
        if let Some(before) = self.updated_before {
            if record.last_updated >= before {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_update_preserves_extra_fields() {
        let mut record = TokenMigrationRecord::locked("M1", Utc::now())
            .with_extra("twitter", json!("@m1token"));

        RecordUpdate::new()
            .status(TokenStatus::Migrating)
            .apply(&mut record, Utc::now())
            .unwrap();

        assert_eq!(record.status, TokenStatus::Migrating);
        assert_eq!(record.extra["twitter"], json!("@m1token"));
    }

    #[test]
    fn test_update_rejects_illegal_edge() {
        let mut record = TokenMigrationRecord::new("M1");
        let before = record.clone();
        let err = RecordUpdate::new()
            .status(TokenStatus::Migrated)
            .apply(&mut record, Utc::now())
            .unwrap_err();

        assert!(matches!(
            err,
            MigratorError::InvalidTransition {
                from: TokenStatus::Active,
                to: TokenStatus::Migrated
            }
        ));
        assert_eq!(record, before);
    }

    #[test]
    fn test_expected_status_guard() {
        let mut record = TokenMigrationRecord::locked("M1", Utc::now());
        let err = RecordUpdate::new()
            .status(TokenStatus::Withdrawn)
            .expect_status(TokenStatus::Migrating)
            .apply(&mut record, Utc::now())
            .unwrap_err();
        assert!(matches!(err, MigratorError::StatusConflict { .. }));
        assert_eq!(record.status, TokenStatus::Locked);
    }

    #[test]
    fn test_same_status_write_bumps_last_updated() {
        let mut record = TokenMigrationRecord::locked("M1", Utc::now());
        record.status = TokenStatus::Migrating;
        let later = record.last_updated + Duration::seconds(5);

        RecordUpdate::new()
            .status(TokenStatus::Migrating)
            .progress(MigrationProgress::default())
            .apply(&mut record, later)
            .unwrap();
        assert_eq!(record.last_updated, later);
    }

    #[test]
    fn test_abort_request_leaves_status_and_progress() {
        let mut record = TokenMigrationRecord::locked("M1", Utc::now());
        record.status = TokenStatus::Migrating;
        let progress = record.migration_progress.clone();

        RecordUpdate::new()
            .abort_requested(Some(Utc::now()))
            .expect_status(TokenStatus::Migrating)
            .apply(&mut record, Utc::now())
            .unwrap();
        assert!(record.abort_requested());
        assert_eq!(record.status, TokenStatus::Migrating);
        assert_eq!(record.migration_progress, progress);

        let value = serde_json::to_value(&record).unwrap();
        assert!(value["abortRequestedAt"].is_string());
    }

    #[test]
    fn test_scan_filter() {
        let now = Utc::now();
        let old = TokenMigrationRecord::locked("OLD", now - Duration::minutes(10));
        let fresh = TokenMigrationRecord::locked("FRESH", now);
        let active = TokenMigrationRecord::new("ACTIVE");

        let filter = ScanFilter::status(TokenStatus::Locked).locked_before(now - Duration::minutes(1));
        assert!(filter.matches(&old));
        assert!(!filter.matches(&fresh));
        assert!(!filter.matches(&active));
        assert!(ScanFilter::default().matches(&active));
    }

    #[test]
    fn test_record_json_shape() {
        let record = TokenMigrationRecord::new("M1");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["mint"], "M1");
        assert_eq!(value["status"], "active");
        assert_eq!(value["migrationProgress"]["version"], 1);
        assert!(value.get("extra").is_none());
    }
}
