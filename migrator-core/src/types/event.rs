//! Fanout event payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MigrationStep, Mint, ProgressSummary, TokenMigrationRecord, TokenStatus, Workflow};

/// A token's migration state changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationEvent {
    pub mint: Mint,
    pub status: TokenStatus,
    pub progress_summary: ProgressSummary,
    /// Step whose completion or failure produced the event
    pub step: Option<MigrationStep>,
    pub emitted_at: DateTime<Utc>,
}

impl MigrationEvent {
    pub fn from_record(
        record: &TokenMigrationRecord,
        workflow: &Workflow,
        step: Option<MigrationStep>,
    ) -> Self {
        Self {
            mint: record.mint.clone(),
            status: record.status,
            progress_summary: record.migration_progress.summary(workflow),
            step,
            emitted_at: Utc::now(),
        }
    }

    /// Client-facing name, e.g. `poolCreated`, or the status for status-only changes
    pub fn name(&self) -> &'static str {
        match (self.status, self.step) {
            (TokenStatus::Migrated, _) => "migrated",
            (TokenStatus::MigrationFailed, _) => "migrationFailed",
            (TokenStatus::Withdrawn, _) => "withdrawn",
            (TokenStatus::Harvested, _) => "feesCollected",
            (_, Some(step)) => step.event_name(),
            (status, None) => status.as_str(),
        }
    }
}
