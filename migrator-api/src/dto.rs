//! Data Transfer Objects for API requests and responses

use migrator_core::types::{ProgressSummary, StepReceipt};
use migrator_core::{MigrationStep, TokenMigrationRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Administrative action named by the `step` field of a trigger request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationAction {
    /// Re-enter a failed migration into the workflow
    Resume,
    /// Report a step completed by the external workflow executor
    Finalize,
    /// Abort a migration that has not completed
    Withdraw,
    /// Record pool fees as collected
    Harvest,
}

/// Administrative trigger request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequest {
    pub mint: String,
    pub step: MigrationAction,
    /// Step being reported by `finalize`; defaults to the next expected step
    #[serde(default)]
    pub completed_step: Option<MigrationStep>,
    #[serde(default)]
    pub tx_signature: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl MigrationRequest {
    /// Receipt carried by a `finalize` report
    pub fn receipt(&self) -> StepReceipt {
        StepReceipt {
            tx_signature: self.tx_signature.clone(),
            data: self.data.clone(),
        }
    }
}

/// Token snapshot response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(flatten)]
    pub record: TokenMigrationRecord,
    pub progress_summary: ProgressSummary,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store_available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_finalize_request_shape() {
        let request: MigrationRequest = serde_json::from_value(json!({
            "mint": "M1",
            "step": "finalize",
            "completedStep": "create_pool",
            "txSignature": "sig",
            "data": { "poolId": "P1" }
        }))
        .unwrap();

        assert_eq!(request.step, MigrationAction::Finalize);
        assert_eq!(request.completed_step, Some(MigrationStep::CreatePool));
        let receipt = request.receipt();
        assert_eq!(receipt.tx_signature.as_deref(), Some("sig"));
        assert_eq!(receipt.data["poolId"], "P1");
    }

    #[test]
    fn test_unknown_action_rejected() {
        let result = serde_json::from_value::<MigrationRequest>(json!({
            "mint": "M1",
            "step": "explode"
        }));
        assert!(result.is_err());
    }
}
