//! Migration progress
//!
//! The progress blob records which workflow steps completed, what they
//! returned, and whether a step was started without its outcome being
//! recorded. It is versioned: a blob with an unknown version, or one that is
//! not shaped like a progress record, fails to decode.
//!
//! ```text
//! {
//!   "version": 1,
//!   "completed": { "withdraw": { "txSignature": "...", "data": {...}, ... } },
//!   "inFlight": { "step": "create_pool", "idempotencyKey": "<mint>:create_pool", ... },
//!   "failure": null,
//!   "attempts": 0
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{MigratorError, MigratorResult};

use super::Mint;

/// Current progress blob version
pub const PROGRESS_VERSION: u32 = 1;

/// A step of the migration workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    /// Pull the reserves off the bonding curve
    Withdraw,
    /// Create the liquidity pool and deposit the reserves
    CreatePool,
    /// Lock the LP position
    LockLiquidity,
    /// Send the fee share position NFT to the manager multisig
    TransferPosition,
    /// Deposit the creator's position NFT into the fee vault
    DepositPosition,
    /// Register the fee-claim authority for the locked position
    RegisterFeeAuthority,
}

impl MigrationStep {
    /// Wire name of the step
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStep::Withdraw => "withdraw",
            MigrationStep::CreatePool => "create_pool",
            MigrationStep::LockLiquidity => "lock_liquidity",
            MigrationStep::TransferPosition => "transfer_position",
            MigrationStep::DepositPosition => "deposit_position",
            MigrationStep::RegisterFeeAuthority => "register_fee_authority",
        }
    }

    /// Client-facing event name emitted when the step completes
    pub fn event_name(&self) -> &'static str {
        match self {
            MigrationStep::Withdraw => "migrationStarted",
            MigrationStep::CreatePool => "poolCreated",
            MigrationStep::LockLiquidity => "lpLocked",
            MigrationStep::TransferPosition => "nftSent",
            MigrationStep::DepositPosition => "nftDeposited",
            MigrationStep::RegisterFeeAuthority => "feeAuthorityRegistered",
        }
    }
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationStep {
    type Err = MigratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "withdraw" => Ok(MigrationStep::Withdraw),
            "create_pool" => Ok(MigrationStep::CreatePool),
            "lock_liquidity" => Ok(MigrationStep::LockLiquidity),
            "transfer_position" => Ok(MigrationStep::TransferPosition),
            "deposit_position" => Ok(MigrationStep::DepositPosition),
            "register_fee_authority" => Ok(MigrationStep::RegisterFeeAuthority),
            other => Err(MigratorError::InvalidStep(format!("unknown step '{}'", other))),
        }
    }
}

/// Ordered list of steps a migration runs through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    steps: Vec<MigrationStep>,
}

impl Workflow {
    /// Build a workflow; steps must be non-empty and distinct
    pub fn new(steps: Vec<MigrationStep>) -> MigratorResult<Self> {
        if steps.is_empty() {
            return Err(MigratorError::Configuration(
                "workflow must contain at least one step".to_string(),
            ));
        }
        for (i, step) in steps.iter().enumerate() {
            if steps[..i].contains(step) {
                return Err(MigratorError::Configuration(format!(
                    "workflow lists step '{}' twice",
                    step
                )));
            }
        }
        Ok(Self { steps })
    }

    /// Withdraw, create pool, lock liquidity
    pub fn standard() -> Self {
        Self {
            steps: vec![
                MigrationStep::Withdraw,
                MigrationStep::CreatePool,
                MigrationStep::LockLiquidity,
            ],
        }
    }

    /// Every step: the standard workflow, position custody, fee registration
    pub fn full() -> Self {
        Self::standard().with_position_custody().with_fee_authority()
    }

    /// Append the position NFT transfer and vault deposit
    pub fn with_position_custody(mut self) -> Self {
        for step in [MigrationStep::TransferPosition, MigrationStep::DepositPosition] {
            if !self.steps.contains(&step) {
                self.steps.push(step);
            }
        }
        self
    }

    /// Append fee-authority registration
    pub fn with_fee_authority(mut self) -> Self {
        if !self.steps.contains(&MigrationStep::RegisterFeeAuthority) {
            self.steps.push(MigrationStep::RegisterFeeAuthority);
        }
        self
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, step: MigrationStep) -> bool {
        self.steps.contains(&step)
    }

    pub fn is_last(&self, step: MigrationStep) -> bool {
        self.steps.last() == Some(&step)
    }

    /// First step in workflow order that has not been recorded complete
    pub fn next_step(&self, progress: &MigrationProgress) -> Option<MigrationStep> {
        self.steps
            .iter()
            .copied()
            .find(|step| !progress.is_completed(*step))
    }

    /// Steps left to run, including the next one
    pub fn remaining(&self, progress: &MigrationProgress) -> usize {
        self.steps
            .iter()
            .filter(|step| !progress.is_completed(**step))
            .count()
    }

    /// Every step recorded complete
    pub fn is_complete(&self, progress: &MigrationProgress) -> bool {
        self.next_step(progress).is_none()
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Self::standard()
    }
}

/// What an external step returned on success
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReceipt {
    /// Transaction signature broadcast by the step, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_signature: Option<String>,
    /// Step-specific resume data (pool id, LP mint, position NFT...)
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl StepReceipt {
    pub fn with_signature(signature: impl Into<String>) -> Self {
        Self {
            tx_signature: Some(signature.into()),
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// A step recorded as complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedStep {
    #[serde(flatten)]
    pub receipt: StepReceipt,
    pub completed_at: DateTime<Utc>,
    /// Completion was established by the idempotency check after a resume,
    /// or reported by the external executor, not by a local execute call
    #[serde(default)]
    pub recovered: bool,
}

/// Write-ahead marker for a step whose outcome is not yet recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightStep {
    pub step: MigrationStep,
    pub idempotency_key: String,
    pub started_at: DateTime<Utc>,
}

/// Fatal failure details kept for operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub step: MigrationStep,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Typed, versioned migration progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "serde_json::Value")]
pub struct MigrationProgress {
    pub version: u32,
    pub completed: BTreeMap<MigrationStep, CompletedStep>,
    pub in_flight: Option<InFlightStep>,
    pub failure: Option<FailureRecord>,
    /// Execute attempts across all steps, including retryable failures
    pub attempts: u32,
    /// Most recent retryable failure, cleared when a step completes
    pub last_error: Option<String>,
}

/// Plain serde shape used to decode the blob after the version check
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressRepr {
    version: u32,
    #[serde(default)]
    completed: BTreeMap<MigrationStep, CompletedStep>,
    #[serde(default)]
    in_flight: Option<InFlightStep>,
    #[serde(default)]
    failure: Option<FailureRecord>,
    #[serde(default)]
    attempts: u32,
    #[serde(default)]
    last_error: Option<String>,
}

impl Default for MigrationProgress {
    fn default() -> Self {
        Self {
            version: PROGRESS_VERSION,
            completed: BTreeMap::new(),
            in_flight: None,
            failure: None,
            attempts: 0,
            last_error: None,
        }
    }
}

impl MigrationProgress {
    /// Decode a stored blob
    ///
    /// `null` and `{}` are the initial progress of a record that never started
    /// migrating. Anything else must carry the current version.
    pub fn decode(value: serde_json::Value) -> MigratorResult<Self> {
        match &value {
            serde_json::Value::Null => return Ok(Self::default()),
            serde_json::Value::Object(map) if map.is_empty() => return Ok(Self::default()),
            serde_json::Value::Object(map) => {
                let version = map
                    .get("version")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| {
                        MigratorError::Serialization(
                            "migration progress has no numeric version".to_string(),
                        )
                    })?;
                if version != u64::from(PROGRESS_VERSION) {
                    return Err(MigratorError::UnsupportedProgressVersion {
                        found: u32::try_from(version).unwrap_or(u32::MAX),
                        expected: PROGRESS_VERSION,
                    });
                }
            }
            other => {
                return Err(MigratorError::Serialization(format!(
                    "migration progress must be an object, got {}",
                    other
                )))
            }
        }

        let repr: ProgressRepr = serde_json::from_value(value)?;
        Ok(Self {
            version: repr.version,
            completed: repr.completed,
            in_flight: repr.in_flight,
            failure: repr.failure,
            attempts: repr.attempts,
            last_error: repr.last_error,
        })
    }

    pub fn is_completed(&self, step: MigrationStep) -> bool {
        self.completed.contains_key(&step)
    }

    pub fn receipt(&self, step: MigrationStep) -> Option<&StepReceipt> {
        self.completed.get(&step).map(|c| &c.receipt)
    }

    /// Completed steps in workflow order
    pub fn completed_steps(&self) -> Vec<MigrationStep> {
        self.completed.keys().copied().collect()
    }

    /// The in-flight marker names `step`
    pub fn is_in_flight(&self, step: MigrationStep) -> bool {
        self.in_flight.as_ref().map(|f| f.step) == Some(step)
    }

    /// Record the write-ahead marker before executing `step`
    pub fn begin(&mut self, step: MigrationStep, idempotency_key: String, now: DateTime<Utc>) {
        self.in_flight = Some(InFlightStep {
            step,
            idempotency_key,
            started_at: now,
        });
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Record `step` complete and clear its in-flight marker
    pub fn complete(
        &mut self,
        step: MigrationStep,
        receipt: StepReceipt,
        recovered: bool,
        now: DateTime<Utc>,
    ) {
        self.completed.insert(
            step,
            CompletedStep {
                receipt,
                completed_at: now,
                recovered,
            },
        );
        if self.is_in_flight(step) {
            self.in_flight = None;
        }
        self.last_error = None;
    }

    /// Store a retryable failure reason; the in-flight marker stays
    pub fn note_retryable(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
    }

    /// Store a fatal failure; the in-flight marker stays so a retry checks first
    pub fn fail(&mut self, step: MigrationStep, reason: impl Into<String>, now: DateTime<Utc>) {
        self.failure = Some(FailureRecord {
            step,
            reason: reason.into(),
            failed_at: now,
        });
    }

    /// Drop the stored failure when an operator retries
    pub fn clear_failure(&mut self) {
        self.failure = None;
        self.last_error = None;
    }

    /// Summary carried by fanout events
    pub fn summary(&self, workflow: &Workflow) -> ProgressSummary {
        ProgressSummary {
            completed_steps: workflow
                .steps()
                .iter()
                .copied()
                .filter(|s| self.is_completed(*s))
                .collect(),
            total_steps: workflow.len(),
            next_step: workflow.next_step(self),
            failure_reason: self.failure.as_ref().map(|f| f.reason.clone()),
        }
    }
}

impl TryFrom<serde_json::Value> for MigrationProgress {
    type Error = MigratorError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        Self::decode(value)
    }
}

/// Compact progress view sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub completed_steps: Vec<MigrationStep>,
    pub total_steps: usize,
    pub next_step: Option<MigrationStep>,
    pub failure_reason: Option<String>,
}

/// Deterministic idempotency key for a step of a mint's migration
pub fn idempotency_key(mint: &Mint, step: MigrationStep) -> String {
    format!("{}:{}", mint, step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_blob_is_initial_progress() {
        assert_eq!(
            MigrationProgress::decode(json!({})).unwrap(),
            MigrationProgress::default()
        );
        assert_eq!(
            MigrationProgress::decode(serde_json::Value::Null).unwrap(),
            MigrationProgress::default()
        );
    }

    #[test]
    fn test_legacy_blob_is_rejected() {
        // string-keyed shape without a version field
        let legacy = json!({ "withdraw": { "status": "success", "txId": "abc" }, "lastStep": "createPool" });
        assert!(matches!(
            MigrationProgress::decode(legacy),
            Err(MigratorError::Serialization(_))
        ));

        let future = json!({ "version": 7, "completed": {} });
        assert!(matches!(
            MigrationProgress::decode(future),
            Err(MigratorError::UnsupportedProgressVersion { found: 7, .. })
        ));

        assert!(MigrationProgress::decode(json!("done")).is_err());
    }

    #[test]
    fn test_serde_roundtrip_through_value() {
        let now = Utc::now();
        let mut progress = MigrationProgress::default();
        progress.begin(MigrationStep::Withdraw, "M1:withdraw".to_string(), now);
        progress.complete(
            MigrationStep::Withdraw,
            StepReceipt::with_signature("sig1").with_data("lamports", "85000000000"),
            false,
            now,
        );

        let value = serde_json::to_value(&progress).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["completed"]["withdraw"]["txSignature"], "sig1");

        let decoded: MigrationProgress = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, progress);
    }

    #[test]
    fn test_next_step_follows_workflow_order() {
        let workflow = Workflow::standard();
        let now = Utc::now();
        let mut progress = MigrationProgress::default();
        assert_eq!(workflow.next_step(&progress), Some(MigrationStep::Withdraw));

        progress.complete(MigrationStep::Withdraw, StepReceipt::default(), false, now);
        assert_eq!(workflow.next_step(&progress), Some(MigrationStep::CreatePool));
        assert_eq!(workflow.remaining(&progress), 2);

        progress.complete(MigrationStep::CreatePool, StepReceipt::default(), false, now);
        progress.complete(MigrationStep::LockLiquidity, StepReceipt::default(), false, now);
        assert!(workflow.is_complete(&progress));
        assert!(!Workflow::full().is_complete(&progress));
    }

    #[test]
    fn test_complete_clears_matching_in_flight_marker() {
        let now = Utc::now();
        let mut progress = MigrationProgress::default();
        progress.begin(MigrationStep::CreatePool, "M:create_pool".to_string(), now);
        progress.note_retryable("rpc timeout");
        assert!(progress.is_in_flight(MigrationStep::CreatePool));
        assert_eq!(progress.attempts, 1);

        progress.complete(MigrationStep::CreatePool, StepReceipt::default(), true, now);
        assert!(progress.in_flight.is_none());
        assert!(progress.last_error.is_none());
        assert!(progress.completed[&MigrationStep::CreatePool].recovered);
    }

    #[test]
    fn test_position_custody_steps_follow_lock() {
        let workflow = Workflow::standard().with_position_custody();
        assert_eq!(
            workflow.steps(),
            &[
                MigrationStep::Withdraw,
                MigrationStep::CreatePool,
                MigrationStep::LockLiquidity,
                MigrationStep::TransferPosition,
                MigrationStep::DepositPosition,
            ]
        );
        assert_eq!(workflow.clone().with_position_custody(), workflow);

        let full = Workflow::full();
        assert_eq!(full.len(), 6);
        assert!(full.is_last(MigrationStep::RegisterFeeAuthority));

        assert_eq!(MigrationStep::DepositPosition.event_name(), "nftDeposited");
        assert_eq!(
            "transfer_position".parse::<MigrationStep>().unwrap(),
            MigrationStep::TransferPosition
        );
        assert_eq!(
            serde_json::to_value(MigrationStep::DepositPosition).unwrap(),
            "deposit_position"
        );
    }

    #[test]
    fn test_workflow_rejects_duplicates() {
        assert!(Workflow::new(vec![]).is_err());
        assert!(Workflow::new(vec![MigrationStep::Withdraw, MigrationStep::Withdraw]).is_err());
        assert_eq!(
            Workflow::new(vec![MigrationStep::Withdraw]).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_summary_reports_failure() {
        let workflow = Workflow::standard();
        let now = Utc::now();
        let mut progress = MigrationProgress::default();
        progress.complete(MigrationStep::Withdraw, StepReceipt::default(), false, now);
        progress.fail(MigrationStep::CreatePool, "pool account malformed", now);

        let summary = progress.summary(&workflow);
        assert_eq!(summary.completed_steps, vec![MigrationStep::Withdraw]);
        assert_eq!(summary.total_steps, 3);
        assert_eq!(summary.next_step, Some(MigrationStep::CreatePool));
        assert_eq!(summary.failure_reason.as_deref(), Some("pool account malformed"));
    }
}
