//! Tamper-evident anchoring of round results and accepted submissions.
//!
//! The coordinator only depends on the `AnchorLedger` trait; deployments
//! swap in a chain-backed client without touching round logic. Anchoring is
//! strictly best-effort from the round's point of view: a ledger outage
//! never holds up or rolls back a round.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::model::{ModelVersion, RoundId};

/// Anchored next to the model hash when a round closes.
#[derive(Clone, Debug, Serialize)]
pub struct RoundMetrics {
    pub model_version: ModelVersion,
    pub participant_count: usize,
    pub total_samples: u64,
}

/// One accepted client submission, anchored as it is stored.
#[derive(Clone, Debug, Serialize)]
pub struct SubmissionRecord {
    pub update_id: Uuid,
    pub round_id: RoundId,
    pub client_id: String,
    pub weights_hash: String,
    pub sample_count: u64,
}

/// Append-only round anchoring. Implementations must tolerate retries of
/// the same record; the coordinator retries on failure before giving up.
#[async_trait]
pub trait AnchorLedger: Send + Sync {
    async fn record_round(&self, round_id: RoundId, model_hash: &str, metrics: &RoundMetrics) -> Result<()>;

    async fn record_submission(&self, record: &SubmissionRecord) -> Result<()>;
}

/// Anchors records into the structured log stream. Stands in for a real
/// chain client in single-process deployments; the log line carries every
/// field a chain transaction would.
pub struct LogLedger;

#[async_trait]
impl AnchorLedger for LogLedger {
    async fn record_round(&self, round_id: RoundId, model_hash: &str, metrics: &RoundMetrics) -> Result<()> {
        info!(
            round_id,
            model_hash,
            metrics = %serde_json::to_string(metrics)?,
            "round_anchored"
        );
        Ok(())
    }

    async fn record_submission(&self, record: &SubmissionRecord) -> Result<()> {
        info!(
            update_id = %record.update_id,
            round_id = record.round_id,
            client_id = %record.client_id,
            weights_hash = %record.weights_hash,
            sample_count = record.sample_count,
            "submission_anchored"
        );
        Ok(())
    }
}
