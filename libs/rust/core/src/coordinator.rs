//! Round coordination: the submission / fetch protocol.
//!
//! One `Coordinator` instance owns the round state machine behind a single
//! RwLock. Integrity verification runs before the lock, aggregation runs
//! outside it on a frozen snapshot, and collaborator hand-off (ledger and
//! artifact store) runs on spawned tasks so submission latency never
//! couples to anchoring latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter, Unit};
use opentelemetry::KeyValue;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::aggregator;
use crate::anchor::{AnchorLedger, RoundMetrics, SubmissionRecord};
use crate::artifact::ArtifactStore;
use crate::error::CoordinationError;
use crate::integrity;
use crate::model::{self, AggregationResult, ClientUpdate, GlobalModel, RoundId};
use crate::resilience::{retry_async, RetryConfig};
use crate::round::{FrozenRound, RoundMachine, RoundSnapshot};

static FED_METER: Lazy<Meter> = Lazy::new(|| opentelemetry::global::meter("federation_coordination"));

struct CoordinationMetrics {
    updates_total: Counter<u64>,
    updates_rejected_total: Counter<u64>,
    rounds_completed: Counter<u64>,
    aggregation_latency_ms: Histogram<f64>,
    anchor_failures_total: Counter<u64>,
}

impl CoordinationMetrics {
    fn new() -> Self {
        Self {
            updates_total: FED_METER
                .u64_counter("fed_updates_total")
                .with_description("Client updates accepted")
                .init(),
            updates_rejected_total: FED_METER
                .u64_counter("fed_updates_rejected_total")
                .with_description("Client updates rejected, by reason")
                .init(),
            rounds_completed: FED_METER
                .u64_counter("fed_rounds_completed_total")
                .with_description("Federated rounds closed")
                .init(),
            aggregation_latency_ms: FED_METER
                .f64_histogram("fed_aggregation_latency_ms")
                .with_description("Aggregation latency (ms)")
                .with_unit(Unit::new("ms"))
                .init(),
            anchor_failures_total: FED_METER
                .u64_counter("fed_anchor_failures_total")
                .with_description("Anchoring hand-offs that exhausted retries")
                .init(),
        }
    }
}

// otel instruments are write-only; these atomics back snapshots and tests
#[derive(Default)]
struct Stats {
    updates_accepted: AtomicU64,
    aggregation_runs: AtomicU64,
    rounds_completed: AtomicU64,
    anchor_failures: AtomicU64,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    pub updates_accepted: u64,
    pub aggregation_runs: u64,
    pub rounds_completed: u64,
    pub anchor_failures: u64,
}

/// Coordinates federated rounds: accepts verified client updates, freezes
/// the round exactly once when quorum is reached, aggregates, and publishes
/// the next global model.
pub struct Coordinator {
    machine: RwLock<RoundMachine>,
    ledger: Arc<dyn AnchorLedger>,
    artifacts: Arc<dyn ArtifactStore>,
    retry: RetryConfig,
    metrics: CoordinationMetrics,
    stats: Arc<Stats>,
}

impl Coordinator {
    pub fn new(
        seed: GlobalModel,
        quorum_threshold: usize,
        ledger: Arc<dyn AnchorLedger>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            machine: RwLock::new(RoundMachine::new(seed, quorum_threshold)),
            ledger,
            artifacts,
            retry: RetryConfig::default(),
            metrics: CoordinationMetrics::new(),
            stats: Arc::new(Stats::default()),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The round currently open for submissions plus the published model.
    /// Never fails; repeated calls return the same answer until a round
    /// closes in between.
    pub fn fetch_global_model(&self) -> (RoundId, Arc<GlobalModel>) {
        let machine = self.machine.read();
        (machine.current_round_id(), machine.model())
    }

    /// Verifies and stores one client update, returning the participant
    /// count after acceptance. The caller whose submission completes the
    /// quorum also runs aggregation and closes the round before returning.
    #[instrument(skip(self, update), fields(client_id = %update.client_id, round_id = update.round_id))]
    pub fn submit_update(&self, update: ClientUpdate) -> Result<usize, CoordinationError> {
        if let Err(e) =
            model::validate_parameters(&update.parameters).and_then(|_| integrity::verify(&update))
        {
            return Err(self.reject(e));
        }
        let payload = match serde_json::to_vec(&update.parameters) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "update_serialize_failed");
                None
            }
        };
        let record = SubmissionRecord {
            update_id: Uuid::new_v4(),
            round_id: update.round_id,
            client_id: update.client_id.clone(),
            weights_hash: update.claimed_hash.clone(),
            sample_count: update.sample_count,
        };

        let (count, frozen) = {
            let mut machine = self.machine.write();
            let count = match machine.try_accept(update) {
                Ok(count) => count,
                Err(e) => return Err(self.reject(e)),
            };
            (count, machine.begin_aggregation())
        };

        self.metrics.updates_total.add(1, &[]);
        self.stats.updates_accepted.fetch_add(1, Ordering::Relaxed);
        info!(participants = count, "update_accepted");
        self.anchor_submission(record, payload);

        if let Some(frozen) = frozen {
            self.run_aggregation(frozen)?;
        }
        Ok(count)
    }

    pub fn round_snapshot(&self) -> RoundSnapshot {
        self.machine.read().snapshot()
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            updates_accepted: self.stats.updates_accepted.load(Ordering::Relaxed),
            aggregation_runs: self.stats.aggregation_runs.load(Ordering::Relaxed),
            rounds_completed: self.stats.rounds_completed.load(Ordering::Relaxed),
            anchor_failures: self.stats.anchor_failures.load(Ordering::Relaxed),
        }
    }

    fn reject(&self, err: CoordinationError) -> CoordinationError {
        self.metrics
            .updates_rejected_total
            .add(1, &[KeyValue::new("reason", err.kind())]);
        warn!(reason = err.kind(), error = %err, "update_rejected");
        err
    }

    /// Runs on the one caller that won the freeze. On failure the round is
    /// left in `Aggregating`: it cannot heal without submissions the closed
    /// gate now rejects, so it stays visible in snapshots for operators.
    fn run_aggregation(&self, frozen: FrozenRound) -> Result<(), CoordinationError> {
        self.stats.aggregation_runs.fetch_add(1, Ordering::Relaxed);
        let round_id = frozen.round_id;
        let participants = frozen.updates.len();
        let started = Instant::now();
        let result = match aggregator::aggregate(&frozen) {
            Ok(result) => result,
            Err(e) => {
                self.metrics
                    .updates_rejected_total
                    .add(1, &[KeyValue::new("reason", e.kind())]);
                error!(round_id, error = %e, "aggregation_failed; round left aggregating");
                return Err(e);
            }
        };
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.aggregation_latency_ms.record(latency_ms, &[]);

        // hand-off is initiated before the next round becomes visible;
        // completion is decoupled from round progression
        self.anchor_round(&result);
        let model_version = result.new_model.version;
        {
            let mut machine = self.machine.write();
            machine.close(result);
        }
        self.metrics.rounds_completed.add(1, &[]);
        self.stats.rounds_completed.fetch_add(1, Ordering::Relaxed);
        info!(round_id, participants, model_version, latency_ms, "round_closed");
        Ok(())
    }

    fn anchor_submission(&self, record: SubmissionRecord, payload: Option<Vec<u8>>) {
        let ledger = Arc::clone(&self.ledger);
        let artifacts = Arc::clone(&self.artifacts);
        let retry = self.retry.clone();
        let stats = Arc::clone(&self.stats);
        let failures = self.metrics.anchor_failures_total.clone();
        tokio::spawn(async move {
            if let Some(bytes) = payload {
                if let Err(e) = artifacts.put(bytes).await {
                    warn!(
                        round_id = record.round_id,
                        client_id = %record.client_id,
                        error = %e,
                        "update_artifact_store_failed"
                    );
                }
            }
            let anchored = retry_async(&retry, |_| {
                let ledger = Arc::clone(&ledger);
                let record = record.clone();
                async move { ledger.record_submission(&record).await }
            })
            .await;
            if let Err(e) = anchored {
                failures.add(1, &[KeyValue::new("target", "ledger")]);
                stats.anchor_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    round_id = record.round_id,
                    client_id = %record.client_id,
                    error = %e,
                    "submission_anchor_failed"
                );
            }
        });
    }

    fn anchor_round(&self, result: &AggregationResult) {
        let ledger = Arc::clone(&self.ledger);
        let artifacts = Arc::clone(&self.artifacts);
        let retry = self.retry.clone();
        let stats = Arc::clone(&self.stats);
        let failures = self.metrics.anchor_failures_total.clone();
        let round_id = result.round_id;
        let model_hash = result.model_hash.clone();
        let metrics = RoundMetrics {
            model_version: result.new_model.version,
            participant_count: result.participant_count,
            total_samples: result.total_samples,
        };
        let model_bytes = match serde_json::to_vec(&result.new_model) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(round_id, error = %e, "model_serialize_failed");
                None
            }
        };
        tokio::spawn(async move {
            if let Some(bytes) = model_bytes {
                let pinned = retry_async(&retry, |_| {
                    let artifacts = Arc::clone(&artifacts);
                    let bytes = bytes.clone();
                    async move {
                        let id = artifacts.put(bytes).await?;
                        artifacts.pin(&id).await?;
                        Ok::<_, anyhow::Error>(id)
                    }
                })
                .await;
                match pinned {
                    Ok(id) => info!(round_id, content_id = %id, "model_artifact_pinned"),
                    Err(e) => {
                        failures.add(1, &[KeyValue::new("target", "artifact_store")]);
                        stats.anchor_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(round_id, error = %e, "model_artifact_store_failed");
                    }
                }
            }
            let anchored = retry_async(&retry, |_| {
                let ledger = Arc::clone(&ledger);
                let model_hash = model_hash.clone();
                let metrics = metrics.clone();
                async move { ledger.record_round(round_id, &model_hash, &metrics).await }
            })
            .await;
            if let Err(e) = anchored {
                failures.add(1, &[KeyValue::new("target", "ledger")]);
                stats.anchor_failures.fetch_add(1, Ordering::Relaxed);
                warn!(round_id, error = %e, "round_anchor_failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::LogLedger;
    use crate::artifact::MemoryArtifactStore;
    use crate::model::{ParameterSet, Tensor};

    fn coordinator(quorum: usize) -> Coordinator {
        Coordinator::new(
            GlobalModel::seed(ParameterSet::new()),
            quorum,
            Arc::new(LogLedger),
            Arc::new(MemoryArtifactStore::new()),
        )
    }

    fn update(client: &str, round_id: RoundId, sample_count: u64, values: Vec<f32>) -> ClientUpdate {
        let mut parameters = ParameterSet::new();
        parameters.insert("w".into(), Tensor::vector(values));
        ClientUpdate {
            client_id: client.into(),
            round_id,
            sample_count,
            claimed_hash: integrity::fingerprint(&parameters),
            parameters,
        }
    }

    #[tokio::test]
    async fn quorum_submission_closes_round_with_weighted_model() {
        let c = coordinator(2);
        let (round, model) = c.fetch_global_model();
        assert_eq!(round, 1);
        assert_eq!(model.version, 1);

        assert_eq!(c.submit_update(update("c1", 1, 10, vec![2.0])).unwrap(), 1);
        assert_eq!(c.submit_update(update("c2", 1, 30, vec![6.0])).unwrap(), 2);

        let (round, model) = c.fetch_global_model();
        assert_eq!(round, 2);
        assert_eq!(model.version, 2);
        assert_eq!(model.round_id, 1);
        assert_eq!(model.parameters["w"].values, vec![5.0]);
        assert_eq!(c.stats().rounds_completed, 1);
    }

    #[tokio::test]
    async fn duplicate_client_rejected_within_round() {
        let c = coordinator(3);
        c.submit_update(update("c1", 1, 10, vec![1.0])).unwrap();
        let err = c.submit_update(update("c1", 1, 10, vec![1.5])).unwrap_err();
        assert_eq!(err.kind(), "duplicate_client");
        assert_eq!(c.round_snapshot().participant_count, 1);
    }

    #[tokio::test]
    async fn stale_round_rejected() {
        let c = coordinator(2);
        let err = c.submit_update(update("c1", 7, 10, vec![1.0])).unwrap_err();
        assert_eq!(err.kind(), "stale_round");
    }

    #[tokio::test]
    async fn tampered_update_rejected_before_storage() {
        let c = coordinator(2);
        let mut u = update("c1", 1, 10, vec![1.0]);
        u.claimed_hash = "0000".into();
        let err = c.submit_update(u).unwrap_err();
        assert_eq!(err.kind(), "integrity_mismatch");
        assert_eq!(c.round_snapshot().participant_count, 0);
    }

    #[tokio::test]
    async fn overflowing_shape_rejected_before_storage() {
        let c = coordinator(2);
        let mut parameters = ParameterSet::new();
        parameters.insert("w".into(), Tensor::new(vec![usize::MAX / 2 + 1, 2], Vec::new()));
        let u = ClientUpdate {
            client_id: "c1".into(),
            round_id: 1,
            sample_count: 10,
            claimed_hash: integrity::fingerprint(&parameters),
            parameters,
        };
        let err = c.submit_update(u).unwrap_err();
        assert_eq!(err.kind(), "schema_mismatch");
        assert_eq!(c.round_snapshot().participant_count, 0);
    }

    #[tokio::test]
    async fn fetch_is_idempotent_between_closes() {
        let c = coordinator(2);
        c.submit_update(update("c1", 1, 10, vec![1.0])).unwrap();
        let (r1, m1) = c.fetch_global_model();
        let (r2, m2) = c.fetch_global_model();
        assert_eq!(r1, r2);
        assert_eq!(m1.version, m2.version);
    }

    #[tokio::test]
    async fn rounds_advance_monotonically() {
        let c = coordinator(1);
        for round in 1..=3 {
            c.submit_update(update("c1", round, 10, vec![round as f32])).unwrap();
        }
        let (round, model) = c.fetch_global_model();
        assert_eq!(round, 4);
        assert_eq!(model.version, 4);
        assert_eq!(c.stats().rounds_completed, 3);
    }

    #[tokio::test]
    async fn snapshot_reports_quorum_and_clients() {
        let c = coordinator(2);
        c.submit_update(update("c1", 1, 10, vec![1.0])).unwrap();
        let snap = c.round_snapshot();
        assert_eq!(snap.round_id, 1);
        assert_eq!(snap.quorum_threshold, 2);
        assert_eq!(snap.clients, vec!["c1"]);
        assert_eq!(snap.model_version, 1);
    }
}
