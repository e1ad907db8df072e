//! Round lifecycle state machine.
//!
//! One `RoundMachine` owns the round currently accepting submissions and
//! the published global model. Transitions are forward-only: a round moves
//! `Open -> Aggregating -> Closed`, and closing round N atomically opens
//! round N+1, so there is always exactly one current round.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CoordinationError;
use crate::model::{AggregationResult, ClientUpdate, GlobalModel, ModelVersion, RoundId};
use crate::store::UpdateStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Open,
    Aggregating,
    Closed,
}

#[derive(Debug)]
struct Round {
    id: RoundId,
    status: RoundStatus,
    opened_at: i64,
    quorum_threshold: usize,
    store: UpdateStore,
    // participants preserved for snapshots after the store is drained
    frozen_clients: Vec<String>,
}

impl Round {
    fn open(id: RoundId, quorum_threshold: usize) -> Self {
        Self {
            id,
            status: RoundStatus::Open,
            opened_at: chrono::Utc::now().timestamp(),
            quorum_threshold,
            store: UpdateStore::new(),
            frozen_clients: Vec::new(),
        }
    }

    fn participant_count(&self) -> usize {
        match self.status {
            RoundStatus::Open => self.store.len(),
            _ => self.frozen_clients.len(),
        }
    }
}

/// Submission snapshot handed to the aggregator when a round freezes.
/// Updates are in ascending client id order.
#[derive(Debug)]
pub struct FrozenRound {
    pub round_id: RoundId,
    pub base_version: ModelVersion,
    pub updates: Vec<ClientUpdate>,
}

/// Point-in-time view of the current round, for operators and transports.
#[derive(Clone, Debug, Serialize)]
pub struct RoundSnapshot {
    pub round_id: RoundId,
    pub status: RoundStatus,
    pub participant_count: usize,
    pub quorum_threshold: usize,
    pub clients: Vec<String>,
    pub model_version: ModelVersion,
    pub opened_at: i64,
}

/// Owns the current round plus the published model. Methods assume the
/// caller already holds exclusive access; the coordinator's lock provides
/// it.
pub struct RoundMachine {
    current: Round,
    model: Arc<GlobalModel>,
    quorum_threshold: usize,
}

impl RoundMachine {
    /// Starts at round 1 with the given seed model published.
    pub fn new(seed: GlobalModel, quorum_threshold: usize) -> Self {
        Self {
            current: Round::open(1, quorum_threshold),
            model: Arc::new(seed),
            quorum_threshold,
        }
    }

    pub fn current_round_id(&self) -> RoundId {
        self.current.id
    }

    pub fn model(&self) -> Arc<GlobalModel> {
        Arc::clone(&self.model)
    }

    /// Validates an update against the current round and stores it,
    /// returning the participant count after acceptance.
    pub fn try_accept(&mut self, update: ClientUpdate) -> Result<usize, CoordinationError> {
        if update.round_id != self.current.id {
            return Err(CoordinationError::StaleRound {
                submitted: update.round_id,
                current: self.current.id,
            });
        }
        if self.current.status != RoundStatus::Open {
            return Err(CoordinationError::RoundNotOpen(self.current.id));
        }
        self.current.store.insert(update)?;
        Ok(self.current.store.len())
    }

    pub fn quorum_met(&self) -> bool {
        self.current.status == RoundStatus::Open
            && self.current.store.len() >= self.current.quorum_threshold
    }

    /// Freezes the round for aggregation. Exactly one caller per round gets
    /// the snapshot; anyone racing behind it gets `None` and must treat the
    /// round as already being aggregated.
    pub fn begin_aggregation(&mut self) -> Option<FrozenRound> {
        if !self.quorum_met() {
            return None;
        }
        self.current.status = RoundStatus::Aggregating;
        let updates = self.current.store.take_sorted();
        self.current.frozen_clients = updates.iter().map(|u| u.client_id.clone()).collect();
        Some(FrozenRound {
            round_id: self.current.id,
            base_version: self.model.version,
            updates,
        })
    }

    /// Installs the aggregated model, closes the round, and opens the next
    /// one. A result for a round or status this machine is not expecting is
    /// dropped with a warning and state stays untouched.
    pub fn close(&mut self, result: AggregationResult) {
        if result.round_id != self.current.id || self.current.status != RoundStatus::Aggregating {
            warn!(
                result_round = result.round_id,
                current_round = self.current.id,
                status = ?self.current.status,
                "dropping aggregation result for mismatched round"
            );
            return;
        }
        self.current.status = RoundStatus::Closed;
        self.model = Arc::new(result.new_model);
        self.current = Round::open(self.current.id + 1, self.quorum_threshold);
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        let clients = match self.current.status {
            RoundStatus::Open => self.current.store.client_ids(),
            _ => self.current.frozen_clients.clone(),
        };
        RoundSnapshot {
            round_id: self.current.id,
            status: self.current.status,
            participant_count: self.current.participant_count(),
            quorum_threshold: self.current.quorum_threshold,
            clients,
            model_version: self.model.version,
            opened_at: self.current.opened_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParameterSet;

    fn machine(quorum: usize) -> RoundMachine {
        RoundMachine::new(GlobalModel::seed(ParameterSet::new()), quorum)
    }

    fn update(client: &str, round_id: RoundId) -> ClientUpdate {
        ClientUpdate {
            client_id: client.into(),
            round_id,
            sample_count: 5,
            parameters: ParameterSet::new(),
            claimed_hash: String::new(),
        }
    }

    fn result_for(frozen: &FrozenRound) -> AggregationResult {
        AggregationResult {
            round_id: frozen.round_id,
            new_model: GlobalModel {
                version: frozen.base_version + 1,
                round_id: frozen.round_id,
                parameters: ParameterSet::new(),
                updated_at: 0,
            },
            participant_count: frozen.updates.len(),
            total_samples: 10,
            model_hash: String::new(),
        }
    }

    #[test]
    fn stale_round_rejected() {
        let mut m = machine(2);
        let err = m.try_accept(update("c1", 9)).unwrap_err();
        assert_eq!(err.kind(), "stale_round");
    }

    #[test]
    fn freeze_happens_exactly_once() {
        let mut m = machine(2);
        m.try_accept(update("c2", 1)).unwrap();
        assert!(!m.quorum_met());
        m.try_accept(update("c1", 1)).unwrap();
        assert!(m.quorum_met());

        let frozen = m.begin_aggregation().unwrap();
        assert_eq!(frozen.round_id, 1);
        let order: Vec<&str> = frozen.updates.iter().map(|u| u.client_id.as_str()).collect();
        assert_eq!(order, vec!["c1", "c2"]);

        assert!(m.begin_aggregation().is_none());
        let err = m.try_accept(update("c3", 1)).unwrap_err();
        assert_eq!(err.kind(), "round_not_open");
    }

    #[test]
    fn close_opens_next_round_and_publishes_model() {
        let mut m = machine(1);
        m.try_accept(update("c1", 1)).unwrap();
        let frozen = m.begin_aggregation().unwrap();
        m.close(result_for(&frozen));

        assert_eq!(m.current_round_id(), 2);
        assert_eq!(m.model().version, 2);
        assert_eq!(m.snapshot().status, RoundStatus::Open);
        assert_eq!(m.snapshot().participant_count, 0);
    }

    #[test]
    fn mismatched_close_is_dropped() {
        let mut m = machine(1);
        m.try_accept(update("c1", 1)).unwrap();
        let frozen = m.begin_aggregation().unwrap();
        let mut wrong = result_for(&frozen);
        wrong.round_id = 42;
        m.close(wrong);
        assert_eq!(m.current_round_id(), 1);
        assert_eq!(m.snapshot().status, RoundStatus::Aggregating);
        assert_eq!(m.snapshot().clients, vec!["c1"]);
    }
}
