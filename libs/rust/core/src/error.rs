//! Protocol errors returned to submitting clients.

use thiserror::Error;

use crate::model::RoundId;

/// Validation failures raised by the submission / aggregation protocol.
/// All variants are synchronous, local checks: none of them crash the
/// coordinator, and round state is untouched unless documented otherwise.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("update targets round {submitted} but round {current} is current")]
    StaleRound { submitted: RoundId, current: RoundId },

    #[error("client {0} already submitted an update this round")]
    DuplicateClient(String),

    #[error("round {0} is not accepting submissions")]
    RoundNotOpen(RoundId),

    #[error("integrity mismatch: claimed {claimed}, computed {computed}")]
    IntegrityMismatch { claimed: String, computed: String },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("round {0} has nothing to aggregate")]
    EmptyRound(RoundId),
}

impl CoordinationError {
    /// Stable snake_case label, used as a metric attribute and by the
    /// transport layer to map errors onto status codes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StaleRound { .. } => "stale_round",
            Self::DuplicateClient(_) => "duplicate_client",
            Self::RoundNotOpen(_) => "round_not_open",
            Self::IntegrityMismatch { .. } => "integrity_mismatch",
            Self::SchemaMismatch(_) => "schema_mismatch",
            Self::EmptyRound(_) => "empty_round",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_are_stable() {
        let e = CoordinationError::StaleRound { submitted: 1, current: 2 };
        assert_eq!(e.kind(), "stale_round");
        assert_eq!(CoordinationError::DuplicateClient("c1".into()).kind(), "duplicate_client");
        assert_eq!(CoordinationError::EmptyRound(3).kind(), "empty_round");
    }

    #[test]
    fn display_names_both_rounds() {
        let e = CoordinationError::StaleRound { submitted: 4, current: 7 };
        let msg = e.to_string();
        assert!(msg.contains('4') && msg.contains('7'));
    }
}
