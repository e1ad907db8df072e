//! Data model shared across the coordination engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoordinationError;

pub type RoundId = u64;
pub type ModelVersion = u64;

/// Named parameter tensors in lexicographic name order. BTreeMap keeps the
/// ordering structural, so fingerprinting and aggregation never re-sort.
pub type ParameterSet = BTreeMap<String, Tensor>;

/// A single named parameter: row-major values plus the shape they flatten.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self { shape, values }
    }

    /// Convenience constructor for rank-1 tensors.
    pub fn vector(values: Vec<f32>) -> Self {
        Self { shape: vec![values.len()], values }
    }

    /// Element count the shape implies, or `None` when the product
    /// overflows. Shapes arrive from untrusted clients.
    pub fn element_count(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    pub fn is_consistent(&self) -> bool {
        self.element_count() == Some(self.values.len())
    }
}

/// Rejects parameter sets containing a tensor whose value length does not
/// match its declared shape.
pub fn validate_parameters(params: &ParameterSet) -> Result<(), CoordinationError> {
    for (name, tensor) in params {
        if !tensor.is_consistent() {
            let detail = match tensor.element_count() {
                Some(count) => format!("implies {count} values, got {}", tensor.values.len()),
                None => "element count overflows".to_string(),
            };
            return Err(CoordinationError::SchemaMismatch(format!(
                "tensor {name}: shape {:?} {detail}",
                tensor.shape
            )));
        }
    }
    Ok(())
}

/// The published model clients train against. Replaced wholesale when a
/// round closes, never mutated in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlobalModel {
    pub version: ModelVersion,
    pub round_id: RoundId,
    pub parameters: ParameterSet,
    pub updated_at: i64,
}

impl GlobalModel {
    /// Initial model before any round has closed. `round_id` 0 marks it as
    /// seeded rather than aggregated.
    pub fn seed(parameters: ParameterSet) -> Self {
        Self { version: 1, round_id: 0, parameters, updated_at: chrono::Utc::now().timestamp() }
    }
}

/// One client's contribution to a round. Immutable once accepted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientUpdate {
    pub client_id: String,
    pub round_id: RoundId,
    pub sample_count: u64,
    pub parameters: ParameterSet,
    pub claimed_hash: String,
}

/// Outcome of aggregating one round. Produced exactly once per round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregationResult {
    pub round_id: RoundId,
    pub new_model: GlobalModel,
    pub participant_count: usize,
    pub total_samples: u64,
    pub model_hash: String,
}
