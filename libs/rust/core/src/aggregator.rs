//! Sample-weighted federated averaging over a frozen round.

use crate::error::CoordinationError;
use crate::integrity;
use crate::model::{AggregationResult, ClientUpdate, GlobalModel, ParameterSet, Tensor};
use crate::round::FrozenRound;

/// Folds a frozen round into the next global model. Every parameter element
/// becomes `sum(sample_count * value) / sum(sample_count)`, accumulated in
/// f64 and stored back as f32. Updates are consumed in the frozen
/// (ascending client id) order, so a given input set always produces the
/// same bits.
pub fn aggregate(frozen: &FrozenRound) -> Result<AggregationResult, CoordinationError> {
    let first = frozen
        .updates
        .first()
        .ok_or(CoordinationError::EmptyRound(frozen.round_id))?;
    let total_samples: u64 = frozen.updates.iter().map(|u| u.sample_count).sum();
    if total_samples == 0 {
        return Err(CoordinationError::EmptyRound(frozen.round_id));
    }
    check_schema(&frozen.updates)?;

    let total = total_samples as f64;
    let mut parameters = ParameterSet::new();
    for (name, proto) in &first.parameters {
        let mut acc = vec![0f64; proto.values.len()];
        for u in &frozen.updates {
            // schema check proved presence and matching length
            if let Some(t) = u.parameters.get(name) {
                let w = u.sample_count as f64;
                for (a, v) in acc.iter_mut().zip(&t.values) {
                    *a += w * f64::from(*v);
                }
            }
        }
        let values: Vec<f32> = acc.into_iter().map(|a| (a / total) as f32).collect();
        parameters.insert(name.clone(), Tensor::new(proto.shape.clone(), values));
    }

    let new_model = GlobalModel {
        version: frozen.base_version + 1,
        round_id: frozen.round_id,
        parameters,
        updated_at: chrono::Utc::now().timestamp(),
    };
    let model_hash = integrity::fingerprint(&new_model.parameters);
    Ok(AggregationResult {
        round_id: frozen.round_id,
        new_model,
        participant_count: frozen.updates.len(),
        total_samples,
        model_hash,
    })
}

/// Every update must agree with the first on tensor names, shapes, and
/// value counts. A round that froze with disagreeing schemas cannot be
/// averaged.
fn check_schema(updates: &[ClientUpdate]) -> Result<(), CoordinationError> {
    let (first, rest) = match updates.split_first() {
        Some(split) => split,
        None => return Ok(()),
    };
    for u in rest {
        if u.parameters.len() != first.parameters.len() {
            return Err(CoordinationError::SchemaMismatch(format!(
                "client {} sent {} tensors, expected {}",
                u.client_id,
                u.parameters.len(),
                first.parameters.len()
            )));
        }
        for (name, proto) in &first.parameters {
            match u.parameters.get(name) {
                None => {
                    return Err(CoordinationError::SchemaMismatch(format!(
                        "client {} missing tensor {name}",
                        u.client_id
                    )))
                }
                Some(t) if t.shape != proto.shape => {
                    return Err(CoordinationError::SchemaMismatch(format!(
                        "client {} tensor {name} shape {:?}, expected {:?}",
                        u.client_id, t.shape, proto.shape
                    )))
                }
                Some(t) if t.values.len() != proto.values.len() => {
                    return Err(CoordinationError::SchemaMismatch(format!(
                        "client {} tensor {name} has {} values, expected {}",
                        u.client_id,
                        t.values.len(),
                        proto.values.len()
                    )))
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(client: &str, sample_count: u64, values: Vec<f32>) -> ClientUpdate {
        let mut parameters = ParameterSet::new();
        parameters.insert("w".into(), Tensor::vector(values));
        ClientUpdate {
            client_id: client.into(),
            round_id: 1,
            sample_count,
            claimed_hash: integrity::fingerprint(&parameters),
            parameters,
        }
    }

    fn frozen(updates: Vec<ClientUpdate>) -> FrozenRound {
        FrozenRound { round_id: 1, base_version: 1, updates }
    }

    #[test]
    fn weighted_mean_follows_sample_counts() {
        let fr = frozen(vec![update("c1", 10, vec![2.0]), update("c2", 30, vec![6.0])]);
        let result = aggregate(&fr).unwrap();
        assert_eq!(result.new_model.parameters["w"].values, vec![5.0]);
        assert_eq!(result.new_model.version, 2);
        assert_eq!(result.new_model.round_id, 1);
        assert_eq!(result.participant_count, 2);
        assert_eq!(result.total_samples, 40);
    }

    #[test]
    fn equal_samples_give_plain_mean() {
        let fr = frozen(vec![
            update("c1", 10, vec![0.1, 1.0]),
            update("c2", 10, vec![0.3, 3.0]),
        ]);
        let result = aggregate(&fr).unwrap();
        let w = &result.new_model.parameters["w"].values;
        assert!((w[0] - 0.2).abs() < 1e-6);
        assert!((w[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn result_hash_matches_fingerprint() {
        let fr = frozen(vec![update("c1", 10, vec![2.0]), update("c2", 30, vec![6.0])]);
        let result = aggregate(&fr).unwrap();
        assert_eq!(result.model_hash, integrity::fingerprint(&result.new_model.parameters));
    }

    #[test]
    fn empty_round_rejected() {
        let err = aggregate(&frozen(vec![])).unwrap_err();
        assert_eq!(err.kind(), "empty_round");
    }

    #[test]
    fn zero_total_samples_rejected() {
        let fr = frozen(vec![update("c1", 0, vec![1.0]), update("c2", 0, vec![2.0])]);
        let err = aggregate(&fr).unwrap_err();
        assert_eq!(err.kind(), "empty_round");
    }

    #[test]
    fn shape_disagreement_rejected() {
        let fr = frozen(vec![
            update("c1", 10, vec![1.0, 2.0]),
            update("c2", 10, vec![1.0]),
        ]);
        let err = aggregate(&fr).unwrap_err();
        assert_eq!(err.kind(), "schema_mismatch");
    }
}
