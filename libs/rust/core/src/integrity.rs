//! Deterministic parameter fingerprinting and submission verification.

use sha2::{Digest, Sha256};

use crate::error::CoordinationError;
use crate::model::{ClientUpdate, ParameterSet};

/// SHA-256 over every tensor's values as little-endian f32 bytes, taken in
/// lexicographic parameter-name order (BTreeMap iteration). Names and shapes
/// do not enter the digest, so the fingerprint depends only on the ordered
/// value stream, not on how the map was built.
pub fn fingerprint(params: &ParameterSet) -> String {
    let mut hasher = Sha256::new();
    for tensor in params.values() {
        for v in &tensor.values {
            hasher.update(v.to_le_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Recomputes the fingerprint of a submitted update and compares it against
/// the hash the client claimed. Detects corruption and truncation in
/// transit; says nothing about semantic validity of the values.
pub fn verify(update: &ClientUpdate) -> Result<(), CoordinationError> {
    let computed = fingerprint(&update.parameters);
    if computed != update.claimed_hash {
        return Err(CoordinationError::IntegrityMismatch {
            claimed: update.claimed_hash.clone(),
            computed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tensor;

    fn two_param_set(first: (&str, Vec<f32>), second: (&str, Vec<f32>)) -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert(first.0.into(), Tensor::vector(first.1));
        params.insert(second.0.into(), Tensor::vector(second.1));
        params
    }

    #[test]
    fn fingerprint_ignores_insertion_order() {
        let ab = two_param_set(("a", vec![1.0]), ("b", vec![2.0]));
        let ba = two_param_set(("b", vec![2.0]), ("a", vec![1.0]));
        assert_eq!(fingerprint(&ab), fingerprint(&ba));
    }

    #[test]
    fn empty_set_hashes_to_empty_sha256() {
        assert_eq!(
            fingerprint(&ParameterSet::new()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn verify_accepts_matching_hash() {
        let params = two_param_set(("a", vec![1.0, 2.0]), ("b", vec![3.0]));
        let update = ClientUpdate {
            client_id: "c1".into(),
            round_id: 1,
            sample_count: 10,
            claimed_hash: fingerprint(&params),
            parameters: params,
        };
        assert!(verify(&update).is_ok());
    }

    #[test]
    fn verify_rejects_mutated_values() {
        let params = two_param_set(("a", vec![1.0, 2.0]), ("b", vec![3.0]));
        let claimed = fingerprint(&params);
        let mut mutated = params;
        if let Some(t) = mutated.get_mut("a") {
            t.values[0] = 1.0000001;
        }
        let update = ClientUpdate {
            client_id: "c1".into(),
            round_id: 1,
            sample_count: 10,
            claimed_hash: claimed,
            parameters: mutated,
        };
        let err = verify(&update).unwrap_err();
        assert_eq!(err.kind(), "integrity_mismatch");
    }
}
