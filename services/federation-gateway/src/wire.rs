//! Wire shapes for the HTTP surface. Parameter sets travel as base64 over
//! their JSON encoding, hashes as hex strings.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use federation_core::{ClientUpdate, GlobalModel, ModelVersion, ParameterSet, RoundId};

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelResponse {
    pub round_id: RoundId,
    pub version: ModelVersion,
    pub weights_b64: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub client_id: String,
    pub round_id: RoundId,
    pub num_samples: u64,
    pub weights_b64: String,
    pub weights_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    pub participant_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

pub fn encode_parameters(params: &ParameterSet) -> Result<String> {
    Ok(BASE64.encode(serde_json::to_vec(params)?))
}

pub fn decode_parameters(weights_b64: &str) -> Result<ParameterSet> {
    let bytes = BASE64
        .decode(weights_b64)
        .context("weights_b64 is not valid base64")?;
    serde_json::from_slice(&bytes).context("decoded weights are not a parameter set")
}

pub fn model_response(round_id: RoundId, model: &GlobalModel) -> Result<ModelResponse> {
    Ok(ModelResponse {
        round_id,
        version: model.version,
        weights_b64: encode_parameters(&model.parameters)?,
    })
}

pub fn submit_to_update(req: SubmitRequest) -> Result<ClientUpdate> {
    let parameters = decode_parameters(&req.weights_b64)?;
    Ok(ClientUpdate {
        client_id: req.client_id,
        round_id: req.round_id,
        sample_count: req.num_samples,
        parameters,
        claimed_hash: req.weights_hash,
    })
}
