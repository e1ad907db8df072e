//! HTTP handlers and the protocol error to status mapping.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::warn;

use federation_core::{CoordinationError, Coordinator};

use crate::wire::{self, ErrorBody, SubmitRequest, SubmitResponse};

pub type SharedCoordinator = Arc<Coordinator>;

pub fn router(coordinator: SharedCoordinator) -> Router {
    Router::new()
        .route("/model", get(get_model))
        .route("/submit", post(post_submit))
        .route("/round", get(get_round))
        .route("/live", get(get_live))
        .route("/ready", get(get_ready))
        .route("/metrics", get(get_metrics))
        .with_state(coordinator)
}

/// Round contention maps to 409, payload problems to 422. An empty round
/// has no client remedy and surfaces as 500.
pub fn status_for(err: &CoordinationError) -> StatusCode {
    match err {
        CoordinationError::StaleRound { .. }
        | CoordinationError::DuplicateClient(_)
        | CoordinationError::RoundNotOpen(_) => StatusCode::CONFLICT,
        CoordinationError::IntegrityMismatch { .. } | CoordinationError::SchemaMismatch(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        CoordinationError::EmptyRound(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, error: &str, detail: String) -> Response {
    (status, Json(ErrorBody { error: error.into(), detail })).into_response()
}

async fn get_model(State(coordinator): State<SharedCoordinator>) -> Response {
    let (round_id, model) = coordinator.fetch_global_model();
    match wire::model_response(round_id, &model) {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            warn!(error = %e, "model_encode_failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "encode_failed", e.to_string())
        }
    }
}

async fn post_submit(
    State(coordinator): State<SharedCoordinator>,
    Json(req): Json<SubmitRequest>,
) -> Response {
    let update = match wire::submit_to_update(req) {
        Ok(update) => update,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "bad_payload", e.to_string()),
    };
    match coordinator.submit_update(update) {
        Ok(participant_count) => Json(SubmitResponse {
            status: "accepted".into(),
            participant_count,
        })
        .into_response(),
        Err(e) => error_response(status_for(&e), e.kind(), e.to_string()),
    }
}

async fn get_round(State(coordinator): State<SharedCoordinator>) -> Response {
    Json(serde_json::json!({
        "round": coordinator.round_snapshot(),
        "stats": coordinator.stats(),
    }))
    .into_response()
}

async fn get_live() -> Response {
    Json(serde_json::json!({ "live": federation_core::is_live() })).into_response()
}

async fn get_ready() -> Response {
    let ready = federation_core::is_ready();
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(serde_json::json!({ "ready": ready }))).into_response()
}

async fn get_metrics() -> Response {
    match federation_core::render_metrics() {
        Ok(buf) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], buf).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("encode error: {e}")).into_response(),
    }
}
