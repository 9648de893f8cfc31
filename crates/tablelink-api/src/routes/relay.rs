//! Routes for the issuer side of the relay.
//!
//! By default a roll or action request publishes the record and holds the
//! connection until the outcome is known. With `?wait=false` the record is
//! returned as soon as it is published and the caller collects the outcome
//! from `/records/{id}/outcome`.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tablelink_core::store::RelayRecord;
use tablelink_relay::application::record_handlers;
use tablelink_relay::domain::outcome::RelayOutcome;
use tablelink_relay::domain::requests::{ActionRequest, RelayRequest, RollRequest};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Longest a caller may hold an outcome request open.
const MAX_AWAIT: Duration = Duration::from_secs(5 * 60);

/// Query parameters for POST /rolls and POST /actions.
#[derive(Debug, Deserialize)]
pub struct PublishParams {
    /// Wait for the outcome before responding. Defaults to `true`.
    #[serde(default)]
    pub wait: Option<bool>,
}

/// Query parameters for GET /records/{id}/outcome.
#[derive(Debug, Deserialize)]
pub struct OutcomeParams {
    /// How long to wait, in milliseconds. Defaults to the queue's window.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn published(record: RelayRecord) -> Response {
    (StatusCode::ACCEPTED, Json(record)).into_response()
}

/// POST /rolls
#[instrument(skip(state, request), fields(pairing_id = %request.pairing_id, formula = %request.formula))]
async fn relay_roll(
    State(state): State<AppState>,
    Query(params): Query<PublishParams>,
    Json(request): Json<RollRequest>,
) -> Result<Response, ApiError> {
    if params.wait == Some(false) {
        let record = state.queue.publish(&RelayRequest::Roll(request)).await?;
        return Ok(published(record));
    }

    let outcome = state.queue.relay_roll(request, &state.rng).await?;
    info!(record_id = %outcome.record_id, origin = ?outcome.origin, "roll relayed");
    Ok(Json(outcome).into_response())
}

/// POST /actions
#[instrument(skip(state, request), fields(pairing_id = %request.pairing_id, kind = %request.kind))]
async fn relay_action(
    State(state): State<AppState>,
    Query(params): Query<PublishParams>,
    Json(request): Json<ActionRequest>,
) -> Result<Response, ApiError> {
    if params.wait == Some(false) {
        let record = state.queue.publish(&RelayRequest::Action(request)).await?;
        return Ok(published(record));
    }

    let outcome = state.queue.relay_action(request).await?;
    info!(record_id = %outcome.record_id, status = %outcome.status, "action relayed");
    Ok(Json(outcome).into_response())
}

/// GET /records/{id}
#[instrument(skip(state))]
async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RelayRecord>, ApiError> {
    let record = record_handlers::get_record(id, state.store.as_ref()).await?;
    Ok(Json(record))
}

/// GET /records/{id}/outcome
#[instrument(skip(state))]
async fn await_outcome(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<OutcomeParams>,
) -> Result<Json<RelayOutcome>, ApiError> {
    let timeout = params
        .timeout_ms
        .map(|ms| Duration::from_millis(ms).min(MAX_AWAIT));
    let outcome = state.queue.await_outcome(id, timeout).await?;
    Ok(Json(outcome))
}

/// Returns the router for the issuer side.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rolls", post(relay_roll))
        .route("/actions", post(relay_action))
        .route("/records/{id}", get(get_record))
        .route("/records/{id}/outcome", get(await_outcome))
}
