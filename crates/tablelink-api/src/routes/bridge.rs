//! Routes for the agent side of the relay.
//!
//! A bridge agent that cannot reach the store directly claims work and
//! reports outcomes through these endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tablelink_core::store::RelayRecord;
use tablelink_relay::application::record_handlers;
use tablelink_relay::domain::commands::{MarkDelivered, MarkFailed};
use tracing::instrument;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /records/{id}/delivered.
#[derive(Debug, Deserialize)]
pub struct DeliveredRequest {
    /// The outcome the agent observed.
    pub result: serde_json::Value,
}

/// Request body for POST /records/{id}/failed.
#[derive(Debug, Deserialize)]
pub struct FailedRequest {
    /// Why the record could not be executed.
    pub error: String,
}

/// POST /{pairing_id}/claim
#[instrument(skip(state))]
async fn claim_next(
    State(state): State<AppState>,
    Path(pairing_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let claimed =
        record_handlers::handle_claim_next(pairing_id, state.clock.as_ref(), state.store.as_ref())
            .await?;
    Ok(match claimed {
        Some(record) => Json(record).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// POST /records/{id}/delivered
#[instrument(skip(state, request))]
async fn mark_delivered(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<DeliveredRequest>,
) -> Result<Json<RelayRecord>, ApiError> {
    let command = MarkDelivered {
        record_id: id,
        result: request.result,
    };
    let record =
        record_handlers::handle_mark_delivered(&command, state.clock.as_ref(), state.store.as_ref())
            .await?;
    Ok(Json(record))
}

/// POST /records/{id}/failed
#[instrument(skip(state, request))]
async fn mark_failed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<FailedRequest>,
) -> Result<Json<RelayRecord>, ApiError> {
    let command = MarkFailed {
        record_id: id,
        error: request.error,
    };
    let record =
        record_handlers::handle_mark_failed(&command, state.clock.as_ref(), state.store.as_ref())
            .await?;
    Ok(Json(record))
}

/// Returns the router for the agent side.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{pairing_id}/claim", post(claim_next))
        .route("/records/{id}/delivered", post(mark_delivered))
        .route("/records/{id}/failed", post(mark_failed))
}
