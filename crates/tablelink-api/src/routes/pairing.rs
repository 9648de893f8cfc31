//! Routes for pairings.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tablelink_core::store::Pairing;
use tablelink_relay::application::pairing_handlers;
use tablelink_relay::domain::commands::{ClaimPairing, CreatePairing, ReissuePairing};
use tracing::instrument;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// POST /
#[instrument(skip(state, command), fields(agent_ref = %command.agent_ref))]
async fn create_pairing(
    State(state): State<AppState>,
    Json(command): Json<CreatePairing>,
) -> Result<(StatusCode, Json<Pairing>), ApiError> {
    let pairing = pairing_handlers::handle_create_pairing(
        &command,
        &state.pairing,
        state.clock.as_ref(),
        &state.rng,
        state.store.as_ref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(pairing)))
}

/// GET /{id}
#[instrument(skip(state))]
async fn get_pairing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Pairing>, ApiError> {
    let pairing = pairing_handlers::get_pairing(id, state.store.as_ref()).await?;
    Ok(Json(pairing))
}

/// POST /claim
#[instrument(skip(state, command), fields(issuer_ref = %command.issuer_ref))]
async fn claim_pairing(
    State(state): State<AppState>,
    Json(command): Json<ClaimPairing>,
) -> Result<Json<Pairing>, ApiError> {
    let pairing =
        pairing_handlers::handle_claim_pairing(&command, state.clock.as_ref(), state.store.as_ref())
            .await?;
    Ok(Json(pairing))
}

/// POST /{id}/reissue
#[instrument(skip(state))]
async fn reissue_pairing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Pairing>, ApiError> {
    let command = ReissuePairing { pairing_id: id };
    let pairing = pairing_handlers::handle_reissue_pairing(
        &command,
        &state.pairing,
        state.clock.as_ref(),
        &state.rng,
        state.store.as_ref(),
    )
    .await?;
    Ok(Json(pairing))
}

/// Returns the router for pairings.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_pairing))
        .route("/claim", post(claim_pairing))
        .route("/{id}", get(get_pairing))
        .route("/{id}/reissue", post(reissue_pairing))
}
