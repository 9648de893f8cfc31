//! Routes for turn events.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tablelink_core::store::{TurnEvent, TurnEventStatus};
use tablelink_turns::application::announcements::{self, RecordTurnEvent};
use tracing::instrument;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters for GET /{pairing_id}/events.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// Only return events with this status.
    #[serde(default)]
    pub status: Option<TurnEventStatus>,
}

/// POST /{pairing_id}/events
#[instrument(skip(state, command), fields(event_type = %command.event_type))]
async fn record_turn_event(
    State(state): State<AppState>,
    Path(pairing_id): Path<Uuid>,
    Json(mut command): Json<RecordTurnEvent>,
) -> Result<(StatusCode, Json<TurnEvent>), ApiError> {
    command.pairing_id = pairing_id;
    let event = announcements::handle_record_turn_event(
        command,
        state.clock.as_ref(),
        state.store.as_ref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /{pairing_id}/events
#[instrument(skip(state))]
async fn list_turn_events(
    State(state): State<AppState>,
    Path(pairing_id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<TurnEvent>>, ApiError> {
    let events =
        announcements::list_turn_events(pairing_id, params.status, state.store.as_ref()).await?;
    Ok(Json(events))
}

/// POST /events/{id}/announced
#[instrument(skip(state))]
async fn mark_announced(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TurnEvent>, ApiError> {
    let event = announcements::handle_mark_announced(id, state.store.as_ref()).await?;
    Ok(Json(event))
}

/// Returns the router for turn events.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/{pairing_id}/events",
            post(record_turn_event).get(list_turn_events),
        )
        .route("/events/{id}/announced", post(mark_announced))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeDelta, TimeZone, Utc};
    use serde_json::Value;
    use tablelink_core::store::{Pairing, PairingStatus, RelayStore};
    use tablelink_test_support::{InMemoryRelayStore, MockRng};
    use tower::ServiceExt;

    use crate::routes::test_state;

    async fn pairing(store: &InMemoryRelayStore) -> Uuid {
        let start = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let pairing = Pairing {
            id: Uuid::new_v4(),
            code: "K7PQ2M".into(),
            issuer_ref: None,
            agent_ref: "tab-1".into(),
            status: PairingStatus::Pending,
            created_at: start,
            connected_at: None,
            expires_at: start + TimeDelta::minutes(10),
        };
        store.insert_pairing(&pairing).await.unwrap();
        pairing.id
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body_bytes).unwrap())
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_record_list_and_announce() {
        // Arrange
        let store = Arc::new(InMemoryRelayStore::new());
        let pairing_id = pairing(&store).await;
        let app = router().with_state(test_state(store.clone(), MockRng));

        // Act
        let (created_status, created) = send(
            app.clone(),
            post_json(
                &format!("/{pairing_id}/events"),
                &serde_json::json!({
                    "event_type": "turn_start",
                    "combatant_name": "Aria",
                    "round": 1,
                    "action_flags": { "action": true },
                }),
            ),
        )
        .await;
        let (_, pending) = send(
            app.clone(),
            get(&format!("/{pairing_id}/events?status=pending")),
        )
        .await;
        let event_id = created["id"].as_str().unwrap().to_owned();
        let (announced_status, announced) = send(
            app.clone(),
            post_json(&format!("/events/{event_id}/announced"), &Value::Null),
        )
        .await;
        let (_, still_pending) =
            send(app, get(&format!("/{pairing_id}/events?status=pending"))).await;

        // Assert
        assert_eq!(created_status, StatusCode::CREATED);
        assert_eq!(created["pairing_id"], pairing_id.to_string());
        assert_eq!(created["status"], "pending");
        assert_eq!(pending.as_array().unwrap().len(), 1);
        assert_eq!(announced_status, StatusCode::OK);
        assert_eq!(announced["status"], "announced");
        assert!(still_pending.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_turn_start_without_combatant_returns_400() {
        // Arrange
        let store = Arc::new(InMemoryRelayStore::new());
        let pairing_id = pairing(&store).await;
        let app = router().with_state(test_state(store.clone(), MockRng));

        // Act
        let (status, json) = send(
            app,
            post_json(
                &format!("/{pairing_id}/events"),
                &serde_json::json!({ "event_type": "turn_start", "round": 1 }),
            ),
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_events_for_unknown_pairing_return_404() {
        // Arrange
        let app = router().with_state(test_state(Arc::new(InMemoryRelayStore::new()), MockRng));

        // Act
        let (status, _) = send(
            app,
            post_json(
                &format!("/{}/events", Uuid::new_v4()),
                &serde_json::json!({ "event_type": "combat_start", "round": 1 }),
            ),
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
