//! Integration tests for turn events.

mod common;

use axum::http::StatusCode;
use sqlx::PgPool;

#[sqlx::test(migrations = "../../migrations")]
async fn test_turn_events_are_listed_in_order_and_announced(pool: PgPool) {
    let pairing_id = common::connected_pairing(&pool).await;

    for body in [
        serde_json::json!({ "event_type": "combat_start", "round": 1 }),
        serde_json::json!({
            "event_type": "turn_start",
            "combatant_name": "Aria",
            "round": 1,
            "action_flags": { "action": true, "bonus_action": true, "reaction": true, "movement": true },
        }),
    ] {
        let app = common::build_test_app(pool.clone());
        let (status, _) =
            common::post_json(app, &format!("/api/v1/turns/{pairing_id}/events"), &body).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let app = common::build_test_app(pool.clone());
    let (status, events) = common::get_json(
        app,
        &format!("/api/v1/turns/{pairing_id}/events?status=pending"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let events = events.as_array().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["event_type"], "combat_start");
    assert_eq!(events[1]["combatant_name"], "Aria");

    let first_id = events[0]["id"].as_str().unwrap().to_owned();
    let app = common::build_test_app(pool.clone());
    let (status, announced) =
        common::post_empty(app, &format!("/api/v1/turns/events/{first_id}/announced")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(announced["status"], "announced");

    let app = common::build_test_app(pool);
    let (_, pending) = common::get_json(
        app,
        &format!("/api/v1/turns/{pairing_id}/events?status=pending"),
    )
    .await;
    assert_eq!(pending.as_array().unwrap().len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_mark_unknown_turn_event_returns_404(pool: PgPool) {
    let app = common::build_test_app(pool);

    let (status, json) = common::post_empty(
        app,
        &format!("/api/v1/turns/events/{}/announced", uuid::Uuid::new_v4()),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}
