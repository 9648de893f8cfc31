//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sqlx::PgPool;
use tablelink_core::clock::Clock;
use tablelink_core::rng::DeterministicRng;
use tablelink_core::store::RelayStore;
use tablelink_relay::application::pairing_handlers::PairingSettings;
use tablelink_relay::application::queue::{QueueSettings, RelayQueue};
use tablelink_store::pg_relay_store::PgRelayStore;
use tablelink_test_support::{FixedClock, SequenceRng};
use tower::ServiceExt;

use tablelink_api::routes;
use tablelink_api::state::AppState;

/// Fixed timestamp used across all integration tests.
fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(
        chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2026, 1, 15, 10, 0, 0).unwrap(),
    ))
}

/// Build the full app router with a real `PgRelayStore` and deterministic
/// Clock/RNG. Uses the same route structure as `main.rs`.
pub fn build_test_app(pool: PgPool) -> Router {
    build_test_app_with_rng(pool, SequenceRng::new(vec![0; 12]))
}

/// Build the full app router with a custom `SequenceRng` for tests that need
/// specific pairing codes or fallback dice.
pub fn build_test_app_with_rng(pool: PgPool, rng: SequenceRng) -> Router {
    let clock = fixed_clock();
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(rng));
    let store: Arc<dyn RelayStore> = Arc::new(PgRelayStore::new(pool));
    let queue = RelayQueue::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        QueueSettings {
            poll_interval: Duration::from_millis(20),
            await_timeout: Duration::from_millis(200),
        },
    );
    routes::app(AppState::new(
        clock,
        rng,
        store,
        queue,
        PairingSettings::default(),
    ))
}

async fn into_parts(response: axum::response::Response) -> (StatusCode, serde_json::Value) {
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };
    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    into_parts(app.oneshot(request).await.unwrap()).await
}

/// Send a POST request without a body and return the response.
pub async fn post_empty(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    into_parts(app.oneshot(request).await.unwrap()).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    into_parts(app.oneshot(request).await.unwrap()).await
}

/// Create a pairing and claim it; returns the pairing id.
pub async fn connected_pairing(pool: &PgPool) -> String {
    let (status, created) = post_json(
        build_test_app(pool.clone()),
        "/api/v1/pairings",
        &serde_json::json!({ "agent_ref": "tab-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, claimed) = post_json(
        build_test_app(pool.clone()),
        "/api/v1/pairings/claim",
        &serde_json::json!({ "code": created["code"], "issuer_ref": "discord:42" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    claimed["id"].as_str().unwrap().to_owned()
}
