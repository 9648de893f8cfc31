//! Route modules organized by bounded context.

pub mod bridge;
pub mod health;
pub mod pairing;
pub mod relay;
pub mod turns;

use axum::Router;

use crate::state::AppState;

/// Assembles every context router under its prefix.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/api/v1/pairings", pairing::router())
        .nest("/api/v1/relay", relay::router())
        .nest("/api/v1/bridge", bridge::router())
        .nest("/api/v1/turns", turns::router())
        .with_state(state)
}

#[cfg(test)]
pub(crate) fn test_state(
    store: std::sync::Arc<dyn tablelink_core::store::RelayStore>,
    rng: impl tablelink_core::rng::DeterministicRng + Send + 'static,
) -> AppState {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::TimeZone;
    use tablelink_core::clock::Clock;
    use tablelink_core::rng::DeterministicRng;
    use tablelink_relay::application::pairing_handlers::PairingSettings;
    use tablelink_relay::application::queue::{QueueSettings, RelayQueue};
    use tablelink_test_support::FixedClock;

    let clock: Arc<dyn Clock> = Arc::new(FixedClock(
        chrono::Utc
            .with_ymd_and_hms(2026, 1, 15, 10, 0, 0)
            .unwrap(),
    ));
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(rng));
    let queue = RelayQueue::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        QueueSettings {
            poll_interval: Duration::from_millis(10),
            await_timeout: Duration::from_millis(100),
        },
    );
    AppState::new(clock, rng, store, queue, PairingSettings::default())
}
