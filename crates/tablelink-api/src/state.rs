//! Shared application state.

use std::sync::{Arc, Mutex};

use tablelink_core::clock::Clock;
use tablelink_core::rng::DeterministicRng;
use tablelink_core::store::RelayStore;
use tablelink_relay::application::pairing_handlers::PairingSettings;
use tablelink_relay::application::queue::RelayQueue;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Injected clock for deterministic timestamps.
    pub clock: Arc<dyn Clock>,
    /// Injected RNG for pairing codes and local fallback rolls.
    pub rng: Arc<Mutex<dyn DeterministicRng + Send>>,
    /// Shared relay store.
    pub store: Arc<dyn RelayStore>,
    /// Issuer-side queue over the same store.
    pub queue: RelayQueue,
    /// Pairing code lifetime.
    pub pairing: PairingSettings,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        rng: Arc<Mutex<dyn DeterministicRng + Send>>,
        store: Arc<dyn RelayStore>,
        queue: RelayQueue,
        pairing: PairingSettings,
    ) -> Self {
        Self {
            clock,
            rng,
            store,
            queue,
            pairing,
        }
    }
}
