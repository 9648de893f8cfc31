//! Shared test mocks and utilities for the Tablelink relay.

mod broadcast;
mod clock;
mod rng;
mod store;
mod surface;

pub use broadcast::InProcessBroadcast;
pub use clock::{FixedClock, ManualClock};
pub use rng::{MockRng, SequenceRng};
pub use store::{FailingRelayStore, InMemoryRelayStore, TransitionLog};
pub use surface::ScriptedSurface;
