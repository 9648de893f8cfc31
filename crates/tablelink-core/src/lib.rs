//! Tablelink Core — shared relay abstractions.
//!
//! This crate defines the fundamental types and ports that the relay,
//! bridge, and turn-tracking contexts depend on: the shared store schema,
//! the broadcast and tabletop-surface ports, dice, and the one-shot
//! subscription used by both the issuer's wait and the agent's log watch.
//! It contains no database or HTTP code.

pub mod broadcast;
pub mod clock;
pub mod dice;
pub mod error;
pub mod log;
pub mod retry;
pub mod rng;
pub mod store;
pub mod surface;
pub mod watch;
