//! Application layer for the relay context.

pub mod pairing_handlers;
pub mod queue;
pub mod record_handlers;
pub mod sweep;
