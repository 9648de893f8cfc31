//! Domain layer for the relay context.

pub mod commands;
pub mod outcome;
pub mod pairing_code;
pub mod requests;
