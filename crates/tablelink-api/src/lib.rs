//! Tablelink — HTTP API.
//!
//! Exposes pairings, the issuer-side relay queue, the agent-side record
//! status writes, and turn events over JSON.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;
