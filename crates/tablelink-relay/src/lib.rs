//! Tablelink — relay bounded context.
//!
//! Owns the lifecycle of pairings and relay records: issuing and claiming
//! pairing codes, the issuer-side publish/await queue, the agent-side status
//! writes, and the periodic expiry sweep.

pub mod application;
pub mod domain;
