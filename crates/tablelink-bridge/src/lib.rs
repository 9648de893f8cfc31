//! Tablelink — execution bridge bounded context.
//!
//! Runs in the agent context next to the tabletop page: claims records
//! published for its pairing, carries each one out against the tabletop,
//! and writes back what it observed.

pub mod application;
pub mod domain;
