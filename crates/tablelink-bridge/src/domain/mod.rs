//! Domain layer for the execution bridge.

pub mod plan;
