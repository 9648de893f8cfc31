//! Application layer for the execution bridge.

pub mod bridge;
