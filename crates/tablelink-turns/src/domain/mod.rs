//! Domain layer for the turns context.

pub mod names;
pub mod tracker;
