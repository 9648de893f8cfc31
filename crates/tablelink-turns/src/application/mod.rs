//! Application layer for the turns context.

pub mod announcements;
pub mod ingestion;
pub mod notifier;
pub mod session;
