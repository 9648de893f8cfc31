//! Tablelink Store — `PostgreSQL` persistence for the relay.
//!
//! Implements the `RelayStore` port over a `PgPool`, the `RelayBroadcast`
//! port over `pg_notify`/`LISTEN`, and a retrying decorator that absorbs
//! transient transport failures.

pub mod error;
pub mod pg_broadcast;
pub mod pg_relay_store;
pub mod retrying;
pub mod schema;
