//! Low-latency broadcast port.
//!
//! The broadcast layer only accelerates delivery: every record it announces
//! has already been written durably, so a subscriber that misses a message
//! still finds the record on its next poll.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::RelayError;

/// Topic name for a pairing's broadcast channel.
#[must_use]
pub fn topic_for(pairing_id: Uuid) -> String {
    format!("relay_{}", pairing_id.simple())
}

/// Per-pairing announce/subscribe channel carrying record ids.
#[async_trait]
pub trait RelayBroadcast: Send + Sync {
    /// Announce that `record_id` is waiting on `pairing_id`.
    async fn announce(&self, pairing_id: Uuid, record_id: Uuid) -> Result<(), RelayError>;

    /// Subscribe to announcements for one pairing. The stream ends when the
    /// underlying channel closes.
    async fn subscribe(&self, pairing_id: Uuid) -> Result<BoxStream<'static, Uuid>, RelayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_is_stable_and_identifier_safe() {
        let pairing_id = Uuid::parse_str("6f1c2a9e-3b7d-4e2f-9a01-5c6d7e8f9a0b").unwrap();

        let topic = topic_for(pairing_id);

        assert_eq!(topic, "relay_6f1c2a9e3b7d4e2f9a015c6d7e8f9a0b");
        assert!(topic.len() < 63);
        assert!(topic.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }
}
