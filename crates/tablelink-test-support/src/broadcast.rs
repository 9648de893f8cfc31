//! In-process broadcast — a `RelayBroadcast` over tokio broadcast channels.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tablelink_core::broadcast::RelayBroadcast;
use tablelink_core::error::RelayError;
use tokio::sync::broadcast;
use uuid::Uuid;

const CAPACITY: usize = 64;

/// One tokio broadcast channel per pairing, created on first use.
///
/// `announced` keeps every announcement so tests can assert on them even
/// when nobody was subscribed.
#[derive(Debug, Default)]
pub struct InProcessBroadcast {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<Uuid>>>,
    announced: Mutex<Vec<(Uuid, Uuid)>>,
    offline: bool,
}

impl InProcessBroadcast {
    /// Create a broadcast with no channels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A broadcast whose every call fails with a transport error.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    /// Every `(pairing_id, record_id)` announced so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn announced(&self) -> Vec<(Uuid, Uuid)> {
        self.announced.lock().unwrap().clone()
    }

    fn sender(&self, pairing_id: Uuid) -> broadcast::Sender<Uuid> {
        self.channels
            .lock()
            .unwrap()
            .entry(pairing_id)
            .or_insert_with(|| broadcast::channel(CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl RelayBroadcast for InProcessBroadcast {
    async fn announce(&self, pairing_id: Uuid, record_id: Uuid) -> Result<(), RelayError> {
        if self.offline {
            return Err(RelayError::Transport("broadcast channel offline".into()));
        }
        self.announced.lock().unwrap().push((pairing_id, record_id));
        // No subscribers is not an error.
        let _ = self.sender(pairing_id).send(record_id);
        Ok(())
    }

    async fn subscribe(&self, pairing_id: Uuid) -> Result<BoxStream<'static, Uuid>, RelayError> {
        if self.offline {
            return Err(RelayError::Transport("broadcast channel offline".into()));
        }
        let receiver = self.sender(pairing_id).subscribe();
        let stream = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(record_id) => return Some((record_id, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}
