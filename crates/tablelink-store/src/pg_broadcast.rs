//! `pg_notify`-backed implementation of the `RelayBroadcast` trait.
//!
//! Each pairing gets its own channel (`relay_<pairing uuid>`); the payload
//! is the record id. Notifications are a wake-up hint only, the record row
//! is always written first.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tablelink_core::broadcast::{RelayBroadcast, topic_for};
use tablelink_core::error::RelayError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::map_sqlx_error;

/// Broadcast layer over `PostgreSQL` `NOTIFY`/`LISTEN`.
#[derive(Debug, Clone)]
pub struct PgNotifyBroadcast {
    pool: PgPool,
}

impl PgNotifyBroadcast {
    /// Creates a new `PgNotifyBroadcast` sharing the store's pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RelayBroadcast for PgNotifyBroadcast {
    async fn announce(&self, pairing_id: Uuid, record_id: Uuid) -> Result<(), RelayError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(topic_for(pairing_id))
            .bind(record_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        debug!(%pairing_id, %record_id, "record announced");
        Ok(())
    }

    async fn subscribe(&self, pairing_id: Uuid) -> Result<BoxStream<'static, Uuid>, RelayError> {
        let topic = topic_for(pairing_id);
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        listener.listen(&topic).await.map_err(map_sqlx_error)?;
        debug!(%pairing_id, topic, "listening for record announcements");

        let notifications = stream::unfold(listener, |mut listener| async move {
            match listener.recv().await {
                Ok(notification) => Some((notification, listener)),
                Err(err) => {
                    warn!(error = %err, "record announcement listener closed");
                    None
                }
            }
        });
        Ok(notifications
            .filter_map(|notification| async move { Uuid::parse_str(notification.payload()).ok() })
            .boxed())
    }
}
