//! Redis pub/sub event bus
//!
//! Events are JSON payloads on a single channel (`<prefix>migration:events`).
//! Each subscribing process opens its own pub/sub connection.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use tracing::warn;

use super::EventBus;
use crate::error::{MigratorError, MigratorResult};
use crate::types::MigrationEvent;

/// Event bus over redis PUBLISH/SUBSCRIBE
#[derive(Clone)]
pub struct RedisEventBus {
    client: redis::Client,
    conn: MultiplexedConnection,
    channel: String,
}

impl RedisEventBus {
    pub async fn connect(url: &str, channel: impl Into<String>) -> MigratorResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| MigratorError::Configuration(format!("invalid redis url: {}", e)))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| MigratorError::EventBus(e.to_string()))?;
        Ok(Self {
            client,
            conn,
            channel: channel.into(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

fn decode(payload: &str) -> Option<MigrationEvent> {
    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "dropping malformed migration event");
            None
        }
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: &MigrationEvent) -> MigratorResult<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        let _receivers: i64 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| MigratorError::EventBus(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self) -> MigratorResult<BoxStream<'static, MigrationEvent>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| MigratorError::EventBus(e.to_string()))?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| MigratorError::EventBus(e.to_string()))?;

        let events = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => decode(&payload),
                Err(e) => {
                    warn!(error = %e, "dropping non-text pub/sub payload");
                    None
                }
            }
        });
        Ok(events.boxed())
    }
}
