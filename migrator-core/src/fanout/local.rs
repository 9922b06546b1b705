//! In-process event bus
//!
//! A tokio broadcast channel. Several [`super::NotificationFanout`]s sharing
//! one instance behave like separate processes sharing a pub/sub channel.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::warn;

use super::EventBus;
use crate::error::MigratorResult;
use crate::types::MigrationEvent;

const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast-channel event bus
#[derive(Debug, Clone)]
pub struct LocalEventBus {
    sender: broadcast::Sender<MigrationEvent>,
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn publish(&self, event: &MigrationEvent) -> MigratorResult<()> {
        // no subscribed process is not an error
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    async fn subscribe(&self) -> MigratorResult<BoxStream<'static, MigrationEvent>> {
        let receiver = self.sender.subscribe();
        let events = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(events.boxed())
    }
}
