//! Notification fanout
//!
//! Turns "token state changed" events into messages for every client
//! connection subscribed to that mint, across all server processes.
//!
//! Each process keeps a registry of per-mint broadcast slots for its own
//! connections. Events travel between processes over an [`EventBus`]; a relay
//! task per process forwards everything it hears on the bus into the local
//! registry. Delivery is at-most-once: a subscriber that is not connected, or
//! falls too far behind, misses the event and is expected to re-fetch state.
//! The same holds across a bus reconnect: the relay resubscribes with backoff
//! when the bus stream ends, and events published in the gap are lost.
//!
//! A per-mint slot lives only while it has subscribers. Dropping the last
//! [`Subscription`] removes it.

pub mod local;
pub mod redis;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::MigratorResult;
use crate::types::{MigrationEvent, Mint};

/// Cross-process event transport
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Send an event to every subscribed process
    async fn publish(&self, event: &MigrationEvent) -> MigratorResult<()>;

    /// Stream of events published after this call returns
    async fn subscribe(&self) -> MigratorResult<BoxStream<'static, MigrationEvent>>;
}

/// Default buffer of each per-mint slot
pub const DEFAULT_SLOT_CAPACITY: usize = 64;

const RESUBSCRIBE_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const RESUBSCRIBE_MAX_BACKOFF: Duration = Duration::from_secs(30);

type Registry = Arc<RwLock<HashMap<Mint, broadcast::Sender<MigrationEvent>>>>;

/// Per-process fanout: local subscription registry plus the shared bus
#[derive(Clone)]
pub struct NotificationFanout {
    bus: Arc<dyn EventBus>,
    registry: Registry,
    slot_capacity: usize,
}

impl NotificationFanout {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self::with_capacity(bus, DEFAULT_SLOT_CAPACITY)
    }

    pub fn with_capacity(bus: Arc<dyn EventBus>, slot_capacity: usize) -> Self {
        Self {
            bus,
            registry: Arc::new(RwLock::new(HashMap::new())),
            slot_capacity: slot_capacity.max(1),
        }
    }

    /// Publish once on the bus; local subscribers receive it through the relay
    pub async fn publish(&self, event: &MigrationEvent) -> MigratorResult<()> {
        debug!(mint = %event.mint, status = %event.status, "publishing migration event");
        self.bus.publish(event).await
    }

    /// Register interest in a mint's events
    pub async fn subscribe(&self, mint: &Mint) -> Subscription {
        let mut registry = self.registry.write().await;
        // slots whose last subscriber dropped while the registry was busy
        registry.retain(|_, sender| sender.receiver_count() > 0);
        let sender = registry
            .entry(mint.clone())
            .or_insert_with(|| broadcast::channel(self.slot_capacity).0);
        Subscription {
            mint: mint.clone(),
            receiver: sender.subscribe(),
            registry: self.registry.clone(),
        }
    }

    /// Hand an event to this process's subscribers; returns how many got it
    pub async fn deliver_local(&self, event: &MigrationEvent) -> usize {
        let delivered = {
            let registry = self.registry.read().await;
            match registry.get(&event.mint) {
                Some(sender) => sender.send(event.clone()).unwrap_or(0),
                None => return 0,
            }
        };
        if delivered == 0 {
            self.prune(&event.mint).await;
        }
        delivered
    }

    /// Local subscribers currently registered for `mint`
    pub async fn subscriber_count(&self, mint: &Mint) -> usize {
        self.registry
            .read()
            .await
            .get(mint)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    async fn prune(&self, mint: &Mint) {
        let mut registry = self.registry.write().await;
        if registry
            .get(mint)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            registry.remove(mint);
        }
    }

    /// Start forwarding bus events into the local registry
    ///
    /// The bus subscription is established before this returns, so events
    /// published afterwards are not missed. If the bus stream later ends the
    /// relay keeps resubscribing, backing off up to 30s between attempts,
    /// until it is stopped.
    pub async fn start_relay(&self) -> MigratorResult<RelayHandle> {
        let mut events = self.bus.subscribe().await?;
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let fanout = self.clone();

        let task = tokio::spawn(async move {
            info!("event relay started");
            let mut backoff = RESUBSCRIBE_INITIAL_BACKOFF;
            'relay: loop {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break 'relay,
                        next = events.next() => {
                            match next {
                                Some(event) => {
                                    backoff = RESUBSCRIBE_INITIAL_BACKOFF;
                                    let delivered = fanout.deliver_local(&event).await;
                                    debug!(mint = %event.mint, delivered, "relayed migration event");
                                }
                                None => {
                                    warn!("event bus stream ended, resubscribing");
                                    break;
                                }
                            }
                        }
                    }
                }

                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break 'relay,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    match fanout.bus.subscribe().await {
                        Ok(stream) => {
                            info!("event relay resubscribed");
                            events = stream;
                            break;
                        }
                        Err(e) => {
                            backoff = (backoff * 2).min(RESUBSCRIBE_MAX_BACKOFF);
                            warn!(
                                error = %e,
                                retry_in_ms = backoff.as_millis() as u64,
                                "event bus resubscribe failed"
                            );
                        }
                    }
                }
                backoff = (backoff * 2).min(RESUBSCRIBE_MAX_BACKOFF);
            }
            info!("event relay shutting down");
        });

        Ok(RelayHandle { shutdown_tx, task })
    }
}

/// Handle to a running relay task
pub struct RelayHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Stop the relay and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// A connection's subscription to one mint
pub struct Subscription {
    mint: Mint,
    receiver: broadcast::Receiver<MigrationEvent>,
    registry: Registry,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // a busy registry is left to the sweep in `subscribe`
        if let Ok(mut registry) = self.registry.try_write() {
            // this receiver is still alive here
            if registry
                .get(&self.mint)
                .is_some_and(|sender| sender.receiver_count() <= 1)
            {
                registry.remove(&self.mint);
            }
        }
    }
}

impl Subscription {
    pub fn mint(&self) -> &Mint {
        &self.mint
    }

    /// Next event, skipping anything missed while lagging; `None` once closed
    pub async fn recv(&mut self) -> Option<MigrationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(mint = %self.mint, skipped, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

pub use self::redis::RedisEventBus;
pub use local::LocalEventBus;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TokenMigrationRecord, TokenStatus, Workflow};
    use chrono::Utc;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    /// First subscription ends immediately, later ones are live
    struct FlakyBus {
        inner: LocalEventBus,
        subscribes: AtomicUsize,
    }

    #[async_trait]
    impl EventBus for FlakyBus {
        async fn publish(&self, event: &MigrationEvent) -> MigratorResult<()> {
            self.inner.publish(event).await
        }

        async fn subscribe(&self) -> MigratorResult<BoxStream<'static, MigrationEvent>> {
            let events = if self.subscribes.load(Ordering::SeqCst) == 0 {
                stream::empty::<MigrationEvent>().boxed()
            } else {
                self.inner.subscribe().await?
            };
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            Ok(events)
        }
    }

    fn event(mint: &str, status: TokenStatus) -> MigrationEvent {
        let mut record = TokenMigrationRecord::locked(mint, Utc::now());
        record.status = status;
        MigrationEvent::from_record(&record, &Workflow::standard(), None)
    }

    #[tokio::test]
    async fn test_event_reaches_subscriber_in_other_process() {
        let bus: Arc<dyn EventBus> = Arc::new(LocalEventBus::new());
        let worker_process = NotificationFanout::new(bus.clone());
        let api_process = NotificationFanout::new(bus);
        let relay = api_process.start_relay().await.unwrap();

        let mut sub = api_process.subscribe(&Mint::from("M1")).await;
        worker_process
            .publish(&event("M1", TokenStatus::Migrating))
            .await
            .unwrap();

        let received = timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap();
        assert_eq!(received.mint, Mint::from("M1"));
        assert_eq!(received.status, TokenStatus::Migrating);
        relay.stop().await;
    }

    #[tokio::test]
    async fn test_events_only_reach_matching_mint() {
        let fanout = NotificationFanout::new(Arc::new(LocalEventBus::new()));
        let mut m1 = fanout.subscribe(&Mint::from("M1")).await;
        let _m2 = fanout.subscribe(&Mint::from("M2")).await;

        assert_eq!(fanout.deliver_local(&event("M2", TokenStatus::Migrated)).await, 1);
        assert_eq!(fanout.deliver_local(&event("M1", TokenStatus::Migrated)).await, 1);
        assert_eq!(m1.recv().await.unwrap().mint, Mint::from("M1"));
    }

    #[tokio::test]
    async fn test_slot_pruned_after_disconnect() {
        let fanout = NotificationFanout::new(Arc::new(LocalEventBus::new()));
        let mint = Mint::from("M1");
        let sub = fanout.subscribe(&mint).await;
        assert_eq!(fanout.subscriber_count(&mint).await, 1);
        drop(sub);

        // no event needed to release the slot
        assert!(fanout.registry.read().await.is_empty());
        // no replay for a disconnected client
        assert_eq!(fanout.deliver_local(&event("M1", TokenStatus::Migrated)).await, 0);
        assert_eq!(fanout.subscriber_count(&mint).await, 0);
    }

    #[tokio::test]
    async fn test_slot_survives_while_other_subscribers_remain() {
        let fanout = NotificationFanout::new(Arc::new(LocalEventBus::new()));
        let mint = Mint::from("M1");
        let first = fanout.subscribe(&mint).await;
        let mut second = fanout.subscribe(&mint).await;
        drop(first);
        assert_eq!(fanout.subscriber_count(&mint).await, 1);

        assert_eq!(fanout.deliver_local(&event("M1", TokenStatus::Migrated)).await, 1);
        assert_eq!(second.recv().await.unwrap().status, TokenStatus::Migrated);
    }

    #[tokio::test]
    async fn test_unused_subscriptions_do_not_accumulate() {
        let fanout = NotificationFanout::new(Arc::new(LocalEventBus::new()));
        for i in 0..100 {
            let _sub = fanout.subscribe(&Mint::from(format!("M{}", i).as_str())).await;
        }
        assert!(fanout.registry.read().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_resubscribes_after_stream_ends() {
        let bus = Arc::new(FlakyBus {
            inner: LocalEventBus::new(),
            subscribes: AtomicUsize::new(0),
        });
        let fanout = NotificationFanout::new(bus.clone());
        let relay = fanout.start_relay().await.unwrap();

        while bus.subscribes.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(relay.is_running());

        let mut sub = fanout.subscribe(&Mint::from("M1")).await;
        bus.publish(&event("M1", TokenStatus::Migrating)).await.unwrap();
        let received = timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap();
        assert_eq!(received.status, TokenStatus::Migrating);
        relay.stop().await;
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let fanout = NotificationFanout::with_capacity(Arc::new(LocalEventBus::new()), 2);
        let mint = Mint::from("M1");
        let mut sub = fanout.subscribe(&mint).await;

        for status in [TokenStatus::Locked, TokenStatus::Migrating, TokenStatus::Migrated] {
            fanout.deliver_local(&event("M1", status)).await;
        }

        // oldest event was overwritten
        assert_eq!(sub.recv().await.unwrap().status, TokenStatus::Migrating);
        assert_eq!(sub.recv().await.unwrap().status, TokenStatus::Migrated);
    }
}
