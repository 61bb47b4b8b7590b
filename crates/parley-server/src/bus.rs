//! Topic-keyed event bus.
//!
//! Every subscriber owns a bounded queue. A full queue drops the event for
//! that subscriber only and remembers how many were dropped; the count is
//! delivered as a [`BusItem::Lagged`] marker as soon as the queue has room
//! again. Closed subscribers are pruned on subscribe and publish.
//!
//! Writers that need events to leave the bus in commit order take the
//! topic's ordering guard ([`EventBus::ordered`]) around persist + publish.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parley_shared::protocol::{BusEvent, EventKind, EventPayload};
use parley_shared::Topic;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::debug;

/// Configuration for [`EventBus`].
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum number of queued items per subscriber.
    pub subscriber_queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: parley_shared::constants::DEFAULT_SUBSCRIBER_QUEUE,
        }
    }
}

/// Items emitted on a subscriber stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusItem {
    Event(Arc<BusEvent>),

    /// The subscriber fell behind and `dropped` events were discarded.
    Lagged { topic: Topic, dropped: u64 },
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
    guards: Arc<std::sync::Mutex<HashMap<Topic, Arc<Mutex<()>>>>>,
    cfg: BusConfig,
}

#[derive(Default)]
struct Inner {
    topics: HashMap<Topic, TopicEntry>,
    /// Last sequence number per topic. Outlives the subscriber list.
    seqs: HashMap<Topic, u64>,
}

#[derive(Default)]
struct TopicEntry {
    subscribers: Vec<Subscriber>,
}

struct Subscriber {
    tx: mpsc::Sender<BusItem>,
    pending_lag: u64,
}

/// Drop idle ordering guards once the map grows past this many topics.
const GUARD_PRUNE_THRESHOLD: usize = 1024;

impl EventBus {
    pub fn new(cfg: BusConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            guards: Arc::new(std::sync::Mutex::new(HashMap::new())),
            cfg,
        }
    }

    /// Subscribe to a topic.
    pub async fn subscribe(&self, topic: Topic) -> mpsc::Receiver<BusItem> {
        let (tx, rx) = mpsc::channel(self.cfg.subscriber_queue_capacity.max(1));

        let mut inner = self.inner.lock().await;
        let entry = inner.topics.entry(topic).or_default();
        entry.subscribers.retain(|s| !s.tx.is_closed());
        entry.subscribers.push(Subscriber { tx, pending_lag: 0 });

        debug!(topic = %topic, subs = entry.subscribers.len(), "bus: subscribed");
        rx
    }

    /// Take the ordering guard of `topic`. Hold it across the store write and
    /// the matching [`publish`](Self::publish).
    pub async fn ordered(&self, topic: Topic) -> OwnedMutexGuard<()> {
        let lock = {
            let mut guards = match self.guards.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if guards.len() > GUARD_PRUNE_THRESHOLD {
                guards.retain(|_, l| Arc::strong_count(l) > 1);
            }
            Arc::clone(guards.entry(topic).or_default())
        };
        lock.lock_owned().await
    }

    /// Publish to every subscriber of `topic`. Returns the event's sequence
    /// number.
    pub async fn publish(&self, topic: Topic, kind: EventKind, payload: EventPayload) -> u64 {
        let mut inner = self.inner.lock().await;

        let seq = {
            let seq = inner.seqs.entry(topic).or_insert(0);
            *seq += 1;
            *seq
        };

        let Some(entry) = inner.topics.get_mut(&topic) else {
            return seq;
        };

        let event = Arc::new(BusEvent {
            topic,
            seq,
            kind,
            payload,
            at: Utc::now(),
        });

        let mut dropped_total: u64 = 0;
        for sub in entry.subscribers.iter_mut() {
            match sub.tx.try_send(BusItem::Event(Arc::clone(&event))) {
                Ok(()) => {
                    if sub.pending_lag > 0
                        && sub
                            .tx
                            .try_send(BusItem::Lagged {
                                topic,
                                dropped: sub.pending_lag,
                            })
                            .is_ok()
                    {
                        sub.pending_lag = 0;
                    }
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    dropped_total += 1;
                    sub.pending_lag = sub.pending_lag.saturating_add(1);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        entry.subscribers.retain(|s| !s.tx.is_closed());
        if entry.subscribers.is_empty() {
            inner.topics.remove(&topic);
        }

        if dropped_total > 0 {
            debug!(
                topic = %topic,
                dropped = dropped_total,
                "bus: dropped due to full subscriber queues"
            );
        }

        seq
    }

    /// Number of live subscribers on a topic.
    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        let inner = self.inner.lock().await;
        inner
            .topics
            .get(&topic)
            .map(|e| e.subscribers.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::{ProfileId, ServerId};

    fn removed(server_id: ServerId) -> EventPayload {
        EventPayload::ServerRemoved { server_id }
    }

    fn seq_of(item: BusItem) -> u64 {
        match item {
            BusItem::Event(e) => e.seq,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fan_out_to_every_subscriber() {
        let bus = EventBus::default();
        let server = ServerId::new();
        let topic = Topic::Server(server);
        let mut a = bus.subscribe(topic).await;
        let mut b = bus.subscribe(topic).await;
        let mut other = bus.subscribe(Topic::Profile(ProfileId::new())).await;

        bus.publish(topic, EventKind::Delete, removed(server)).await;

        assert_eq!(seq_of(a.recv().await.unwrap()), 1);
        assert_eq!(seq_of(b.recv().await.unwrap()), 1);
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn seq_is_monotonic_without_subscribers() {
        let bus = EventBus::default();
        let server = ServerId::new();
        let topic = Topic::Server(server);
        assert_eq!(bus.publish(topic, EventKind::Update, removed(server)).await, 1);
        assert_eq!(bus.publish(topic, EventKind::Update, removed(server)).await, 2);

        let mut rx = bus.subscribe(topic).await;
        bus.publish(topic, EventKind::Update, removed(server)).await;
        assert_eq!(seq_of(rx.recv().await.unwrap()), 3);
    }

    #[tokio::test]
    async fn full_queue_reports_lag() {
        let bus = EventBus::new(BusConfig {
            subscriber_queue_capacity: 2,
        });
        let server = ServerId::new();
        let topic = Topic::Server(server);
        let mut rx = bus.subscribe(topic).await;

        for _ in 0..4 {
            bus.publish(topic, EventKind::Update, removed(server)).await;
        }
        // Queue held seq 1 and 2; 3 and 4 were dropped.
        assert_eq!(seq_of(rx.recv().await.unwrap()), 1);
        assert_eq!(seq_of(rx.recv().await.unwrap()), 2);

        bus.publish(topic, EventKind::Update, removed(server)).await;
        assert_eq!(seq_of(rx.recv().await.unwrap()), 5);
        assert_eq!(
            rx.recv().await.unwrap(),
            BusItem::Lagged { topic, dropped: 2 }
        );
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let bus = EventBus::default();
        let server = ServerId::new();
        let topic = Topic::Server(server);
        let rx = bus.subscribe(topic).await;
        let _keep = bus.subscribe(topic).await;
        assert_eq!(bus.subscriber_count(topic).await, 2);

        drop(rx);
        bus.publish(topic, EventKind::Update, removed(server)).await;
        assert_eq!(bus.subscriber_count(topic).await, 1);
    }

    #[tokio::test]
    async fn ordering_guard_serializes_writers() {
        let bus = EventBus::default();
        let topic = Topic::Server(ServerId::new());
        let guard = bus.ordered(topic).await;

        let bus2 = bus.clone();
        let waiter = tokio::spawn(async move {
            let _g = bus2.ordered(topic).await;
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }
}
