//! Signal bus - publish/subscribe routing of events and signals.
//!
//! Every subscriber owns a named mailbox backed by an unbounded channel, so
//! a slow or failed subscriber never blocks the publisher or its peers.
//! Each delivery carries its publisher and a per-publisher sequence number;
//! a publisher that publishes from one task gets per-publisher FIFO at every
//! subscriber. There is no total order across publishers.

pub mod filter;

pub use filter::MessageFilter;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use skylark_types::{AgentKind, Event, Signal};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace, warn};

use crate::config::BusConfig;
use crate::types::BusError;

/// Who published a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Publisher {
    Ingress,
    Agent(AgentKind),
}

impl std::fmt::Display for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Publisher::Ingress => f.write_str("ingress"),
            Publisher::Agent(kind) => write!(f, "agent:{}", kind),
        }
    }
}

/// A message on the bus. Shared, never mutated after publish.
#[derive(Debug, Clone)]
pub enum BusMessage {
    Event(Arc<Event>),
    Signal(Arc<Signal>),
}

impl BusMessage {
    pub fn event(event: Event) -> Self {
        BusMessage::Event(Arc::new(event))
    }

    pub fn signal(signal: Signal) -> Self {
        BusMessage::Signal(Arc::new(signal))
    }

    fn label(&self) -> &'static str {
        match self {
            BusMessage::Event(e) => e.event_type.as_str(),
            BusMessage::Signal(s) => s.kind.as_str(),
        }
    }
}

/// One message delivered to one subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub publisher: Publisher,
    /// Position in the publisher's stream, starting at 1
    pub publisher_seq: u64,
    pub message: BusMessage,
}

/// Receiving end of a subscription.
pub struct Mailbox {
    name: String,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Mailbox {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next delivery; `None` once detached and drained.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Next delivery if one is already queued.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }
}

struct Subscriber {
    tx: mpsc::UnboundedSender<Delivery>,
    filter: MessageFilter,
}

/// Bus counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub subscribers: usize,
}

/// The signal bus.
pub struct SignalBus {
    config: BusConfig,
    subscribers: RwLock<HashMap<String, Subscriber>>,
    sequences: DashMap<Publisher, u64>,
    closed: AtomicBool,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self {
            config,
            subscribers: RwLock::new(HashMap::new()),
            sequences: DashMap::new(),
            closed: AtomicBool::new(false),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Attach a named mailbox with an empty filter.
    pub async fn attach(&self, name: impl Into<String>) -> Result<Mailbox, BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let name = name.into();
        let mut subscribers = self.subscribers.write().await;
        if subscribers.contains_key(&name) {
            return Err(BusError::AlreadyAttached(name));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        subscribers.insert(
            name.clone(),
            Subscriber {
                tx,
                filter: MessageFilter::none(),
            },
        );
        debug!(subscriber = %name, "Mailbox attached");
        Ok(Mailbox { name, rx })
    }

    /// Detach a mailbox. Queued deliveries stay readable. Returns false if unknown.
    pub async fn detach(&self, name: &str) -> bool {
        let removed = self.subscribers.write().await.remove(name).is_some();
        if removed {
            debug!(subscriber = %name, "Mailbox detached");
        }
        removed
    }

    /// Add `filter` to a subscriber's interest. Idempotent.
    pub async fn subscribe(&self, name: &str, filter: &MessageFilter) -> Result<(), BusError> {
        let mut subscribers = self.subscribers.write().await;
        let subscriber = subscribers
            .get_mut(name)
            .ok_or_else(|| BusError::UnknownSubscriber(name.to_string()))?;
        subscriber.filter.union(filter);
        Ok(())
    }

    /// Remove `filter` from a subscriber's interest. Idempotent.
    pub async fn unsubscribe(&self, name: &str, filter: &MessageFilter) -> Result<(), BusError> {
        let mut subscribers = self.subscribers.write().await;
        let subscriber = subscribers
            .get_mut(name)
            .ok_or_else(|| BusError::UnknownSubscriber(name.to_string()))?;
        subscriber.filter.subtract(filter);
        Ok(())
    }

    /// Current filter of a subscriber.
    pub async fn filter_of(&self, name: &str) -> Option<MessageFilter> {
        self.subscribers
            .read()
            .await
            .get(name)
            .map(|s| s.filter.clone())
    }

    /// Deliver a message to every matching subscriber.
    ///
    /// Returns the number of mailboxes that accepted it. A closed mailbox is
    /// logged and skipped; delivery to the others continues.
    pub async fn publish(&self, publisher: Publisher, message: BusMessage) -> Result<usize, BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let subscribers = self.subscribers.read().await;
        let publisher_seq = {
            let mut seq = self.sequences.entry(publisher).or_insert(0);
            *seq += 1;
            *seq
        };
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        for (name, subscriber) in subscribers.iter() {
            if !subscriber.filter.matches(&message) {
                continue;
            }
            let delivery = Delivery {
                publisher,
                publisher_seq,
                message: message.clone(),
            };
            match subscriber.tx.send(delivery) {
                Ok(()) => {
                    delivered += 1;
                    if self.config.trace_deliveries {
                        trace!(
                            subscriber = %name,
                            publisher = %publisher,
                            seq = publisher_seq,
                            message = message.label(),
                            "Delivered"
                        );
                    }
                }
                Err(_) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscriber = %name,
                        message = message.label(),
                        "Mailbox closed, delivery skipped"
                    );
                }
            }
        }
        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        Ok(delivered)
    }

    /// Refuse further publishes and drop all subscriptions.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.write().await.clear();
    }

    pub async fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            subscribers: self.subscribers.read().await.len(),
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use skylark_types::{SignalKind, UserId};

    fn signal(kind: SignalKind) -> BusMessage {
        BusMessage::signal(Signal::new(
            AgentKind::BehaviorMonitoring,
            UserId::from("u-1"),
            kind,
            0.5,
            Utc::now(),
        ))
    }

    #[tokio::test]
    async fn test_filtered_delivery() {
        let bus = SignalBus::new();
        let mut risk = bus.attach("risk").await.unwrap();
        let mut cohort = bus.attach("cohort").await.unwrap();
        bus.subscribe("risk", &MessageFilter::signals([SignalKind::DisengagementRisk]))
            .await
            .unwrap();
        bus.subscribe("cohort", &MessageFilter::signals([SignalKind::CohortMatch]))
            .await
            .unwrap();

        let publisher = Publisher::Agent(AgentKind::BehaviorMonitoring);
        let count = bus.publish(publisher, signal(SignalKind::DisengagementRisk)).await.unwrap();

        assert_eq!(count, 1);
        assert!(risk.try_recv().is_some());
        assert!(cohort.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let bus = SignalBus::new();
        let mut mailbox = bus.attach("a").await.unwrap();
        let filter = MessageFilter::signals([SignalKind::StreakBroken]);
        bus.subscribe("a", &filter).await.unwrap();
        bus.subscribe("a", &filter).await.unwrap();

        bus.publish(Publisher::Ingress, signal(SignalKind::StreakBroken)).await.unwrap();
        assert!(mailbox.try_recv().is_some());
        assert!(mailbox.try_recv().is_none());

        bus.unsubscribe("a", &filter).await.unwrap();
        bus.unsubscribe("a", &filter).await.unwrap();
        assert!(bus.filter_of("a").await.unwrap().is_empty());
        assert_eq!(bus.publish(Publisher::Ingress, signal(SignalKind::StreakBroken)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_per_publisher_sequence() {
        let bus = SignalBus::new();
        let mut mailbox = bus.attach("all").await.unwrap();
        bus.subscribe("all", &MessageFilter::all_signals()).await.unwrap();

        let a = Publisher::Agent(AgentKind::Evolution);
        let b = Publisher::Agent(AgentKind::HabitFormation);
        bus.publish(a, signal(SignalKind::StrategyAdjustment)).await.unwrap();
        bus.publish(b, signal(SignalKind::StreakBroken)).await.unwrap();
        bus.publish(a, signal(SignalKind::StrategyAdjustment)).await.unwrap();

        let seqs: Vec<(Publisher, u64)> = std::iter::from_fn(|| mailbox.try_recv())
            .map(|d| (d.publisher, d.publisher_seq))
            .collect();
        assert_eq!(seqs, vec![(a, 1), (b, 1), (a, 2)]);
    }

    #[tokio::test]
    async fn test_closed_mailbox_is_skipped() {
        let bus = SignalBus::new();
        let dead = bus.attach("dead").await.unwrap();
        let mut live = bus.attach("live").await.unwrap();
        bus.subscribe("dead", &MessageFilter::all_signals()).await.unwrap();
        bus.subscribe("live", &MessageFilter::all_signals()).await.unwrap();
        drop(dead);

        let count = bus.publish(Publisher::Ingress, signal(SignalKind::CohortMatch)).await.unwrap();
        assert_eq!(count, 1);
        assert!(live.try_recv().is_some());
        assert_eq!(bus.stats().await.dropped, 1);
    }

    #[tokio::test]
    async fn test_unknown_subscriber() {
        let bus = SignalBus::new();
        let result = bus.subscribe("ghost", &MessageFilter::all_events()).await;
        assert!(matches!(result, Err(BusError::UnknownSubscriber(_))));
        assert!(bus.attach("x").await.is_ok());
        assert!(matches!(bus.attach("x").await, Err(BusError::AlreadyAttached(_))));
    }
}
