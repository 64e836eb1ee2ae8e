//! Event Bus - topic-based publish/subscribe with per-subscriber queues

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::event::{Event, EventOrigin, Payload};
use super::handler::EventHandler;
use crate::config::BusConfig;
use crate::metrics::MetricsService;

/// What `publish` does when a subscriber queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for queue space. Publishers slow down to the slowest subscriber.
    #[default]
    Block,
    /// Drop the event for that subscriber and count it as lost.
    Drop,
}

/// Event bus errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus has been shut down.
    #[error("Event bus is closed")]
    Closed,

    /// Topic names must be non-empty.
    #[error("Invalid topic '{0}'")]
    InvalidTopic(String),
}

/// Receives locally published events for external delivery.
///
/// `forward` is called on the publish path and must not block.
pub trait EventForwarder: Send + Sync {
    /// Whether events on this topic should be forwarded.
    fn accepts(&self, topic: &str) -> bool;

    /// Hand an event over for forwarding.
    fn forward(&self, event: Arc<Event>);
}

// ========== Bus Statistics ==========

/// Statistics for the event bus.
#[derive(Debug, Default)]
pub struct BusStats {
    /// Events published locally.
    pub published: AtomicU64,
    /// Events ingested from the bridge.
    pub ingested: AtomicU64,
    /// Events handed to a handler.
    pub delivered: AtomicU64,
    /// Events dropped on a full subscriber queue.
    pub dropped: AtomicU64,
    /// Handler invocations that returned an error or panicked.
    pub handler_failures: AtomicU64,
    /// Events handed to the forwarder.
    pub forwarded: AtomicU64,
}

impl BusStats {
    /// Record a local publish.
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a bridge ingest.
    pub fn record_ingested(&self) {
        self.ingested.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delivery.
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dropped event.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handler failure.
    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a forwarded event.
    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> BusStatsSnapshot {
        BusStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            ingested: self.ingested.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`BusStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BusStatsSnapshot {
    pub published: u64,
    pub ingested: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub handler_failures: u64,
    pub forwarded: u64,
}

// ========== Subscriptions ==========

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    topic: String,
}

impl Subscription {
    /// Subscription id, unique per bus.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

struct Subscriber {
    id: u64,
    handler_name: String,
    active: Arc<AtomicBool>,
    sender: mpsc::Sender<Arc<Event>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Subscriber {
    fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

#[derive(Default)]
struct TopicSubscribers {
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
}

// ========== Event Bus ==========

/// The Event Bus
///
/// Each subscriber owns a bounded queue drained by a dedicated worker task,
/// so a slow handler never delays other subscribers and events reach each
/// subscriber in publish order.
pub struct EventBus {
    queue_capacity: usize,
    overflow_policy: OverflowPolicy,
    /// Subscribers by topic. Entries are never removed.
    topics: RwLock<HashMap<String, Arc<TopicSubscribers>>>,
    forwarder: RwLock<Option<Arc<dyn EventForwarder>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    stats: Arc<BusStats>,
    metrics: Arc<MetricsService>,
}

impl EventBus {
    /// Create a bus.
    pub fn new(config: BusConfig) -> Self {
        Self::with_metrics(config, Arc::new(MetricsService::disabled()))
    }

    /// Create a bus that records metrics.
    pub fn with_metrics(config: BusConfig, metrics: Arc<MetricsService>) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            overflow_policy: config.overflow_policy,
            topics: RwLock::new(HashMap::new()),
            forwarder: RwLock::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            stats: Arc::new(BusStats::default()),
            metrics,
        }
    }

    /// Subscribe a handler to a topic.
    ///
    /// The handler receives every event published on `topic` after this call
    /// returns. Must be called within a Tokio runtime.
    pub fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Subscription, BusError> {
        validate_topic(topic)?;
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let active = Arc::new(AtomicBool::new(true));
        let handler_name = handler.name().to_string();

        let worker = tokio::spawn(run_worker(
            receiver,
            handler,
            active.clone(),
            self.stats.clone(),
            self.metrics.clone(),
        ));

        debug!(
            "Subscription #{} on '{}' for handler '{}'",
            id, topic, handler_name
        );

        let subscriber = Arc::new(Subscriber {
            id,
            handler_name,
            active,
            sender,
            worker: Mutex::new(Some(worker)),
        });

        let entry = self.topic_entry(topic);
        entry
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(subscriber);

        Ok(Subscription {
            id,
            topic: topic.to_string(),
        })
    }

    /// Remove a subscription.
    ///
    /// A delivery already running completes; nothing further is dispatched to
    /// the handler once this returns. Returns `false` if the subscription was
    /// not found.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        match self.remove_subscriber(subscription) {
            Some(subscriber) => {
                // The worker exits once the last sender clone is dropped.
                drop(subscriber.take_worker());
                true
            }
            None => false,
        }
    }

    /// Remove a subscription and wait for its in-flight delivery to finish.
    pub async fn unsubscribe_and_drain(&self, subscription: &Subscription) -> bool {
        let Some(subscriber) = self.remove_subscriber(subscription) else {
            return false;
        };

        let worker = subscriber.take_worker();
        drop(subscriber);
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Subscriber worker #{} ended abnormally: {}", subscription.id, e);
            }
        }
        true
    }

    /// Publish an event from local code.
    ///
    /// Returns once the event is queued for every current subscriber of the
    /// topic; handlers run asynchronously. Under [`OverflowPolicy::Block`] this
    /// waits for space in full queues.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Payload,
        source_plugin_id: Option<String>,
    ) -> Result<Arc<Event>, BusError> {
        validate_topic(topic)?;
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let event = Arc::new(Event::new(topic, payload, source_plugin_id));
        self.stats.record_published();
        self.metrics.event_published(topic);

        self.dispatch(&event).await;
        self.forward(&event);

        Ok(event)
    }

    /// Publish without waiting for queue space, whatever the overflow policy.
    ///
    /// A full subscriber queue drops the event for that subscriber and counts
    /// it in `dropped`. Used on paths that must never stall behind a slow
    /// handler.
    pub fn try_publish(
        &self,
        topic: &str,
        payload: Payload,
        source_plugin_id: Option<String>,
    ) -> Result<Arc<Event>, BusError> {
        validate_topic(topic)?;
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let event = Arc::new(Event::new(topic, payload, source_plugin_id));
        self.stats.record_published();
        self.metrics.event_published(topic);

        for subscriber in self.snapshot(topic) {
            self.offer(&subscriber, &event);
        }
        self.forward(&event);

        Ok(event)
    }

    /// Deliver an event received from the bridge.
    ///
    /// The event keeps its original id and is never forwarded again.
    pub async fn ingest(&self, mut event: Event) -> Result<Arc<Event>, BusError> {
        validate_topic(&event.topic)?;
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        event.origin = EventOrigin::Bridge;
        let event = Arc::new(event);
        self.stats.record_ingested();
        self.metrics.event_published(&event.topic);

        self.dispatch(&event).await;
        Ok(event)
    }

    /// Install the forwarder that receives locally published events.
    pub fn set_forwarder(&self, forwarder: Arc<dyn EventForwarder>) {
        *self.forwarder.write().unwrap_or_else(|e| e.into_inner()) = Some(forwarder);
    }

    /// Remove the forwarder.
    pub fn clear_forwarder(&self) {
        *self.forwarder.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Whether a forwarder is installed.
    pub fn has_forwarder(&self) -> bool {
        self.forwarder
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Stop accepting events, deliver what is queued and wait for every
    /// worker to finish.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.clear_forwarder();

        let entries: Vec<Arc<TopicSubscribers>> = {
            let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
            topics.values().cloned().collect()
        };

        let mut workers = Vec::new();
        for entry in entries {
            let removed: Vec<Arc<Subscriber>> = entry
                .subscribers
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .drain(..)
                .collect();
            workers.extend(removed.iter().filter_map(|s| s.take_worker()));
        }

        let count = workers.len();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Subscriber worker ended abnormally: {}", e);
            }
        }
        info!("Event bus shut down ({} subscribers drained)", count);
    }

    /// Whether the bus has been shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of subscribers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        topics
            .get(topic)
            .map(|entry| {
                entry
                    .subscribers
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .len()
            })
            .unwrap_or(0)
    }

    /// Topics that currently have subscribers, sorted.
    pub fn topics(&self) -> Vec<String> {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = topics
            .iter()
            .filter(|(_, entry)| {
                !entry
                    .subscribers
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .is_empty()
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Bus statistics.
    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    /// Configured overflow policy.
    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow_policy
    }

    /// Per-subscriber queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    async fn dispatch(&self, event: &Arc<Event>) {
        let subscribers = self.snapshot(&event.topic);
        trace!(
            "Dispatching event {} on '{}' to {} subscribers",
            event.event_id,
            event.topic,
            subscribers.len()
        );

        for subscriber in subscribers {
            match self.overflow_policy {
                OverflowPolicy::Block => {
                    if subscriber.sender.send(event.clone()).await.is_err() {
                        debug!("Subscriber #{} worker is gone", subscriber.id);
                    }
                }
                OverflowPolicy::Drop => self.offer(&subscriber, event),
            }
        }
    }

    /// Queue an event if there is room, otherwise drop and count it.
    fn offer(&self, subscriber: &Subscriber, event: &Arc<Event>) {
        match subscriber.sender.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.record_dropped();
                self.metrics.event_dropped(&event.topic);
                warn!(
                    "Dropped event {} on '{}' for subscriber #{} ('{}'): queue full",
                    event.event_id, event.topic, subscriber.id, subscriber.handler_name
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Subscriber #{} worker is gone", subscriber.id);
            }
        }
    }

    fn forward(&self, event: &Arc<Event>) {
        let forwarder = self
            .forwarder
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        if let Some(forwarder) = forwarder {
            if forwarder.accepts(&event.topic) {
                forwarder.forward(event.clone());
                self.stats.record_forwarded();
            }
        }
    }

    fn snapshot(&self, topic: &str) -> Vec<Arc<Subscriber>> {
        let entry = {
            let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
            topics.get(topic).cloned()
        };
        entry
            .map(|entry| {
                entry
                    .subscribers
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone()
            })
            .unwrap_or_default()
    }

    fn topic_entry(&self, topic: &str) -> Arc<TopicSubscribers> {
        if let Some(entry) = self
            .topics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
        {
            return entry.clone();
        }

        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        topics.entry(topic.to_string()).or_default().clone()
    }

    fn remove_subscriber(&self, subscription: &Subscription) -> Option<Arc<Subscriber>> {
        let entry = {
            let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
            topics.get(&subscription.topic).cloned()
        }?;

        let mut subscribers = entry
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let index = subscribers.iter().position(|s| s.id == subscription.id)?;
        let subscriber = subscribers.remove(index);
        subscriber.active.store(false, Ordering::SeqCst);

        debug!(
            "Removed subscription #{} on '{}'",
            subscription.id, subscription.topic
        );
        Some(subscriber)
    }
}

fn validate_topic(topic: &str) -> Result<(), BusError> {
    if topic.trim().is_empty() {
        return Err(BusError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

async fn run_worker(
    mut receiver: mpsc::Receiver<Arc<Event>>,
    handler: Arc<dyn EventHandler>,
    active: Arc<AtomicBool>,
    stats: Arc<BusStats>,
    metrics: Arc<MetricsService>,
) {
    while let Some(event) = receiver.recv().await {
        if !active.load(Ordering::SeqCst) {
            continue;
        }

        stats.record_delivered();
        metrics.event_delivered();

        let outcome = AssertUnwindSafe(handler.handle(event.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                stats.record_handler_failure();
                metrics.handler_failure();
                warn!(
                    "Handler '{}' failed on event {} ('{}'): {}",
                    handler.name(),
                    event.event_id,
                    event.topic,
                    e
                );
            }
            Err(panic) => {
                stats.record_handler_failure();
                metrics.handler_failure();
                warn!(
                    "Handler '{}' panicked on event {} ('{}'): {}",
                    handler.name(),
                    event.event_id,
                    event.topic,
                    crate::panic_message(panic.as_ref())
                );
            }
        }
    }
}
