//! Bridge link - mirrors bus events to and from a broker

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::codec::{BridgeCodec, BridgeEnvelope, TopicFilter};
use super::transport::{Bridge, BridgeFrame};
use crate::bus::{Event, EventBus, EventForwarder};
use crate::config::{BridgeConfig, ReconnectConfig};
use crate::metrics::MetricsService;

/// Consecutive failures after which the link reports itself degraded.
const DEGRADED_THRESHOLD: u64 = 3;

/// Runtime settings of a [`BridgeLink`].
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// This host's id on the broker.
    pub node_id: String,
    /// Topics forwarded to the broker.
    pub filter: TopicFilter,
    pub codec: BridgeCodec,
    /// Capacity of the outbound queue.
    pub outbound_capacity: usize,
    pub reconnect: ReconnectConfig,
}

impl BridgeSettings {
    /// Settings from configuration.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            node_id: config.node_id.clone(),
            filter: config.topic_filter(),
            codec: config.codec,
            outbound_capacity: config.outbound_capacity.max(1),
            reconnect: config.reconnect.clone(),
        }
    }
}

/// Health of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeHealth {
    Healthy,
    /// Repeated consecutive failures.
    Degraded,
    /// The ingest loop has stopped.
    Disconnected,
}

// ========== Bridge Statistics ==========

/// Statistics for a bridge link.
#[derive(Debug)]
pub struct BridgeStats {
    /// Events sent to the broker.
    pub sent: AtomicU64,
    /// Failed sends (including encode failures).
    pub send_failures: AtomicU64,
    /// Events ingested from the broker.
    pub received: AtomicU64,
    /// Failed receive calls.
    pub receive_errors: AtomicU64,
    /// Events not forwarded because the outbound queue was full.
    pub lost: AtomicU64,
    /// Frames skipped because this node published them.
    pub skipped_echo: AtomicU64,
    /// Frames that could not be decoded.
    pub decode_errors: AtomicU64,
    /// Failures since the last success.
    pub consecutive_failures: AtomicU64,
    connected: AtomicBool,
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self {
            sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            received: AtomicU64::new(0),
            receive_errors: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            skipped_echo: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            connected: AtomicBool::new(true),
        }
    }
}

impl BridgeStats {
    /// Record a successful send.
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Record a failed send.
    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an ingested event.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Record a failed receive.
    pub fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event lost on a full outbound queue.
    pub fn record_lost(&self) {
        self.lost.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a skipped echo.
    pub fn record_skipped_echo(&self) {
        self.skipped_echo.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an undecodable frame.
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Current health.
    pub fn health(&self) -> BridgeHealth {
        if !self.connected.load(Ordering::SeqCst) {
            BridgeHealth::Disconnected
        } else if self.consecutive_failures.load(Ordering::Relaxed) >= DEGRADED_THRESHOLD {
            BridgeHealth::Degraded
        } else {
            BridgeHealth::Healthy
        }
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            health: self.health(),
            sent: self.sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            skipped_echo: self.skipped_echo.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStatsSnapshot {
    pub health: BridgeHealth,
    pub sent: u64,
    pub send_failures: u64,
    pub received: u64,
    pub receive_errors: u64,
    pub lost: u64,
    pub skipped_echo: u64,
    pub decode_errors: u64,
}

// ========== Outbound forwarder ==========

struct OutboundForwarder {
    filter: TopicFilter,
    sender: mpsc::Sender<Arc<Event>>,
    stats: Arc<BridgeStats>,
}

impl EventForwarder for OutboundForwarder {
    fn accepts(&self, topic: &str) -> bool {
        self.filter.matches(topic)
    }

    fn forward(&self, event: Arc<Event>) {
        if let Err(e) = self.sender.try_send(event) {
            self.stats.record_lost();
            let event = match e {
                mpsc::error::TrySendError::Full(event) | mpsc::error::TrySendError::Closed(event) => event,
            };
            warn!(
                "Bridge outbound queue unavailable, event {} on '{}' not forwarded",
                event.event_id, event.topic
            );
        }
    }
}

// ========== Bridge Link ==========

/// Connects an [`EventBus`] to a [`Bridge`].
///
/// Locally published events on matching topics go out through a bounded
/// queue and a forward task; frames from the broker are decoded and
/// ingested by a separate task. Broker failures are logged and counted and
/// never affect local delivery.
pub struct BridgeLink {
    bus: Arc<EventBus>,
    bridge_name: String,
    node_id: String,
    stats: Arc<BridgeStats>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BridgeLink {
    /// Start forwarding and ingesting. Must be called within a Tokio runtime.
    pub fn start(
        bus: Arc<EventBus>,
        bridge: Arc<dyn Bridge>,
        settings: BridgeSettings,
        metrics: Arc<MetricsService>,
    ) -> Arc<Self> {
        let stats = Arc::new(BridgeStats::default());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::channel(settings.outbound_capacity.max(1));

        let forward_task = tokio::spawn(run_forward(
            outbound_rx,
            bridge.clone(),
            settings.codec,
            settings.node_id.clone(),
            stats.clone(),
            metrics.clone(),
        ));
        let ingest_task = tokio::spawn(run_ingest(
            bus.clone(),
            bridge.clone(),
            settings.clone(),
            stats.clone(),
            metrics,
            shutdown_rx,
        ));

        bus.set_forwarder(Arc::new(OutboundForwarder {
            filter: settings.filter,
            sender: outbound_tx,
            stats: stats.clone(),
        }));

        info!(
            "Bridge '{}' connected as node '{}'",
            bridge.name(),
            settings.node_id
        );

        Arc::new(Self {
            bus,
            bridge_name: bridge.name().to_string(),
            node_id: settings.node_id,
            stats,
            shutdown,
            tasks: Mutex::new(vec![forward_task, ingest_task]),
        })
    }

    /// Stop forwarding, flush queued outbound events and stop ingesting.
    pub async fn stop(&self) {
        self.bus.clear_forwarder();
        let _ = self.shutdown.send(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Bridge task ended abnormally: {}", e);
            }
        }
        self.stats.set_connected(false);
        info!("Bridge '{}' stopped", self.bridge_name);
    }

    /// Link statistics.
    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// Current health.
    pub fn health(&self) -> BridgeHealth {
        self.stats.health()
    }

    /// This host's id on the broker.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Name of the underlying bridge.
    pub fn bridge_name(&self) -> &str {
        &self.bridge_name
    }
}

async fn run_forward(
    mut outbound: mpsc::Receiver<Arc<Event>>,
    bridge: Arc<dyn Bridge>,
    codec: BridgeCodec,
    node_id: String,
    stats: Arc<BridgeStats>,
    metrics: Arc<MetricsService>,
) {
    while let Some(event) = outbound.recv().await {
        let envelope = BridgeEnvelope::from_event(&event, &node_id);
        let data = match codec.encode(&envelope) {
            Ok(data) => data,
            Err(e) => {
                stats.record_send_failure();
                metrics.bridge_failure("send");
                warn!("Failed to encode event {}: {}", event.event_id, e);
                continue;
            }
        };

        match bridge.send(&event.topic, data).await {
            Ok(()) => {
                stats.record_sent();
                metrics.bridge_sent();
                trace!("Forwarded event {} on '{}'", event.event_id, event.topic);
            }
            Err(e) => {
                stats.record_send_failure();
                metrics.bridge_failure("send");
                warn!(
                    "Bridge '{}' failed to send event {} on '{}': {}",
                    bridge.name(),
                    event.event_id,
                    event.topic,
                    e
                );
            }
        }
    }
    debug!("Bridge forward task finished");
}

async fn run_ingest(
    bus: Arc<EventBus>,
    bridge: Arc<dyn Bridge>,
    settings: BridgeSettings,
    stats: Arc<BridgeStats>,
    metrics: Arc<MetricsService>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures: u32 = 0;

    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = bridge.receive() => received,
        };

        match received {
            Ok(Some(frame)) => {
                failures = 0;
                stats.set_connected(true);
                ingest_frame(&bus, &settings, &stats, &metrics, frame).await;
            }
            Ok(None) => {
                info!("Bridge '{}' closed its stream", bridge.name());
                stats.set_connected(false);
                break;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                stats.record_receive_error();
                metrics.bridge_failure("receive");

                if !settings.reconnect.allows_attempt(failures) {
                    error!(
                        "Bridge '{}' giving up after {} consecutive receive failures: {}",
                        bridge.name(),
                        failures,
                        e
                    );
                    stats.set_connected(false);
                    break;
                }

                let delay = settings.reconnect.delay_for(failures - 1);
                warn!(
                    "Bridge '{}' receive failed ({}), retrying in {:?}",
                    bridge.name(),
                    e,
                    delay
                );
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                if let Err(e) = bridge.reconnect().await {
                    warn!("Bridge '{}' reconnect failed: {}", bridge.name(), e);
                }
            }
        }
    }
    debug!("Bridge ingest task finished");
}

async fn ingest_frame(
    bus: &EventBus,
    settings: &BridgeSettings,
    stats: &BridgeStats,
    metrics: &MetricsService,
    frame: BridgeFrame,
) {
    let envelope = match settings.codec.decode(&frame.data) {
        Ok(envelope) => envelope,
        Err(e) => {
            stats.record_decode_error();
            warn!("Dropping undecodable frame on '{}': {}", frame.topic, e);
            return;
        }
    };

    if envelope.origin_node == settings.node_id {
        stats.record_skipped_echo();
        trace!("Skipping echo of event {}", envelope.event_id);
        return;
    }

    let event_id = envelope.event_id.clone();
    match bus.ingest(envelope.into_event()).await {
        Ok(_) => {
            stats.record_received();
            metrics.bridge_received();
        }
        Err(e) => debug!("Bus rejected bridged event {}: {}", event_id, e),
    }
}
