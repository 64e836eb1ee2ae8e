//! Prometheus metrics for plugin host observability.
//!
//! This module records:
//! - Plugin lifecycle transitions and hook failures
//! - Extension resolution
//! - Event bus publish, delivery, drop and handler failure counts
//! - Bridge traffic
//! - HTTP API requests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use plugin_host::metrics::{MetricsService, MetricsConfig};
//!
//! let metrics = MetricsService::new(MetricsConfig::default());
//! metrics.plugin_transition("started");
//! metrics.event_published("orders.created");
//! ```
//!
//! ## Exposed Metrics
//!
//! All metrics are prefixed with `plugin_host_`:
//!
//! - `plugin_host_plugin_transitions_total` - Lifecycle transitions by target state (counter)
//! - `plugin_host_plugin_hook_failures_total` - Failed hooks by phase (counter)
//! - `plugin_host_plugins` - Registered plugins by state (gauge)
//! - `plugin_host_extension_resolves_total` - Extension point resolutions (counter)
//! - `plugin_host_events_published_total` - Published events (counter)
//! - `plugin_host_events_delivered_total` - Events handed to handlers (counter)
//! - `plugin_host_events_dropped_total` - Events dropped on full queues (counter)
//! - `plugin_host_handler_failures_total` - Handler errors and panics (counter)
//! - `plugin_host_bridge_sent_total` / `_failures_total` / `_received_total` - Bridge traffic (counters)
//! - `plugin_host_http_requests_total` - HTTP requests (counter)

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder.
    pub enabled: bool,
    /// Prefix for all metric names (default: "plugin_host")
    pub prefix: String,
    /// Label bus metrics with the event topic.
    ///
    /// Disable when topics are high-cardinality.
    pub topic_labels: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "plugin_host".to_string(),
            topic_labels: true,
        }
    }
}

/// Metric names with configurable prefix.
#[derive(Debug, Clone)]
pub struct MetricNames {
    pub plugin_transitions: String,
    pub plugin_hook_failures: String,
    pub plugins_by_state: String,
    pub extension_resolves: String,
    pub events_published: String,
    pub events_delivered: String,
    pub events_dropped: String,
    pub handler_failures: String,
    pub bridge_sent: String,
    pub bridge_failures: String,
    pub bridge_received: String,
    pub http_requests_total: String,
    pub http_request_duration: String,
    pub http_requests_in_flight: String,
}

impl MetricNames {
    /// Create metric names with the given prefix.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            plugin_transitions: format!("{}_plugin_transitions_total", prefix),
            plugin_hook_failures: format!("{}_plugin_hook_failures_total", prefix),
            plugins_by_state: format!("{}_plugins", prefix),
            extension_resolves: format!("{}_extension_resolves_total", prefix),
            events_published: format!("{}_events_published_total", prefix),
            events_delivered: format!("{}_events_delivered_total", prefix),
            events_dropped: format!("{}_events_dropped_total", prefix),
            handler_failures: format!("{}_handler_failures_total", prefix),
            bridge_sent: format!("{}_bridge_sent_total", prefix),
            bridge_failures: format!("{}_bridge_failures_total", prefix),
            bridge_received: format!("{}_bridge_received_total", prefix),
            http_requests_total: format!("{}_http_requests_total", prefix),
            http_request_duration: format!("{}_http_request_duration_seconds", prefix),
            http_requests_in_flight: format!("{}_http_requests_in_flight", prefix),
        }
    }
}

impl Default for MetricNames {
    fn default() -> Self {
        Self::with_prefix("plugin_host")
    }
}

/// Prometheus metrics service.
///
/// Recording methods are cheap no-ops when no recorder is installed, so
/// components can hold a disabled service in tests.
pub struct MetricsService {
    config: MetricsConfig,
    names: MetricNames,
    handle: Option<PrometheusHandle>,
    /// In-flight request counter (for gauge tracking)
    in_flight: Arc<AtomicU64>,
}

impl MetricsService {
    /// Create a new metrics service with the given configuration.
    ///
    /// This installs a global Prometheus recorder. Only one can be installed
    /// per process; later services render nothing.
    pub fn new(config: MetricsConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let names = MetricNames::with_prefix(&config.prefix);
        let handle = PrometheusBuilder::new().install_recorder().ok();

        let service = Self {
            config,
            names,
            handle,
            in_flight: Arc::new(AtomicU64::new(0)),
        };
        service.register_descriptions();
        service
    }

    /// Create a disabled metrics service (for testing).
    pub fn disabled() -> Self {
        Self {
            config: MetricsConfig {
                enabled: false,
                ..Default::default()
            },
            names: MetricNames::default(),
            handle: None,
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Check if metrics recording is enabled.
    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }

    /// Render metrics in Prometheus exposition format.
    pub fn render(&self) -> String {
        self.handle.as_ref().map(|h| h.render()).unwrap_or_default()
    }

    /// Get metric names.
    pub fn names(&self) -> &MetricNames {
        &self.names
    }

    fn register_descriptions(&self) {
        describe_counter!(
            self.names.plugin_transitions.clone(),
            "Plugin lifecycle transitions by target state"
        );
        describe_counter!(
            self.names.plugin_hook_failures.clone(),
            "Lifecycle hooks that failed, timed out or panicked"
        );
        describe_gauge!(
            self.names.plugins_by_state.clone(),
            "Registered plugins by lifecycle state"
        );
        describe_counter!(
            self.names.extension_resolves.clone(),
            "Extension point resolutions"
        );
        describe_counter!(self.names.events_published.clone(), "Events published");
        describe_counter!(
            self.names.events_delivered.clone(),
            "Events handed to subscriber handlers"
        );
        describe_counter!(
            self.names.events_dropped.clone(),
            "Events dropped because a subscriber queue was full"
        );
        describe_counter!(
            self.names.handler_failures.clone(),
            "Subscriber handlers that returned an error or panicked"
        );
        describe_counter!(self.names.bridge_sent.clone(), "Events sent to the broker");
        describe_counter!(
            self.names.bridge_failures.clone(),
            "Broker send and receive failures"
        );
        describe_counter!(
            self.names.bridge_received.clone(),
            "Events received from the broker"
        );
        describe_counter!(
            self.names.http_requests_total.clone(),
            "Total number of HTTP requests"
        );
        describe_histogram!(
            self.names.http_request_duration.clone(),
            "HTTP request duration in seconds"
        );
        describe_gauge!(
            self.names.http_requests_in_flight.clone(),
            "Number of HTTP requests currently being processed"
        );
    }

    fn topic_label(&self, topic: &str) -> String {
        if self.config.topic_labels {
            topic.to_string()
        } else {
            "*".to_string()
        }
    }

    // ========== Plugin Metrics ==========

    /// Record a lifecycle transition.
    pub fn plugin_transition(&self, to: &str) {
        let labels = [("to", to.to_string())];
        counter!(self.names.plugin_transitions.clone(), &labels).increment(1);
    }

    /// Record a failed lifecycle hook.
    pub fn hook_failure(&self, phase: &str) {
        let labels = [("phase", phase.to_string())];
        counter!(self.names.plugin_hook_failures.clone(), &labels).increment(1);
    }

    /// Update the plugin count for a state.
    pub fn plugins_in_state(&self, state: &str, count: usize) {
        let labels = [("state", state.to_string())];
        gauge!(self.names.plugins_by_state.clone(), &labels).set(count as f64);
    }

    /// Record an extension point resolution.
    pub fn extension_resolve(&self, point: &str) {
        let labels = [("point", point.to_string())];
        counter!(self.names.extension_resolves.clone(), &labels).increment(1);
    }

    // ========== Bus Metrics ==========

    /// Record a published event.
    pub fn event_published(&self, topic: &str) {
        let labels = [("topic", self.topic_label(topic))];
        counter!(self.names.events_published.clone(), &labels).increment(1);
    }

    /// Record an event handed to a handler.
    pub fn event_delivered(&self) {
        counter!(self.names.events_delivered.clone()).increment(1);
    }

    /// Record an event dropped on a full subscriber queue.
    pub fn event_dropped(&self, topic: &str) {
        let labels = [("topic", self.topic_label(topic))];
        counter!(self.names.events_dropped.clone(), &labels).increment(1);
    }

    /// Record a failing handler.
    pub fn handler_failure(&self) {
        counter!(self.names.handler_failures.clone()).increment(1);
    }

    // ========== Bridge Metrics ==========

    /// Record an event sent to the broker.
    pub fn bridge_sent(&self) {
        counter!(self.names.bridge_sent.clone()).increment(1);
    }

    /// Record a broker failure.
    pub fn bridge_failure(&self, direction: &str) {
        let labels = [("direction", direction.to_string())];
        counter!(self.names.bridge_failures.clone(), &labels).increment(1);
    }

    /// Record an event received from the broker.
    pub fn bridge_received(&self) {
        counter!(self.names.bridge_received.clone()).increment(1);
    }

    // ========== HTTP Metrics ==========

    /// Record an HTTP request.
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, etc.)
    /// * `path` - Matched route
    /// * `status` - HTTP status code
    /// * `duration_secs` - Request duration in seconds
    pub fn http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = [
            ("method", method.to_string()),
            ("path", path.to_string()),
            ("status", status.to_string()),
        ];

        counter!(self.names.http_requests_total.clone(), &labels).increment(1);
        histogram!(self.names.http_request_duration.clone(), &labels).record(duration_secs);
    }

    /// Start tracking an in-flight request. Returns a guard that decrements on drop.
    pub fn start_request(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        gauge!(self.names.http_requests_in_flight.clone())
            .set(self.in_flight.load(Ordering::SeqCst) as f64);

        InFlightGuard {
            counter: self.in_flight.clone(),
            metric_name: self.names.http_requests_in_flight.clone(),
        }
    }
}

/// Guard for tracking in-flight requests.
///
/// Automatically decrements the in-flight counter when dropped.
pub struct InFlightGuard {
    counter: Arc<AtomicU64>,
    metric_name: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        gauge!(self.metric_name.clone()).set(self.counter.load(Ordering::SeqCst) as f64);
    }
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a new timer starting now.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

// ========== Axum Middleware Integration ==========

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::IntoResponse,
};

/// Axum middleware for HTTP metrics collection.
pub async fn metrics_middleware(
    State(metrics): State<Arc<MetricsService>>,
    matched_path: Option<MatchedPath>,
    req: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let timer = Timer::start();
    let method = req.method().clone();
    let path = matched_path
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let _in_flight = metrics.start_request();
    let response = next.run(req).await;

    metrics.http_request(
        method.as_str(),
        &path,
        response.status().as_u16(),
        timer.elapsed_secs(),
    );

    response
}
