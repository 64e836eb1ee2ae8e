//! Plugin Host Library
//!
//! This crate provides a runtime plugin host: a lifecycle-managed plugin
//! registry, an extension point registry that resolves priority-ordered live
//! implementations, and a publish/subscribe event bus that can optionally be
//! bridged to an external message broker.

pub mod api;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod error;
pub mod extension;
pub mod host;
pub mod metrics;
pub mod page;
pub mod plugin;

pub use api::{ApiServer, AppState, HealthResponse};
pub use bridge::{
    Bridge, BridgeCodec, BridgeEnvelope, BridgeFrame, BridgeHealth, BridgeLink, BridgeSettings,
    BridgeStats, BridgeStatsSnapshot, EventDeliveryError, MemoryBridge, MemoryBroker, TopicFilter,
};
pub use bus::{
    handler_fn, named_handler_fn, BoxError, BusError, BusStats, BusStatsSnapshot, Event, EventBus,
    EventHandler, EventOrigin, HandlerResult, OverflowPolicy, Payload, Subscription,
    LIFECYCLE_TOPIC,
};
pub use config::{ApiConfig, BridgeConfig, BusConfig, HostConfig, ReconnectConfig, RegistryConfig};
pub use error::{Error, Result};
pub use extension::{
    ExtensionDeclaration, ExtensionInfo, ExtensionInstance, ExtensionPointDescriptor,
    ExtensionRegistration, ExtensionRegistry,
};
pub use host::PluginHost;
pub use metrics::{MetricNames, MetricsConfig, MetricsService, Timer};
pub use page::{Page, PageRequest, SortDirection, SortKey};
pub use plugin::{
    HookError, HookResult, LifecycleEvent, LifecyclePhase, Plugin, PluginBuilder, PluginContext,
    PluginDescriptor, PluginError, PluginMetadata, PluginRegistry, PluginResult, PluginState,
};

/// Milliseconds since the Unix epoch.
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
