//! Topic-based event bus.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use plugin_host::{handler_fn, BusConfig, EventBus, Payload};
//!
//! let bus = EventBus::new(BusConfig::default());
//! let subscription = bus.subscribe("orders.created", handler_fn(|event| async move {
//!     tracing::info!("order event {}", event.event_id);
//!     Ok(())
//! }))?;
//!
//! bus.publish("orders.created", Payload::text("42"), Some("shop".into())).await?;
//! bus.unsubscribe(&subscription);
//! ```

mod event;
mod event_bus;
mod handler;

pub use event::{
    Event, EventOrigin, Payload, CONTENT_TYPE_BYTES, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT,
};
pub use event_bus::{
    BusError, BusStats, BusStatsSnapshot, EventBus, EventForwarder, OverflowPolicy, Subscription,
};
pub use handler::{handler_fn, named_handler_fn, BoxError, EventHandler, FnHandler, HandlerResult};

/// Topic on which the host publishes plugin lifecycle transitions.
pub const LIFECYCLE_TOPIC: &str = "plugin.lifecycle";
