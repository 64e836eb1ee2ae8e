//! Distributed bridge between the local event bus and an external broker.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use plugin_host::bridge::{BridgeLink, BridgeSettings, MemoryBroker};
//!
//! let broker = MemoryBroker::default();
//! let link = BridgeLink::start(bus.clone(), broker.connect("node-a"), settings, metrics);
//!
//! // Matching local publishes now reach every other node on the broker.
//! bus.publish("orders.created", payload, None).await?;
//!
//! link.stop().await;
//! ```

mod codec;
mod link;
mod memory;
mod transport;

pub use codec::{BridgeCodec, BridgeEnvelope, TopicFilter};
pub use link::{BridgeHealth, BridgeLink, BridgeSettings, BridgeStats, BridgeStatsSnapshot};
pub use memory::{MemoryBridge, MemoryBroker};
pub use transport::{Bridge, BridgeFrame, EventDeliveryError};
