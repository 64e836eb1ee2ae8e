//! Broker adapter contract.

use async_trait::async_trait;
use thiserror::Error;

/// Bridge failures. Contained in the bridge; never reach local subscribers
/// or fail a local publish.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventDeliveryError {
    /// The broker rejected or failed to accept a frame.
    #[error("Bridge send failed: {0}")]
    Send(String),

    /// Reading from the broker failed.
    #[error("Bridge receive failed: {0}")]
    Receive(String),

    /// A frame could not be encoded or decoded.
    #[error("Bridge codec error: {0}")]
    Codec(String),

    /// The broker connection is closed.
    #[error("Bridge closed")]
    Closed,
}

/// One serialized event as carried by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeFrame {
    pub topic: String,
    pub data: Vec<u8>,
}

/// Adapter to an external message broker.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Send one serialized event.
    async fn send(&self, topic: &str, data: Vec<u8>) -> Result<(), EventDeliveryError>;

    /// Wait for the next frame. `Ok(None)` means the broker closed the stream.
    async fn receive(&self) -> Result<Option<BridgeFrame>, EventDeliveryError>;

    /// Re-establish the connection after a receive failure.
    async fn reconnect(&self) -> Result<(), EventDeliveryError> {
        Ok(())
    }
}
