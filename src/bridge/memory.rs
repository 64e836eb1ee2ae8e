//! In-process broker for tests and single-process deployments.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use super::transport::{Bridge, BridgeFrame, EventDeliveryError};

/// Broadcast hub: every frame sent by any endpoint reaches every endpoint,
/// including the sender.
#[derive(Clone)]
pub struct MemoryBroker {
    sender: broadcast::Sender<BridgeFrame>,
}

impl MemoryBroker {
    /// Create a broker that buffers up to `capacity` frames per endpoint.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Connect a new endpoint.
    pub fn connect(&self, name: impl Into<String>) -> Arc<MemoryBridge> {
        Arc::new(MemoryBridge {
            name: name.into(),
            sender: self.sender.clone(),
            receiver: Mutex::new(self.sender.subscribe()),
            fail_sends: AtomicBool::new(false),
            failing_receives: AtomicU32::new(0),
        })
    }

    /// Number of connected endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Endpoint of a [`MemoryBroker`].
pub struct MemoryBridge {
    name: String,
    sender: broadcast::Sender<BridgeFrame>,
    receiver: Mutex<broadcast::Receiver<BridgeFrame>>,
    fail_sends: AtomicBool,
    failing_receives: AtomicU32,
}

impl MemoryBridge {
    /// Make every send fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::SeqCst);
    }

    /// Make the next `count` receive calls fail.
    pub fn fail_next_receives(&self, count: u32) {
        self.failing_receives.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Bridge for MemoryBridge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, topic: &str, data: Vec<u8>) -> Result<(), EventDeliveryError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(EventDeliveryError::Send(format!(
                "endpoint '{}' is failing",
                self.name
            )));
        }

        self.sender
            .send(BridgeFrame {
                topic: topic.to_string(),
                data,
            })
            .map(|_| ())
            .map_err(|_| EventDeliveryError::Closed)
    }

    async fn receive(&self) -> Result<Option<BridgeFrame>, EventDeliveryError> {
        let injected = self
            .failing_receives
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(EventDeliveryError::Receive(format!(
                "endpoint '{}' receive failed",
                self.name
            )));
        }

        let mut receiver = self.receiver.lock().await;
        loop {
            match receiver.recv().await {
                Ok(frame) => return Ok(Some(frame)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Memory bridge '{}' lagged, {} frames lost",
                        self.name, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}
