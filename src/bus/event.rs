//! Event and payload types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Content type of JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Content type of UTF-8 text payloads.
pub const CONTENT_TYPE_TEXT: &str = "text/plain";
/// Content type of opaque binary payloads.
pub const CONTENT_TYPE_BYTES: &str = "application/octet-stream";

/// Opaque event body plus a content-type tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Payload {
    /// Payload with an explicit content type.
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data,
        }
    }

    /// Serialize a value as JSON.
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        Ok(Self::new(CONTENT_TYPE_JSON, serde_json::to_vec(value)?))
    }

    /// UTF-8 text payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(CONTENT_TYPE_TEXT, text.into().into_bytes())
    }

    /// Binary payload.
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::new(CONTENT_TYPE_BYTES, data.into())
    }

    /// Empty payload.
    pub fn empty() -> Self {
        Self::bytes(Vec::new())
    }

    /// Decode a JSON payload.
    pub fn decode_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.data)
    }

    /// Payload as text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload has no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Where an event entered this bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    /// Published by local code.
    Local,
    /// Ingested from the distributed bridge.
    Bridge,
}

/// An immutable published event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique id. Preserved across the bridge.
    pub event_id: String,
    pub topic: String,
    pub payload: Payload,
    /// Publishing plugin, `None` for the host itself.
    pub source_plugin_id: Option<String>,
    /// Publish time (Unix milliseconds).
    pub timestamp: u64,
    pub origin: EventOrigin,
}

impl Event {
    /// New local event with a fresh id and the current time.
    pub fn new(topic: impl Into<String>, payload: Payload, source_plugin_id: Option<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            payload,
            source_plugin_id,
            timestamp: crate::unix_millis(),
            origin: EventOrigin::Local,
        }
    }

    /// Whether the event came in over the bridge.
    pub fn is_bridged(&self) -> bool {
        self.origin == EventOrigin::Bridge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderCreated {
        order_id: u64,
    }

    #[test]
    fn test_json_payload_decodes() {
        let payload = Payload::json(&OrderCreated { order_id: 7 }).unwrap();

        assert_eq!(payload.content_type, CONTENT_TYPE_JSON);
        let decoded: OrderCreated = payload.decode_json().unwrap();
        assert_eq!(decoded, OrderCreated { order_id: 7 });
    }

    #[test]
    fn test_text_payload() {
        let payload = Payload::text("hello");
        assert_eq!(payload.as_text(), Some("hello"));
        assert_eq!(payload.len(), 5);
    }

    #[test]
    fn test_new_events_get_unique_ids() {
        let a = Event::new("t", Payload::empty(), None);
        let b = Event::new("t", Payload::empty(), None);

        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.origin, EventOrigin::Local);
        assert!(!a.is_bridged());
    }
}
