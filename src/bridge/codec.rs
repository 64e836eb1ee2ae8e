//! Wire format for bridged events.

use serde::{Deserialize, Serialize};

use super::transport::EventDeliveryError;
use crate::bus::{Event, EventOrigin, Payload};

/// Serialized form of an event on the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeEnvelope {
    pub event_id: String,
    pub source_plugin_id: Option<String>,
    pub timestamp: u64,
    pub topic: String,
    pub content_type: String,
    pub payload: Vec<u8>,
    /// Node that first published the event.
    #[serde(default)]
    pub origin_node: String,
}

impl BridgeEnvelope {
    /// Envelope for a locally published event.
    pub fn from_event(event: &Event, origin_node: &str) -> Self {
        Self {
            event_id: event.event_id.clone(),
            source_plugin_id: event.source_plugin_id.clone(),
            timestamp: event.timestamp,
            topic: event.topic.clone(),
            content_type: event.payload.content_type.clone(),
            payload: event.payload.data.clone(),
            origin_node: origin_node.to_string(),
        }
    }

    /// Event to ingest, keeping the original id and timestamp.
    pub fn into_event(self) -> Event {
        Event {
            event_id: self.event_id,
            topic: self.topic,
            payload: Payload::new(self.content_type, self.payload),
            source_plugin_id: self.source_plugin_id,
            timestamp: self.timestamp,
            origin: EventOrigin::Bridge,
        }
    }
}

/// Envelope encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeCodec {
    #[default]
    Json,
    Bincode,
}

impl BridgeCodec {
    /// Encode an envelope.
    pub fn encode(&self, envelope: &BridgeEnvelope) -> Result<Vec<u8>, EventDeliveryError> {
        match self {
            BridgeCodec::Json => {
                serde_json::to_vec(envelope).map_err(|e| EventDeliveryError::Codec(e.to_string()))
            }
            BridgeCodec::Bincode => {
                bincode::serialize(envelope).map_err(|e| EventDeliveryError::Codec(e.to_string()))
            }
        }
    }

    /// Decode an envelope.
    pub fn decode(&self, data: &[u8]) -> Result<BridgeEnvelope, EventDeliveryError> {
        match self {
            BridgeCodec::Json => {
                serde_json::from_slice(data).map_err(|e| EventDeliveryError::Codec(e.to_string()))
            }
            BridgeCodec::Bincode => {
                bincode::deserialize(data).map_err(|e| EventDeliveryError::Codec(e.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TopicPattern {
    All,
    Prefix(String),
    Exact(String),
}

/// Selects which topics are bridged.
///
/// Patterns are `*` (everything), `prefix.*` (topics starting with
/// `prefix.`) or an exact topic name. An empty filter matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicFilter {
    patterns: Vec<TopicPattern>,
}

impl TopicFilter {
    /// Build a filter from patterns.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns = patterns
            .into_iter()
            .map(Into::into)
            .map(|pattern: String| {
                let pattern = pattern.trim().to_string();
                if pattern == "*" {
                    TopicPattern::All
                } else if let Some(prefix) = pattern.strip_suffix('*') {
                    TopicPattern::Prefix(prefix.to_string())
                } else {
                    TopicPattern::Exact(pattern)
                }
            })
            .collect();
        Self { patterns }
    }

    /// Filter matching every topic.
    pub fn all() -> Self {
        Self {
            patterns: vec![TopicPattern::All],
        }
    }

    /// Whether a topic is bridged.
    pub fn matches(&self, topic: &str) -> bool {
        self.patterns.iter().any(|pattern| match pattern {
            TopicPattern::All => true,
            TopicPattern::Prefix(prefix) => topic.starts_with(prefix.as_str()),
            TopicPattern::Exact(exact) => topic == exact,
        })
    }

    /// Whether the filter has no patterns.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
