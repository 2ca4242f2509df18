use crate::queue::QueuePriority;
use serde::{Deserialize, Serialize};

/// Event types delivered by the chat platform.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    ConversationCreated,
    MessageCreated,
    ConversationStatusChanged,
}

impl EventType {
    /// Conversation lifecycle events jump the message queue: a status change
    /// or a new conversation gates what the message transform can do.
    pub fn priority(self) -> QueuePriority {
        match self {
            Self::ConversationCreated | Self::ConversationStatusChanged => QueuePriority::High,
            Self::MessageCreated => QueuePriority::Normal,
        }
    }
}

/// One inbound delivery attempt, decoded from the request body.
///
/// `id` is the source-provided idempotency key. Some event classes omit it;
/// those deliveries cannot be deduplicated and are tagged as such downstream.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    pub id: Option<String>,
    pub event: EventType,
    pub payload: serde_json::Value,
}

#[derive(Debug, PartialEq, Eq)]
pub enum EnvelopeError {
    Malformed(String),
    UnsupportedEvent(String),
}

impl WebhookEnvelope {
    pub fn parse(body: &[u8]) -> Result<Self, EnvelopeError> {
        let payload: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        let Some(event_name) = payload.get("event").and_then(serde_json::Value::as_str) else {
            return Err(EnvelopeError::Malformed("missing \"event\" field".into()));
        };
        let event: EventType = event_name
            .parse()
            .map_err(|_| EnvelopeError::UnsupportedEvent(event_name.to_string()))?;

        // Sources send the id as either a string or an integer.
        let id = match payload.get("id") {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Ok(Self { id, event, payload })
    }
}
