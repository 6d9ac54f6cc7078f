//! Envelope — the unit published on the fleet bus, and its JSON wire codec.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// An instance came up (advisory).
    ServiceConnected,
    /// An instance is shutting down gracefully (advisory).
    ServiceDisconnected,
    /// Fire-and-forget application message.
    Message,
    /// Request expecting a `CallReturn` with the same correlation id.
    Call,
    /// Reply to a `Call`.
    CallReturn,
}

impl EnvelopeKind {
    /// Fleet-wide control kinds travel on the global channel.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            EnvelopeKind::ServiceConnected | EnvelopeKind::ServiceDisconnected
        )
    }
}

/// A message on the fleet bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Envelope {
    /// Unique per publish attempt; doubles as the claim key.
    pub id: String,
    /// Instance id of the publisher.
    pub sender_id: String,
    pub kind: EnvelopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Links a `CallReturn` to its `Call`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Create an envelope of the given kind with a fresh id.
    pub fn new(sender_id: impl Into<String>, kind: EnvelopeKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            kind,
            target_service: None,
            event_name: None,
            payload: None,
            correlation_id: None,
        }
    }

    /// Address the envelope to a service.
    pub fn to_service(mut self, service: impl Into<String>) -> Self {
        self.target_service = Some(service.into());
        self
    }

    /// Set the event name.
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event_name = Some(event.into());
        self
    }

    /// Attach a payload. A JSON `null` is the same as no payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = (!payload.is_null()).then_some(payload);
        self
    }

    /// Set the correlation id (calls and their returns only).
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Serialize to the wire format.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse from the wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Error decoding an envelope. Callers drop the message and keep going.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Reply body carried by a `CallReturn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallReply {
    Ok(Value),
    Err(String),
}
