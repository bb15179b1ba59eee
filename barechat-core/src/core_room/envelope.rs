//! The chat message exchanged between peers
//!
//! On the wire an envelope is a JSON object:
//!
//! ```json
//! { "timestamp": "2025-01-01T12:00:00Z", "message": "hi", "local": true, "messageType": "text" }
//! ```
//!
//! `local` is meaningful only to the process that created the envelope. A
//! receiver always resets it to `false` instead of trusting the sender.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Kind of envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// User-typed chat text
    #[default]
    Text,
    /// Generated notices such as peer presence
    System,
    /// Last envelope a session sends before tearing down
    Leave,
    /// Any type this build does not know about
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub message_type: MessageType,
}

impl MessageEnvelope {
    /// Envelope created by this session, about to be sent
    pub fn outgoing(message: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            local: true,
            message_type,
        }
    }

    /// Plain text message from this session
    pub fn text(message: impl Into<String>) -> Self {
        Self::outgoing(message, MessageType::Text)
    }

    /// Notice generated locally and never sent to peers
    pub fn system(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            local: false,
            message_type: MessageType::System,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode bytes received from a peer, rejecting anything over `max_size`
    pub fn decode_remote(bytes: &[u8], max_size: usize) -> Result<Self, EnvelopeError> {
        if bytes.len() > max_size {
            return Err(EnvelopeError::TooLarge {
                size: bytes.len(),
                max: max_size,
            });
        }
        let mut envelope: MessageEnvelope = serde_json::from_slice(bytes)?;
        envelope.local = false;
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 64 * 1024;

    #[test]
    fn test_wire_field_names() {
        let envelope = MessageEnvelope::text("hi");
        let value: serde_json::Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();

        assert_eq!(value["message"], "hi");
        assert_eq!(value["local"], true);
        assert_eq!(value["messageType"], "text");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_decode_remote_recomputes_local() {
        let bytes = MessageEnvelope::text("from afar").encode().unwrap();
        let envelope = MessageEnvelope::decode_remote(&bytes, MAX).unwrap();
        assert_eq!(envelope.message, "from afar");
        assert!(!envelope.local);
    }

    #[test]
    fn test_decode_envelope_from_javascript_peer() {
        let raw = br#"{"timestamp":"2025-03-01T10:15:30.123Z","message":"hola","local":true,"messageType":"text"}"#;
        let envelope = MessageEnvelope::decode_remote(raw, MAX).unwrap();
        assert_eq!(envelope.message, "hola");
        assert_eq!(envelope.message_type, MessageType::Text);
        assert!(!envelope.local);
    }

    #[test]
    fn test_missing_optional_fields_use_defaults() {
        let raw = br#"{"timestamp":"2025-03-01T10:15:30Z","message":"bare"}"#;
        let envelope = MessageEnvelope::decode_remote(raw, MAX).unwrap();
        assert_eq!(envelope.message_type, MessageType::Text);
    }

    #[test]
    fn test_unknown_message_type_decodes_as_other() {
        let raw = br#"{"timestamp":"2025-03-01T10:15:30Z","message":"x","messageType":"reaction"}"#;
        let envelope = MessageEnvelope::decode_remote(raw, MAX).unwrap();
        assert_eq!(envelope.message_type, MessageType::Other);
    }

    #[test]
    fn test_malformed_and_oversized_input() {
        assert!(matches!(
            MessageEnvelope::decode_remote(b"not json", MAX),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            MessageEnvelope::decode_remote(b"{\"message\":\"no timestamp\"}", MAX),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            MessageEnvelope::decode_remote(&[b' '; 32], 16),
            Err(EnvelopeError::TooLarge { size: 32, max: 16 })
        ));
    }

    #[test]
    fn test_leave_type_name() {
        let envelope = MessageEnvelope::outgoing("bye", MessageType::Leave);
        let value: serde_json::Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value["messageType"], "leave");
    }
}
