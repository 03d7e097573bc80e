//! Wire shapes for the relay and the inbound codec.
//!
//! - Inbound: `{"message": "<non-empty>"}`
//! - Outbound: `{"message": "...", "timestamp": "<ISO-8601>"}`
//! - Error (unicast to the sender): `{"error": "..."}`

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Reply for text that is not JSON at all.
pub const INVALID_FORMAT: &str = "Formato de mensagem inválido. Use JSON.";

/// Reply for JSON that does not describe a valid message.
pub const PROCESSING_FAILED: &str = "Erro ao processar mensagem";

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// A message submitted by a client. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    pub message: String,
}

/// Why an inbound frame was rejected.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("invalid message: {0}")]
    Invalid(String),
}

impl CodecError {
    /// The error object sent back to the originating client.
    pub fn reply(&self) -> ErrorMessage {
        match self {
            CodecError::InvalidJson(_) => ErrorMessage::new(INVALID_FORMAT),
            CodecError::Invalid(_) => ErrorMessage::new(PROCESSING_FAILED),
        }
    }
}

impl InboundMessage {
    /// Decode and validate a text frame.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(CodecError::InvalidJson)?;
        let msg: InboundMessage =
            serde_json::from_value(value).map_err(|e| CodecError::Invalid(e.to_string()))?;
        if msg.message.is_empty() {
            return Err(CodecError::Invalid("message must not be empty".into()));
        }
        Ok(msg)
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// A relayed message. The timestamp is fixed at construction so every
/// recipient sees the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub message: String,
    pub timestamp: String,
}

impl OutboundMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| format!(r#"{{"error":"{PROCESSING_FAILED}"}}"#))
    }
}

impl From<InboundMessage> for OutboundMessage {
    fn from(inbound: InboundMessage) -> Self {
        OutboundMessage::new(inbound.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorMessage {
    pub error: String,
}

impl ErrorMessage {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| format!(r#"{{"error":"{PROCESSING_FAILED}"}}"#))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
