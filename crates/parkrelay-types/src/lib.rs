use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Prefix prepended to every intent-service reply sent back to a client.
pub const CHATBOT_REPLY_PREFIX: &str = "Chatbot Response: ";

/// Reply text substituted when the intent service could not be reached or
/// returned an error.
pub const INTENT_FAILURE_FALLBACK: &str = "An error occurred while contacting Dialogflow.";

/// Reply text substituted when the intent service answered without any
/// fulfillment text.
pub const EMPTY_FULFILLMENT_FALLBACK: &str = "No response from Dialogflow.";

/// Session identifier used when every client shares one conversation.
pub const SHARED_SESSION_ID: &str = "unique-session-id";

/// Language tag attached to every intent query.
pub const DEFAULT_LANGUAGE_CODE: &str = "en";

/// Opaque identifier of one open client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single payload delivered by the broker on one of the subscribed topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub topic: String,
    /// Payload text, forwarded to clients unmodified.
    pub payload: String,
    /// When the relay took the message off the broker link; logged with
    /// every forward.
    pub received_at: DateTime<Utc>,
}

impl BrokerMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Build a message from raw broker bytes.
    ///
    /// Valid UTF-8 is kept byte-for-byte; anything else is decoded lossily.
    pub fn from_bytes(topic: impl Into<String>, payload: &[u8]) -> Self {
        Self::new(topic, String::from_utf8_lossy(payload).into_owned())
    }
}

/// Names of the broker topics the relay listens on and publishes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topics {
    /// Parking-slot sensor state.
    #[serde(default = "default_slots_topic")]
    pub slots: String,
    /// Gate-control events.
    #[serde(default = "default_gate_topic")]
    pub gate: String,
    /// Conversational messages; client text is republished here.
    #[serde(default = "default_chatbot_topic")]
    pub chatbot: String,
}

fn default_slots_topic() -> String {
    "parking/slots".to_string()
}
fn default_gate_topic() -> String {
    "parking/gate".to_string()
}
fn default_chatbot_topic() -> String {
    "chatbot/messages".to_string()
}

impl Topics {
    /// Every subscribed topic, in subscription order.
    pub fn all(&self) -> [&str; 3] {
        [&self.slots, &self.gate, &self.chatbot]
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            slots: default_slots_topic(),
            gate: default_gate_topic(),
            chatbot: default_chatbot_topic(),
        }
    }
}

/// Global error type spanning transport, broker, and intent-service failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Bind Error on {addr}: {details}")]
    Bind { addr: String, details: String },

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Broker Error: {0}")]
    Broker(String),

    #[error("Intent Service Error: {0}")]
    Intent(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Connection {0} is closed")]
    ConnectionClosed(ConnectionId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topics_match_parking_layout() {
        let topics = Topics::default();
        assert_eq!(
            topics.all(),
            ["parking/slots", "parking/gate", "chatbot/messages"]
        );
    }

    #[test]
    fn topics_deserialize_with_partial_overrides() {
        let topics: Topics = serde_json::from_str(r#"{"gate":"lot7/gate"}"#).unwrap();
        assert_eq!(topics.gate, "lot7/gate");
        assert_eq!(topics.slots, "parking/slots");
        assert_eq!(topics.chatbot, "chatbot/messages");
    }

    #[test]
    fn broker_message_keeps_utf8_payload_verbatim() {
        let msg = BrokerMessage::from_bytes("parking/slots", "slot:A1:free".as_bytes());
        assert_eq!(msg.payload, "slot:A1:free");
        assert_eq!(msg.topic, "parking/slots");
    }

    #[test]
    fn broker_message_decodes_invalid_utf8_lossily() {
        let msg = BrokerMessage::from_bytes("parking/gate", &[b'o', 0xff, b'k']);
        assert_eq!(msg.payload, "o\u{fffd}k");
    }

    #[test]
    fn broker_message_is_stamped_on_receipt() {
        let before = Utc::now();
        let msg = BrokerMessage::new("parking/slots", "slot:A1:free");
        let after = Utc::now();
        assert!(before <= msg.received_at && msg.received_at <= after);
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn relay_error_display() {
        let id = ConnectionId::new();
        let err = RelayError::ConnectionClosed(id);
        assert!(err.to_string().contains(&id.to_string()));

        let err = RelayError::Bind {
            addr: "0.0.0.0:3000".to_string(),
            details: "address in use".to_string(),
        };
        assert!(err.to_string().contains("0.0.0.0:3000"));
    }
}
