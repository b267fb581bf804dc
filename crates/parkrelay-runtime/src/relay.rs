//! [`RelayContext`] – process-scoped state shared by every connection.
//!
//! Created once at startup, handed to the gateway behind an `Arc`, and
//! dropped at shutdown.  It owns nothing global: the connection registry,
//! the broker publisher, and the intent client are all injected, so the
//! same handler runs against MQTT and Dialogflow in production and against
//! in-memory fakes in tests.
//!
//! For each client message the relay
//!
//! 1. asks the intent service for a reply and sends exactly one
//!    `"Chatbot Response: …"` frame back to the originating connection, and
//! 2. republishes the raw text to the chatbot topic exactly once.
//!
//! The two run concurrently and the reply never waits for the publish.  A
//! failure in one never prevents the other, and publish failures are only
//! logged, never shown to the client.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parkrelay_middleware::{BrokerPublisher, ConnectionRegistry};
use parkrelay_types::{CHATBOT_REPLY_PREFIX, ConnectionId, RelayError, SHARED_SESSION_ID, Topics};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::intent::{IntentClient, IntentOutcome};

/// How intent-service conversations are scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionScope {
    /// Every client shares one conversation ([`SHARED_SESSION_ID`]).
    Shared,
    /// Each connection gets its own conversation, keyed by connection id.
    #[default]
    PerConnection,
}

impl fmt::Display for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionScope::Shared => write!(f, "shared"),
            SessionScope::PerConnection => write!(f, "per-connection"),
        }
    }
}

impl FromStr for SessionScope {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(SessionScope::Shared),
            "per-connection" | "per_connection" | "connection" => Ok(SessionScope::PerConnection),
            other => Err(RelayError::Config(format!("unknown session scope '{other}'"))),
        }
    }
}

/// What happened to one client message.
#[derive(Debug)]
pub struct ClientMessageReport {
    pub outcome: IntentOutcome,
    /// Result of the single publish attempt to the chatbot topic.
    pub published: Result<(), RelayError>,
    /// Whether the reply frame was queued for the client.  `false` only when
    /// the connection closed while the intent call was pending.
    pub replied: bool,
}

/// Shared relay state; see the module docs.
pub struct RelayContext {
    registry: Arc<ConnectionRegistry>,
    publisher: Arc<dyn BrokerPublisher>,
    intent: Arc<dyn IntentClient>,
    topics: Topics,
    session_scope: SessionScope,
}

impl RelayContext {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        publisher: Arc<dyn BrokerPublisher>,
        intent: Arc<dyn IntentClient>,
    ) -> Self {
        Self {
            registry,
            publisher,
            intent,
            topics: Topics::default(),
            session_scope: SessionScope::default(),
        }
    }

    pub fn with_topics(mut self, topics: Topics) -> Self {
        self.topics = topics;
        self
    }

    pub fn with_session_scope(mut self, scope: SessionScope) -> Self {
        self.session_scope = scope;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn session_scope(&self) -> SessionScope {
        self.session_scope
    }

    /// Intent-service session id used for messages from `conn`.
    pub fn session_id_for(&self, conn: ConnectionId) -> String {
        match self.session_scope {
            SessionScope::Shared => SHARED_SESSION_ID.to_string(),
            SessionScope::PerConnection => conn.to_string(),
        }
    }

    /// Handle one text message received from connection `conn`.
    pub async fn handle_client_message(&self, conn: ConnectionId, text: &str) -> ClientMessageReport {
        info!(connection = %conn, message = text, "received from client");

        let session_id = self.session_id_for(conn);
        let ((outcome, replied), published) = tokio::join!(
            self.reply_to(conn, &session_id, text),
            self.publish_client_text(text),
        );

        ClientMessageReport {
            outcome,
            published,
            replied,
        }
    }

    /// Ask the intent service and queue the reply frame as soon as the answer
    /// is in, independent of the publish.
    async fn reply_to(
        &self,
        conn: ConnectionId,
        session_id: &str,
        text: &str,
    ) -> (IntentOutcome, bool) {
        let outcome =
            IntentOutcome::from_result(self.intent.detect_intent(session_id, text).await);

        let frame = format!("{CHATBOT_REPLY_PREFIX}{}", outcome.reply_text());
        let replied = match self.registry.send_to(conn, frame) {
            Ok(()) => true,
            Err(e) => {
                warn!(connection = %conn, error = %e, "dropping chatbot reply");
                false
            }
        };
        (outcome, replied)
    }

    async fn publish_client_text(&self, text: &str) -> Result<(), RelayError> {
        let result = self.publisher.publish(&self.topics.chatbot, text).await;
        match &result {
            Ok(()) => info!(topic = %self.topics.chatbot, "message published to MQTT"),
            Err(e) => error!(topic = %self.topics.chatbot, error = %e, "MQTT publish error"),
        }
        result
    }
}
