//! [`DialogflowClient`] – intent-recognition over the Dialogflow REST API.
//!
//! One `detectIntent` call per client message, no retries, no streaming:
//!
//! ```text
//! POST {endpoint}/v2/projects/{project_id}/agent/sessions/{session_id}:detectIntent
//! {"queryInput":{"text":{"text":"open gate 2","languageCode":"en"}}}
//! ```
//!
//! The caller gets the raw `Result` from [`IntentClient::detect_intent`] and
//! folds it into an [`IntentOutcome`], which is what the relay replies with.
//!
//! # Example
//!
//! ```rust,no_run
//! use parkrelay_runtime::intent::{DialogflowClient, IntentClient, IntentOutcome};
//!
//! # async fn demo() {
//! let client = DialogflowClient::new("https://dialogflow.googleapis.com", "my-project");
//! let outcome = IntentOutcome::from_result(client.detect_intent("session-1", "open gate 2").await);
//! println!("{}", outcome.reply_text());
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use parkrelay_types::{DEFAULT_LANGUAGE_CODE, EMPTY_FULFILLMENT_FALLBACK, INTENT_FAILURE_FALLBACK};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};
use zeroize::Zeroizing;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from a single intent-service call.
#[derive(Error, Debug)]
pub enum IntentError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The service answered with a non-success status code.
    #[error("intent service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// The response body did not have the expected shape.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────────────────────

/// Result of one intent lookup, as seen by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentOutcome {
    /// The service returned non-empty fulfillment text.
    Fulfilled(String),
    /// The service answered but had nothing to say.
    Empty,
    /// The call failed; the string is the logged error.
    Failed(String),
}

impl IntentOutcome {
    /// Fold a raw client result into an outcome, logging failures.
    pub fn from_result(result: Result<Option<String>, IntentError>) -> Self {
        match result {
            Ok(Some(text)) => Self::Fulfilled(text),
            Ok(None) => Self::Empty,
            Err(e) => {
                error!(error = %e, "intent service error");
                Self::Failed(e.to_string())
            }
        }
    }

    /// Text sent back to the client (without the reply prefix).
    pub fn reply_text(&self) -> &str {
        match self {
            Self::Fulfilled(text) => text,
            Self::Empty => EMPTY_FULFILLMENT_FALLBACK,
            Self::Failed(_) => INTENT_FAILURE_FALLBACK,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client trait
// ─────────────────────────────────────────────────────────────────────────────

/// An intent-recognition backend.
#[async_trait]
pub trait IntentClient: Send + Sync {
    /// Send `text` within conversation `session_id`.
    ///
    /// Returns `Ok(None)` when the service responded without fulfillment
    /// text.
    async fn detect_intent(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<Option<String>, IntentError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectIntentRequest<'a> {
    query_input: QueryInput<'a>,
}

#[derive(Serialize)]
struct QueryInput<'a> {
    text: TextInput<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TextInput<'a> {
    text: &'a str,
    language_code: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectIntentResponse {
    query_result: Option<QueryResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResult {
    #[serde(default)]
    fulfillment_text: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// DialogflowClient
// ─────────────────────────────────────────────────────────────────────────────

/// REST client for Dialogflow ES `detectIntent`.
///
/// Construct once and share; `reqwest::Client` pools connections.
pub struct DialogflowClient {
    endpoint: String,
    project_id: String,
    language_code: String,
    access_token: Option<Zeroizing<String>>,
    timeout: Option<Duration>,
    client: reqwest::Client,
}

impl DialogflowClient {
    /// Create a client for `project_id` at `endpoint`
    /// (e.g. `"https://dialogflow.googleapis.com"`).
    pub fn new(endpoint: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            language_code: DEFAULT_LANGUAGE_CODE.to_string(),
            access_token: None,
            timeout: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(Zeroizing::new(token.into()));
        self
    }

    /// Abort calls that take longer than `timeout`.  Unset by default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_language_code(mut self, code: impl Into<String>) -> Self {
        self.language_code = code.into();
        self
    }

    /// Full `detectIntent` URL for `session_id`.
    pub fn session_url(&self, session_id: &str) -> String {
        format!(
            "{}/v2/projects/{}/agent/sessions/{}:detectIntent",
            self.endpoint, self.project_id, session_id
        )
    }
}

#[async_trait]
impl IntentClient for DialogflowClient {
    async fn detect_intent(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<Option<String>, IntentError> {
        let url = self.session_url(session_id);
        let body = DetectIntentRequest {
            query_input: QueryInput {
                text: TextInput {
                    text,
                    language_code: &self.language_code,
                },
            },
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token.as_str());
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        debug!(session = session_id, "detectIntent");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IntentError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let raw = response.text().await?;
        let parsed: DetectIntentResponse =
            serde_json::from_str(&raw).map_err(|e| IntentError::BadResponse(e.to_string()))?;

        Ok(parsed
            .query_result
            .and_then(|r| r.fulfillment_text)
            .filter(|t| !t.is_empty()))
    }
}
