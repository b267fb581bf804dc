//! `parkrelay-runtime` – what happens to a client message.
//!
//! # Modules
//!
//! - [`intent`] – [`DialogflowClient`][intent::DialogflowClient], the
//!   [`IntentClient`][intent::IntentClient] seam, and
//!   [`IntentOutcome`][intent::IntentOutcome], which separates a real reply
//!   from an empty one and from a failed call.
//! - [`relay`] – [`RelayContext`][relay::RelayContext]: the process-scoped
//!   context that replies to the client and republishes its text to the
//!   broker.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging plus optional OTLP span export.

pub mod intent;
pub mod relay;
pub mod telemetry;

pub use intent::{DialogflowClient, IntentClient, IntentError, IntentOutcome};
pub use relay::{ClientMessageReport, RelayContext, SessionScope};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
