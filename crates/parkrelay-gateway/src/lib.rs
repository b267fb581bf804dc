//! `parkrelay-gateway` – the single client-facing port.
//!
//! Boots an HTTP + WebSocket server (default port `3000`) that:
//!
//! 1. **Serves** the embedded operator page at `/`.
//!
//! 2. **Streams** every broker payload to every connected browser, verbatim,
//!    as a WebSocket text frame.
//!
//! 3. **Relays** each text frame a browser sends through the
//!    [`RelayContext`]: the browser gets one `"Chatbot Response: …"` frame
//!    back and the text is republished to the chatbot topic.
//!
//! [`RelayContext`]: parkrelay_runtime::RelayContext

pub mod server;

pub use server::{DEFAULT_PORT, GatewayListener, GatewayServer};
