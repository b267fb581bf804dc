//! `parkrelay-middleware` – broker plumbing and client fan-out.
//!
//! Moves opaque text between the MQTT broker and open client connections
//! without caring about what the text means.
//!
//! # Modules
//!
//! - [`registry`] – the set of open connections, each with an unbounded
//!   outbound queue.
//! - [`broker`] – MQTT client construction, the [`BrokerListener`] event
//!   loop, and the reconnect policy.
//! - [`publisher`] – the [`BrokerPublisher`] seam used to republish client
//!   text.

pub mod broker;
pub mod publisher;
pub mod registry;

pub use broker::{Backoff, BrokerConfig, BrokerListener, ListenerExit, ReconnectPolicy};
pub use publisher::{BrokerPublisher, MqttPublisher};
pub use registry::{ConnectionRegistry, FrameReceiver};
