//! MQTT broker link.
//!
//! [`connect`] builds an `rumqttc` client and splits it into:
//!
//! * an [`MqttPublisher`] used by the relay to republish client text, and
//! * a [`BrokerListener`] that drives the MQTT event loop, subscribes to the
//!   configured [`Topics`] on every ConnAck, and copies each incoming payload
//!   to every open connection in the [`ConnectionRegistry`].
//!
//! Connection errors are always logged.  What happens afterwards is decided
//! by the [`ReconnectPolicy`]: either the link is torn down for good, or the
//! listener sleeps with exponential backoff and polls again (which makes
//! `rumqttc` reconnect).

use std::sync::Arc;
use std::time::Duration;

use parkrelay_types::{BrokerMessage, Topics};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::publisher::MqttPublisher;
use crate::registry::ConnectionRegistry;

/// Capacity of the request channel between the client handle and the event
/// loop.
const REQUEST_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection settings for the broker link.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub topics: Topics,
    pub reconnect: ReconnectPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "parkrelay".to_string(),
            keep_alive: Duration::from_secs(30),
            topics: Topics::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// What the listener does after a broker connection error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// When `false` the first error tears the link down permanently.
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Give up after this many consecutive failed attempts (`None` = never).
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Tear the link down on the first error and never reconnect.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

/// Exponential backoff state driven by a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Delay before the next reconnect attempt, or `None` when the listener
    /// should give up.
    ///
    /// Delays double from `initial_delay` and are capped at `max_delay`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.enabled {
            return None;
        }
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        let factor = 1u32.checked_shl(self.attempts).unwrap_or(u32::MAX);
        self.attempts += 1;
        Some(
            self.policy
                .initial_delay
                .saturating_mul(factor)
                .min(self.policy.max_delay),
        )
    }

    /// Forget previous failures after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

// ---------------------------------------------------------------------------
// Link construction
// ---------------------------------------------------------------------------

/// Build the MQTT client for `config`.
///
/// No network I/O happens here; the connection is opened lazily the first
/// time [`BrokerListener::run`] polls the event loop.
pub fn connect(config: &BrokerConfig) -> (MqttPublisher, BrokerListener) {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive);

    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let listener = BrokerListener {
        client: client.clone(),
        eventloop,
        topics: config.topics.clone(),
        policy: config.reconnect.clone(),
    };
    (MqttPublisher::new(client), listener)
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Why [`BrokerListener::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerExit {
    /// The shutdown signal fired.
    Stopped,
    /// Reconnection is disabled and the connection failed.
    Disabled,
    /// `max_attempts` consecutive reconnects failed.
    GaveUp { attempts: u32 },
}

/// Drives the MQTT event loop and fans broker payloads out to clients.
pub struct BrokerListener {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Topics,
    policy: ReconnectPolicy,
}

impl BrokerListener {
    /// Run until shutdown, or until the [`ReconnectPolicy`] gives up.
    ///
    /// `shutdown` fires when its value changes or its sender is dropped.
    pub async fn run(
        mut self,
        registry: Arc<ConnectionRegistry>,
        mut shutdown: watch::Receiver<bool>,
    ) -> ListenerExit {
        let mut backoff = Backoff::new(self.policy.clone());

        loop {
            let polled = tokio::select! {
                _ = shutdown.changed() => {
                    info!("broker listener shutting down");
                    let _ = self.client.try_disconnect();
                    return ListenerExit::Stopped;
                }
                polled = self.eventloop.poll() => polled,
            };

            match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("connected to MQTT broker");
                    backoff.reset();
                    self.subscribe_all();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = BrokerMessage::from_bytes(publish.topic, &publish.payload);
                    forward(&registry, &message);
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "MQTT connection error");
                    match backoff.next_delay() {
                        Some(delay) => {
                            warn!(
                                attempt = backoff.attempts(),
                                delay_ms = delay.as_millis() as u64,
                                "reconnecting to MQTT broker"
                            );
                            tokio::select! {
                                _ = shutdown.changed() => {
                                    let _ = self.client.try_disconnect();
                                    return ListenerExit::Stopped;
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => {
                            let _ = self.client.try_disconnect();
                            if self.policy.enabled {
                                error!(attempts = backoff.attempts(), "giving up on MQTT broker");
                                return ListenerExit::GaveUp {
                                    attempts: backoff.attempts(),
                                };
                            }
                            warn!("MQTT link closed; broker messages will no longer be relayed");
                            return ListenerExit::Disabled;
                        }
                    }
                }
            }
        }
    }

    fn subscribe_all(&self) {
        for topic in self.topics.all() {
            match self.client.try_subscribe(topic, QoS::AtMostOnce) {
                Ok(()) => debug!(topic, "subscribed"),
                Err(e) => error!(topic, error = %e, "MQTT subscribe failed"),
            }
        }
    }
}

/// Copy one broker message verbatim to every open connection.
///
/// Returns the number of connections the payload was queued for.
pub fn forward(registry: &ConnectionRegistry, message: &BrokerMessage) -> usize {
    info!(
        topic = %message.topic,
        payload = %message.payload,
        received_at = %message.received_at.to_rfc3339(),
        "MQTT message"
    );
    registry.broadcast(&message.payload)
}
