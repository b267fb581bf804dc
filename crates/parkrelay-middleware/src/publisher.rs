//! The publish seam between the relay and the broker.
//!
//! The relay never talks to `rumqttc` directly when forwarding client text;
//! it goes through [`BrokerPublisher`], so the gateway can be exercised
//! against an in-memory publisher.

use async_trait::async_trait;
use parkrelay_types::RelayError;
use rumqttc::{AsyncClient, QoS};

/// Anything that can publish a text payload to a broker topic.
///
/// # Contract
///
/// * One call is one publish attempt; implementations must not retry.
/// * Failures are returned, never swallowed; the caller decides whether to
///   surface them.
/// * A stalled broker link must produce an error, not a pending future.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), RelayError>;
}

/// [`BrokerPublisher`] backed by an MQTT client handle.
///
/// Messages go out at QoS 0 without the retain flag.  Publishing never waits
/// on the event loop: when the request queue is full (broker down, listener
/// backing off) or the loop is gone, the call fails immediately.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BrokerPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), RelayError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| RelayError::Broker(format!("publish to {topic} failed: {e}")))
    }
}
