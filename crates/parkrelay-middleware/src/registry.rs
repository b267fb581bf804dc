//! Registry of open client connections.
//!
//! Every connection gets an unbounded [`mpsc`] queue.  The broker listener
//! calls [`ConnectionRegistry::broadcast`] to copy a payload into every
//! queue, and the gateway drains each queue into its WebSocket.
//!
//! Queues are unbounded: a slow client never blocks the broker listener or
//! the other clients, and no frame is dropped while the connection is open.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use parkrelay_types::{ConnectionId, RelayError};
use tokio::sync::mpsc;
use tracing::debug;

/// Receiving half handed to the connection task on registration.
pub type FrameReceiver = mpsc::UnboundedReceiver<String>;

/// Shared set of open connections.  Wrap it in an `Arc` to share it between
/// the broker listener and the gateway.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<String>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new connection and return its id together with the queue its
    /// outbound frames arrive on.
    pub fn register(&self) -> (ConnectionId, FrameReceiver) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.write().insert(id, tx);
        debug!(connection = %id, "connection registered");
        (id, rx)
    }

    /// Remove a connection.  Returns `false` if it was not registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.write().remove(&id).is_some();
        if removed {
            debug!(connection = %id, "connection unregistered");
        }
        removed
    }

    /// Copy `payload` to every open connection.
    ///
    /// Returns the number of connections the payload was queued for.
    /// Connections whose receiver has already been dropped are pruned.
    pub fn broadcast(&self, payload: &str) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let connections = self.read();
            for (id, tx) in connections.iter() {
                if tx.send(payload.to_owned()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(*id);
                }
            }
        }
        if !closed.is_empty() {
            let mut connections = self.write();
            for id in closed {
                connections.remove(&id);
                debug!(connection = %id, "pruned closed connection");
            }
        }
        delivered
    }

    /// Queue `frame` for a single connection.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionClosed`] if the connection is unknown
    /// or its receiver has been dropped.
    pub fn send_to(&self, id: ConnectionId, frame: impl Into<String>) -> Result<(), RelayError> {
        let connections = self.read();
        let tx = connections
            .get(&id)
            .ok_or(RelayError::ConnectionClosed(id))?;
        tx.send(frame.into())
            .map_err(|_| RelayError::ConnectionClosed(id))
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave the map half-updated, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, mpsc::UnboundedSender<String>>> {
        self.connections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, mpsc::UnboundedSender<String>>> {
        self.connections.write().unwrap_or_else(|e| e.into_inner())
    }
}
