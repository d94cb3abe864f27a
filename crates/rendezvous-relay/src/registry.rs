//! Endpoint registry
//!
//! Maps relay-assigned endpoint ids to the outbound queue of their live
//! connection. This is the source of truth for whether an endpoint is
//! reachable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use rendezvous_core::{EndpointId, RelayError, RoomId, ServerMessage};

/// Items queued for a connection's writer task
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    /// Protocol message, sent as a text frame
    Message(ServerMessage),
    /// Liveness probe, sent as a WebSocket ping frame
    Probe,
}

/// Sending half of a connection's outbound queue
pub type OutboundTx = mpsc::UnboundedSender<Outbound>;

/// A registered endpoint
pub struct Endpoint {
    tx: OutboundTx,
    room: Option<RoomId>,
    alive: AtomicBool,
    connected_at: Instant,
}

impl Endpoint {
    /// Room this endpoint currently belongs to
    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }
}

/// Registry of connected endpoints
#[derive(Default)]
pub struct Registry {
    endpoints: DashMap<EndpointId, Endpoint>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under a freshly generated id
    pub fn register(&self, tx: OutboundTx) -> Result<EndpointId, RelayError> {
        loop {
            let id = EndpointId::generate()?;
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.endpoints.entry(id.clone()) {
                slot.insert(Endpoint {
                    tx,
                    room: None,
                    alive: AtomicBool::new(true),
                    connected_at: Instant::now(),
                });
                return Ok(id);
            }
        }
    }

    /// Whether the endpoint is registered
    pub fn lookup(&self, id: &EndpointId) -> Result<(), RelayError> {
        if self.endpoints.contains_key(id) {
            Ok(())
        } else {
            Err(RelayError::UnknownEndpoint(id.clone()))
        }
    }

    /// Remove an endpoint, returning its final state
    pub fn remove(&self, id: &EndpointId) -> Option<Endpoint> {
        self.endpoints.remove(id).map(|(_, endpoint)| endpoint)
    }

    /// Queue a message for an endpoint
    pub fn send(&self, id: &EndpointId, msg: ServerMessage) -> Result<(), RelayError> {
        self.enqueue(id, Outbound::Message(msg))
    }

    /// Queue a message, logging instead of failing if the endpoint is gone
    pub fn deliver(&self, id: &EndpointId, msg: ServerMessage) {
        if let Err(e) = self.send(id, msg) {
            debug!("Dropping notification: {}", e);
        }
    }

    fn enqueue(&self, id: &EndpointId, item: Outbound) -> Result<(), RelayError> {
        let endpoint = self
            .endpoints
            .get(id)
            .ok_or_else(|| RelayError::UnknownEndpoint(id.clone()))?;

        endpoint
            .tx
            .send(item)
            .map_err(|_| RelayError::UnknownEndpoint(id.clone()))
    }

    /// Current room of an endpoint
    pub fn room_of(&self, id: &EndpointId) -> Result<Option<RoomId>, RelayError> {
        self.endpoints
            .get(id)
            .map(|e| e.room.clone())
            .ok_or_else(|| RelayError::UnknownEndpoint(id.clone()))
    }

    /// Record room membership; false if the endpoint is gone
    pub fn set_room(&self, id: &EndpointId, room: RoomId) -> bool {
        match self.endpoints.get_mut(id) {
            Some(mut endpoint) => {
                endpoint.room = Some(room);
                true
            }
            None => false,
        }
    }

    /// Clear and return room membership
    pub fn take_room(&self, id: &EndpointId) -> Result<Option<RoomId>, RelayError> {
        self.endpoints
            .get_mut(id)
            .map(|mut e| e.room.take())
            .ok_or_else(|| RelayError::UnknownEndpoint(id.clone()))
    }

    /// Record that the endpoint answered a probe or sent traffic
    pub fn mark_alive(&self, id: &EndpointId) {
        if let Some(endpoint) = self.endpoints.get(id) {
            endpoint.alive.store(true, Ordering::Relaxed);
        }
    }

    /// One liveness round: probe every endpoint that answered since the last
    /// round and return the ones that did not.
    pub fn probe_all(&self) -> Vec<EndpointId> {
        let mut unresponsive = Vec::new();

        for entry in self.endpoints.iter() {
            if entry.alive.swap(false, Ordering::Relaxed) {
                let _ = entry.tx.send(Outbound::Probe);
            } else {
                unresponsive.push(entry.key().clone());
            }
        }

        unresponsive
    }

    /// Number of registered endpoints
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Ids of all registered endpoints
    pub fn ids(&self) -> Vec<EndpointId> {
        self.endpoints.iter().map(|e| e.key().clone()).collect()
    }
}
