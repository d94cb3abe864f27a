//! Seam to the local handshake mechanism
//!
//! The direct transport itself (session descriptions, candidate gathering,
//! the data channel) lives outside this crate. A `TransportFactory` creates
//! one `PeerTransport` per remote endpoint; the transport reports back
//! asynchronously through its `TransportEvents` handle.

use serde_json::Value;
use tokio::sync::mpsc;

use rendezvous_core::EndpointId;

use crate::error::TransportError;
use crate::signal::Signal;

/// Which side starts the negotiation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Creates and sends the offer
    Initiator,
    /// Waits for an offer and answers it
    Responder,
}

/// Something a transport reports about its negotiation
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// Outgoing signal data to relay to the remote endpoint
    Signal(Value),
    /// The direct channel is open
    Connected,
    /// Application data from the remote endpoint
    Data(Vec<u8>),
    /// A transport-level failure; does not end the negotiation by itself
    Error(String),
    /// The channel closed or negotiation was abandoned
    Closed,
}

/// Event sink handed to each transport, tagged with its remote endpoint
#[derive(Clone, Debug)]
pub struct TransportEvents {
    remote: EndpointId,
    tx: mpsc::UnboundedSender<(EndpointId, TransportEvent)>,
}

impl TransportEvents {
    pub fn new(remote: EndpointId, tx: mpsc::UnboundedSender<(EndpointId, TransportEvent)>) -> Self {
        Self { remote, tx }
    }

    pub fn remote(&self) -> &EndpointId {
        &self.remote
    }

    /// Report an event; silently dropped once the session is gone
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send((self.remote.clone(), event));
    }
}

/// The local negotiation object for one remote endpoint
pub trait PeerTransport {
    /// Feed a signal received from the remote endpoint
    fn signal(&mut self, signal: &Signal) -> Result<(), TransportError>;

    /// Send application data over the open channel
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Tear down the negotiation or channel
    fn close(&mut self);
}

/// Creates transports on demand
pub trait TransportFactory {
    type Transport: PeerTransport;

    /// Start negotiating with `remote`. An initiator is expected to emit its
    /// offer through `events` soon after.
    fn create(
        &mut self,
        remote: &EndpointId,
        role: Role,
        events: TransportEvents,
    ) -> Result<Self::Transport, TransportError>;
}
