//! Peer-connection state machine
//!
//! One entry per remote endpoint that is being negotiated with or is
//! connected. An entry is created in `Negotiating` (as initiator on
//! `peer-joined`, as responder on an inbound offer), moves to `Connected`
//! when its transport reports an open channel, and is removed on close.
//! No entry means idle or closed.
//!
//! The manager is synchronous and single-threaded: relay messages,
//! transport events and application commands are fed in one at a time, and
//! messages for the relay accumulate in an outbox the driver flushes.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rendezvous_core::{ClientMessage, EndpointId, RoomId, RoomSnapshot, ServerMessage};

use crate::error::SessionError;
use crate::handler::SessionHandler;
use crate::signal::Signal;
use crate::transport::{PeerTransport, Role, TransportEvent, TransportEvents, TransportFactory};

/// Negotiation state of a local peer entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Negotiating,
    Connected,
}

struct PeerEntry<T> {
    transport: T,
    role: Role,
    state: PeerState,
}

/// Local peer entries plus the relay-facing session state
pub struct PeerManager<F: TransportFactory, H: SessionHandler> {
    factory: F,
    handler: H,
    events_tx: mpsc::UnboundedSender<(EndpointId, TransportEvent)>,
    local_id: Option<EndpointId>,
    room: Option<RoomSnapshot>,
    peers: HashMap<EndpointId, PeerEntry<F::Transport>>,
    outbox: VecDeque<ClientMessage>,
}

impl<F: TransportFactory, H: SessionHandler> PeerManager<F, H> {
    /// Create a manager; transports report through `events_tx`
    pub fn new(
        factory: F,
        handler: H,
        events_tx: mpsc::UnboundedSender<(EndpointId, TransportEvent)>,
    ) -> Self {
        Self {
            factory,
            handler,
            events_tx,
            local_id: None,
            room: None,
            peers: HashMap::new(),
            outbox: VecDeque::new(),
        }
    }

    /// Relay-assigned id of this endpoint
    pub fn local_id(&self) -> Option<&EndpointId> {
        self.local_id.as_ref()
    }

    /// Last known state of the current room
    pub fn room(&self) -> Option<&RoomSnapshot> {
        self.room.as_ref()
    }

    pub fn peer_state(&self, peer: &EndpointId) -> Option<PeerState> {
        self.peers.get(peer).map(|entry| entry.state)
    }

    /// Number of local peer entries
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Peers with an open direct channel, sorted
    pub fn connected_peers(&self) -> Vec<EndpointId> {
        let mut peers: Vec<_> = self
            .peers
            .iter()
            .filter(|(_, entry)| entry.state == PeerState::Connected)
            .map(|(id, _)| id.clone())
            .collect();
        peers.sort();
        peers
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Next message waiting for the relay
    pub fn peek_outbound(&self) -> Option<&ClientMessage> {
        self.outbox.front()
    }

    /// Remove the next message once it has been written
    pub fn pop_outbound(&mut self) -> Option<ClientMessage> {
        self.outbox.pop_front()
    }

    /// Take every queued message
    pub fn drain_outbound(&mut self) -> Vec<ClientMessage> {
        self.outbox.drain(..).collect()
    }

    // === Application operations ===

    pub fn create_room(&mut self, room_id: Option<RoomId>) {
        self.outbox.push_back(ClientMessage::CreateRoom { room_id });
    }

    pub fn join_room(&mut self, room_id: RoomId) {
        self.outbox.push_back(ClientMessage::JoinRoom { room_id });
    }

    /// Leave the current room and tear down every peer entry
    pub fn leave_room(&mut self) {
        self.room = None;
        self.close_all();
        self.outbox.push_back(ClientMessage::LeaveRoom);
    }

    pub fn request_room_info(&mut self, room_id: RoomId) {
        self.outbox.push_back(ClientMessage::GetRoomInfo { room_id });
    }

    /// Send data to one connected peer
    pub fn send(&mut self, peer: &EndpointId, data: &[u8]) -> Result<(), SessionError> {
        let entry = self
            .peers
            .get_mut(peer)
            .filter(|entry| entry.state == PeerState::Connected)
            .ok_or_else(|| SessionError::NotConnected(peer.clone()))?;

        entry.transport.send(data).map_err(|e| SessionError::Transport {
            peer: peer.clone(),
            message: e.to_string(),
        })
    }

    /// Send data to every connected peer; returns how many accepted it
    pub fn broadcast(&mut self, data: &[u8]) -> usize {
        let mut sent = 0;

        for (peer, entry) in self.peers.iter_mut() {
            if entry.state != PeerState::Connected {
                continue;
            }
            match entry.transport.send(data) {
                Ok(()) => sent += 1,
                Err(e) => self.handler.on_error(&SessionError::Transport {
                    peer: peer.clone(),
                    message: e.to_string(),
                }),
            }
        }

        sent
    }

    /// Local teardown of one peer entry
    pub fn close_peer(&mut self, peer: &EndpointId) -> bool {
        let Some(mut entry) = self.peers.remove(peer) else {
            return false;
        };

        entry.transport.close();
        debug!("Closed peer entry for {}", peer);

        if entry.state == PeerState::Connected {
            self.handler.on_peer_disconnected(peer);
        }
        true
    }

    /// Tear down every peer entry
    pub fn close_all(&mut self) {
        let mut peers: Vec<_> = self.peers.keys().cloned().collect();
        peers.sort();
        for peer in peers {
            self.close_peer(&peer);
        }
    }

    // === Relay input ===

    /// Apply one message from the relay
    pub fn handle_relay(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Welcome { id } => self.on_welcome(id),

            ServerMessage::RoomCreated { room, .. } | ServerMessage::RoomJoined { room, .. } => {
                info!("In room {} ({} members)", room.id, room.member_count);
                self.handler.on_room_update(&room);
                self.room = Some(room);
            }

            ServerMessage::RoomInfo { room } => {
                if self.room.as_ref().is_some_and(|current| current.id == room.id) {
                    self.room = Some(room.clone());
                }
                self.handler.on_room_update(&room);
            }

            ServerMessage::RoomNotFound { room_id } => {
                self.forget_room(&room_id);
                self.handler.on_error(&SessionError::RoomNotFound(room_id));
            }

            ServerMessage::RoomFull { room_id } => {
                self.forget_room(&room_id);
                self.handler.on_error(&SessionError::RoomFull(room_id));
            }

            ServerMessage::RoomLeft { room_id } => {
                debug!("Left room {}", room_id);
            }

            ServerMessage::PeerJoined { peer_id } => {
                if self.local_id.as_ref() == Some(&peer_id) {
                    return;
                }
                if let Some(room) = self.room.as_mut() {
                    if !room.members.contains(&peer_id) {
                        room.members.push(peer_id.clone());
                        room.member_count = room.members.len();
                    }
                }
                info!("Peer joined: {}", peer_id);
                self.start(peer_id, Role::Initiator);
            }

            ServerMessage::PeerLeft { peer_id } => {
                if let Some(room) = self.room.as_mut() {
                    room.members.retain(|m| m != &peer_id);
                    room.member_count = room.members.len();
                }
                info!("Peer left: {}", peer_id);
                self.close_peer(&peer_id);
            }

            ServerMessage::HostChanged { room_id, host_id } => {
                if let Some(room) = self.room.as_mut().filter(|room| room.id == room_id) {
                    room.host_id = Some(host_id);
                    self.handler.on_room_update(room);
                }
            }

            ServerMessage::Offer { from, signal, .. } => self.on_offer(from, signal),

            ServerMessage::Answer { from, signal, .. } => self.feed(&from, Signal::Answer(signal)),

            ServerMessage::IceCandidate {
                from, candidate, ..
            } => self.feed(&from, Signal::Candidate(candidate)),

            ServerMessage::Error { code, message } => {
                warn!("Relay error ({:?}): {}", code, message);
                self.handler
                    .on_error(&SessionError::Rejected { code, message });
            }
        }
    }

    fn on_welcome(&mut self, id: EndpointId) {
        let previous = self.local_id.replace(id.clone());

        match previous {
            Some(old) if old != id => {
                // Everything in flight was addressed to the old id
                info!("Relay reassigned id {} -> {}", old, id);
                self.close_all();
                self.outbox.retain(|msg| {
                    !matches!(
                        msg,
                        ClientMessage::Offer { .. }
                            | ClientMessage::Answer { .. }
                            | ClientMessage::IceCandidate { .. }
                    )
                });

                if let Some(room) = self.room.take() {
                    info!("Rejoining room {}", room.id);
                    self.outbox
                        .push_back(ClientMessage::JoinRoom { room_id: room.id });
                }
            }
            _ => info!("Registered with relay as {}", id),
        }
    }

    fn forget_room(&mut self, room_id: &RoomId) {
        if self.room.as_ref().is_some_and(|room| &room.id == room_id) {
            self.room = None;
        }
    }

    /// Create a peer entry unless one already exists for `peer`
    fn start(&mut self, peer: EndpointId, role: Role) -> bool {
        if self.peers.contains_key(&peer) {
            debug!("Already negotiating with {}, skipping", peer);
            return false;
        }

        let events = TransportEvents::new(peer.clone(), self.events_tx.clone());
        match self.factory.create(&peer, role, events) {
            Ok(transport) => {
                debug!("Negotiating with {} as {:?}", peer, role);
                self.peers.insert(
                    peer,
                    PeerEntry {
                        transport,
                        role,
                        state: PeerState::Negotiating,
                    },
                );
                true
            }
            Err(e) => {
                self.handler.on_error(&SessionError::Transport {
                    peer,
                    message: e.to_string(),
                });
                false
            }
        }
    }

    fn on_offer(&mut self, from: EndpointId, signal: Value) {
        match self.peers.get(&from).map(|entry| entry.role) {
            Some(Role::Initiator) => {
                debug!("Ignoring offer from {}: local side is initiating", from);
            }
            Some(Role::Responder) => self.feed(&from, Signal::Offer(signal)),
            None => {
                if self.start(from.clone(), Role::Responder) {
                    self.feed(&from, Signal::Offer(signal));
                }
            }
        }
    }

    /// Hand a remote signal to its entry's transport
    fn feed(&mut self, from: &EndpointId, signal: Signal) {
        let Some(entry) = self.peers.get_mut(from) else {
            debug!("Discarding stale signal from {}", from);
            return;
        };

        if let Err(e) = entry.transport.signal(&signal) {
            self.handler.on_error(&SessionError::Transport {
                peer: from.clone(),
                message: e.to_string(),
            });
        }
    }

    // === Transport input ===

    /// Apply one event reported by a local transport
    pub fn handle_transport_event(&mut self, remote: EndpointId, event: TransportEvent) {
        let Some(entry) = self.peers.get_mut(&remote) else {
            debug!("Event for closed peer {}: {:?}", remote, event);
            return;
        };

        match event {
            TransportEvent::Signal(value) => match Signal::classify(value) {
                Some(signal) => self.outbox.push_back(signal.into_message(remote)),
                None => self
                    .handler
                    .on_error(&SessionError::UnrecognizedSignal(remote)),
            },

            TransportEvent::Connected => {
                if entry.state != PeerState::Connected {
                    entry.state = PeerState::Connected;
                    info!("Connected to peer: {}", remote);
                    self.handler.on_peer_connected(&remote);
                }
            }

            TransportEvent::Data(data) => self.handler.on_message(&remote, &data),

            TransportEvent::Error(message) => {
                warn!("Peer {} transport error: {}", remote, message);
                self.handler.on_error(&SessionError::Transport {
                    peer: remote,
                    message,
                });
            }

            TransportEvent::Closed => {
                if let Some(entry) = self.peers.remove(&remote) {
                    info!("Peer connection closed: {}", remote);
                    if entry.state == PeerState::Connected {
                        self.handler.on_peer_disconnected(&remote);
                    }
                }
            }
        }
    }
}
