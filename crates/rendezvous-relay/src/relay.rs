//! Message router
//!
//! `Relay` is the one service object connection handlers talk to. It owns the
//! endpoint registry and the room table and only exposes synchronized
//! operations on them.

use std::time::Instant;

use tracing::{debug, info, warn};

use rendezvous_core::{
    ClientMessage, EndpointId, RelayConfig, RelayError, RoomId, ServerMessage,
};

use crate::registry::{OutboundTx, Registry};
use crate::room::RoomTable;

/// Relay state shared by every connection
pub struct Relay {
    registry: Registry,
    rooms: RoomTable,
    config: RelayConfig,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: Registry::new(),
            rooms: RoomTable::new(config.max_members_per_room),
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Register a new connection and greet it with its id
    pub fn connect(&self, tx: OutboundTx) -> Result<EndpointId, RelayError> {
        let id = self.registry.register(tx)?;
        self.registry.send(&id, ServerMessage::Welcome { id: id.clone() })?;
        debug!("Endpoint registered: {}", id);
        Ok(id)
    }

    /// Handle one inbound text frame, answering failures to the sender
    pub fn handle_text(&self, from: &EndpointId, text: &str) {
        self.registry.mark_alive(from);

        let result = ClientMessage::parse(text).and_then(|msg| self.dispatch(from, msg));

        if let Err(e) = result {
            debug!("Rejected message from {}: {}", from, e);
            self.registry.deliver(from, e.to_message());
        }
    }

    /// Route a parsed message
    pub fn dispatch(&self, from: &EndpointId, msg: ClientMessage) -> Result<(), RelayError> {
        match msg {
            ClientMessage::CreateRoom { room_id } => {
                self.rooms.create(&self.registry, from, room_id)?;
            }

            ClientMessage::JoinRoom { room_id } => {
                self.rooms.join(&self.registry, &room_id, from)?;
            }

            ClientMessage::LeaveRoom => {
                let room_id = self.leave_room(from)?.ok_or(RelayError::NotInRoom)?;
                self.registry.send(from, ServerMessage::RoomLeft { room_id })?;
            }

            ClientMessage::Offer { to, signal } => {
                let msg = ServerMessage::Offer {
                    from: from.clone(),
                    to: to.clone(),
                    signal,
                };
                self.forward(to, msg)?;
            }

            ClientMessage::Answer { to, signal } => {
                let msg = ServerMessage::Answer {
                    from: from.clone(),
                    to: to.clone(),
                    signal,
                };
                self.forward(to, msg)?;
            }

            ClientMessage::IceCandidate { to, candidate } => {
                let msg = ServerMessage::IceCandidate {
                    from: from.clone(),
                    to: to.clone(),
                    candidate,
                };
                self.forward(to, msg)?;
            }

            ClientMessage::GetRoomInfo { room_id } => {
                let room = self.rooms.snapshot(&room_id)?;
                self.registry.send(from, ServerMessage::RoomInfo { room })?;
            }
        }

        Ok(())
    }

    /// Point-to-point relay of a handshake payload
    fn forward(&self, to: EndpointId, msg: ServerMessage) -> Result<(), RelayError> {
        self.registry
            .send(&to, msg)
            .map_err(|_| RelayError::TargetNotFound(to))
    }

    /// Leave the endpoint's current room, if any
    fn leave_room(&self, endpoint: &EndpointId) -> Result<Option<RoomId>, RelayError> {
        let room_id = self.registry.take_room(endpoint)?;
        if let Some(room_id) = &room_id {
            self.rooms.leave(&self.registry, room_id, endpoint);
        }
        Ok(room_id)
    }

    /// Drop an endpoint and run room-leave cleanup
    ///
    /// Used for explicit closes, transport failures, liveness timeouts and
    /// shutdown alike. Calling it twice is harmless.
    pub fn disconnect(&self, endpoint: &EndpointId) {
        let Some(state) = self.registry.remove(endpoint) else {
            return;
        };

        if let Some(room_id) = state.room() {
            self.rooms.leave(&self.registry, room_id, endpoint);
        }

        info!(
            "Endpoint {} disconnected after {:?}",
            endpoint,
            state.connected_at().elapsed()
        );
    }

    /// One liveness round; endpoints silent since the previous round are
    /// disconnected. Returns the disconnected ids.
    pub fn sweep_liveness(&self) -> Vec<EndpointId> {
        let dead = self.registry.probe_all();
        for endpoint in &dead {
            warn!("Endpoint {} missed a liveness probe, disconnecting", endpoint);
            self.disconnect(endpoint);
        }
        dead
    }

    /// Delete rooms empty for longer than the retention window
    pub fn reap_rooms(&self, now: Instant) -> Vec<RoomId> {
        self.rooms.reap(now, self.config.room_retention())
    }

    /// Record inbound traffic from an endpoint
    pub fn mark_alive(&self, endpoint: &EndpointId) {
        self.registry.mark_alive(endpoint);
    }

    /// Ids of all connected endpoints
    pub fn endpoints(&self) -> Vec<EndpointId> {
        self.registry.ids()
    }

    /// Get room count (for monitoring)
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Get endpoint count (for monitoring)
    pub fn endpoint_count(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    use rendezvous_core::ErrorCode;

    use crate::registry::Outbound;

    struct TestEndpoint {
        id: EndpointId,
        rx: mpsc::UnboundedReceiver<Outbound>,
    }

    impl TestEndpoint {
        fn connect(relay: &Relay) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = relay.connect(tx).unwrap();
            let mut endpoint = Self { id, rx };
            assert_eq!(
                endpoint.recv(),
                vec![ServerMessage::Welcome {
                    id: endpoint.id.clone()
                }]
            );
            endpoint
        }

        fn send(&self, relay: &Relay, json: serde_json::Value) {
            relay.handle_text(&self.id, &json.to_string());
        }

        fn recv(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(item) = self.rx.try_recv() {
                if let Outbound::Message(msg) = item {
                    out.push(msg);
                }
            }
            out
        }

        fn recv_one(&mut self) -> ServerMessage {
            let mut msgs = self.recv();
            assert_eq!(msgs.len(), 1, "expected exactly one message: {:?}", msgs);
            msgs.remove(0)
        }
    }

    fn relay() -> Relay {
        Relay::new(RelayConfig::default())
    }

    fn create_room(relay: &Relay, host: &mut TestEndpoint) -> RoomId {
        host.send(relay, json!({"type": "create-room"}));
        match host.recv_one() {
            ServerMessage::RoomCreated { room_id, .. } => room_id,
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_end_to_end_scenario() {
        let relay = relay();
        let mut e1 = TestEndpoint::connect(&relay);
        let mut e2 = TestEndpoint::connect(&relay);

        e1.send(&relay, json!({"type": "create-room"}));
        let room_id = match e1.recv_one() {
            ServerMessage::RoomCreated { room_id, room } => {
                assert_eq!(room_id.as_str().len(), 6);
                assert_eq!(room.host_id, Some(e1.id.clone()));
                assert_eq!(room.members, vec![e1.id.clone()]);
                room_id
            }
            other => panic!("unexpected: {:?}", other),
        };

        e2.send(&relay, json!({"type": "join-room", "roomId": room_id}));
        match e2.recv_one() {
            ServerMessage::RoomJoined { room, .. } => {
                assert_eq!(room.host_id, Some(e1.id.clone()));
                assert_eq!(room.members, vec![e1.id.clone(), e2.id.clone()]);
                assert_eq!(room.member_count, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(
            e1.recv_one(),
            ServerMessage::PeerJoined {
                peer_id: e2.id.clone()
            }
        );

        e1.send(&relay, json!({"type": "offer", "to": e2.id, "signal": "X"}));
        assert_eq!(
            e2.recv_one(),
            ServerMessage::Offer {
                from: e1.id.clone(),
                to: e2.id.clone(),
                signal: json!("X"),
            }
        );

        relay.disconnect(&e1.id);
        assert_eq!(
            e2.recv(),
            vec![
                ServerMessage::PeerLeft {
                    peer_id: e1.id.clone()
                },
                ServerMessage::HostChanged {
                    room_id: room_id.clone(),
                    host_id: e2.id.clone(),
                },
            ]
        );

        e2.send(&relay, json!({"type": "get-room-info", "roomId": room_id}));
        match e2.recv_one() {
            ServerMessage::RoomInfo { room } => {
                assert_eq!(room.host_id, Some(e2.id.clone()));
                assert_eq!(room.members, vec![e2.id.clone()]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_answer_and_candidate_relay() {
        let relay = relay();
        let e1 = TestEndpoint::connect(&relay);
        let mut e2 = TestEndpoint::connect(&relay);

        let sdp = json!({"type": "answer", "sdp": "v=0"});
        e1.send(&relay, json!({"type": "answer", "to": e2.id, "signal": sdp}));
        assert_eq!(
            e2.recv_one(),
            ServerMessage::Answer {
                from: e1.id.clone(),
                to: e2.id.clone(),
                signal: sdp,
            }
        );

        let candidate = json!({"candidate": "candidate:1 1 udp", "sdpMLineIndex": 0});
        e1.send(
            &relay,
            json!({"type": "ice-candidate", "to": e2.id, "candidate": candidate}),
        );
        assert_eq!(
            e2.recv_one(),
            ServerMessage::IceCandidate {
                from: e1.id.clone(),
                to: e2.id.clone(),
                candidate,
            }
        );
    }

    #[test]
    fn test_relay_to_vanished_target() {
        let relay = relay();
        let mut e1 = TestEndpoint::connect(&relay);
        let e2 = TestEndpoint::connect(&relay);
        relay.disconnect(&e2.id);

        e1.send(&relay, json!({"type": "offer", "to": e2.id, "signal": {}}));
        match e1.recv_one() {
            ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::TargetNotFound),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_and_malformed_messages_are_answered() {
        let relay = relay();
        let mut e1 = TestEndpoint::connect(&relay);

        e1.send(&relay, json!({"type": "register", "id": "spoofed"}));
        match e1.recv_one() {
            ServerMessage::Error { code, message } => {
                assert_eq!(code, ErrorCode::UnknownMessageType);
                assert!(message.contains("register"));
            }
            other => panic!("unexpected: {:?}", other),
        }

        relay.handle_text(&e1.id, "{not json");
        match e1.recv_one() {
            ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::MalformedMessage),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_join_rejections() {
        let relay = Relay::new(RelayConfig {
            max_members_per_room: 2,
            ..RelayConfig::default()
        });
        let mut host = TestEndpoint::connect(&relay);
        let mut second = TestEndpoint::connect(&relay);
        let mut third = TestEndpoint::connect(&relay);
        let room_id = create_room(&relay, &mut host);

        third.send(&relay, json!({"type": "join-room", "roomId": "ZZZZZZ"}));
        assert_eq!(
            third.recv_one(),
            ServerMessage::RoomNotFound {
                room_id: RoomId::from("ZZZZZZ")
            }
        );

        second.send(&relay, json!({"type": "join-room", "roomId": room_id}));
        second.recv_one();
        host.recv_one();

        third.send(&relay, json!({"type": "join-room", "roomId": room_id}));
        assert_eq!(
            third.recv_one(),
            ServerMessage::RoomFull {
                room_id: room_id.clone()
            }
        );
        // Nobody hears about the rejected join
        assert!(host.recv().is_empty());
        assert!(second.recv().is_empty());
    }

    #[test]
    fn test_create_existing_room() {
        let relay = relay();
        let mut e1 = TestEndpoint::connect(&relay);
        let mut e2 = TestEndpoint::connect(&relay);

        e1.send(&relay, json!({"type": "create-room", "roomId": "LOBBY1"}));
        assert!(matches!(e1.recv_one(), ServerMessage::RoomCreated { .. }));

        e2.send(&relay, json!({"type": "create-room", "roomId": "LOBBY1"}));
        match e2.recv_one() {
            ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::RoomExists),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_explicit_leave() {
        let relay = relay();
        let mut host = TestEndpoint::connect(&relay);
        let mut guest = TestEndpoint::connect(&relay);
        let room_id = create_room(&relay, &mut host);

        guest.send(&relay, json!({"type": "join-room", "roomId": room_id}));
        guest.recv();
        host.recv();

        guest.send(&relay, json!({"type": "leave-room"}));
        assert_eq!(
            guest.recv_one(),
            ServerMessage::RoomLeft {
                room_id: room_id.clone()
            }
        );
        assert_eq!(
            host.recv_one(),
            ServerMessage::PeerLeft {
                peer_id: guest.id.clone()
            }
        );

        guest.send(&relay, json!({"type": "leave-room"}));
        match guest.recv_one() {
            ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::NotInRoom),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_room_info_is_idempotent() {
        let relay = relay();
        let mut host = TestEndpoint::connect(&relay);
        let room_id = create_room(&relay, &mut host);

        let query = json!({"type": "get-room-info", "roomId": room_id});
        host.send(&relay, query.clone());
        let first = host.recv_one();
        host.send(&relay, query);
        let second = host.recv_one();

        assert!(matches!(first, ServerMessage::RoomInfo { .. }));
        assert_eq!(first, second);
    }

    #[test]
    fn test_liveness_sweep_disconnects_silent_endpoints() {
        let relay = relay();
        let mut host = TestEndpoint::connect(&relay);
        let mut guest = TestEndpoint::connect(&relay);
        let room_id = create_room(&relay, &mut host);
        guest.send(&relay, json!({"type": "join-room", "roomId": room_id}));
        guest.recv();
        host.recv();

        assert!(relay.sweep_liveness().is_empty());

        // Only the guest acknowledges the probe
        relay.mark_alive(&guest.id);
        assert_eq!(relay.sweep_liveness(), vec![host.id.clone()]);
        assert_eq!(relay.endpoint_count(), 1);

        let msgs = guest.recv();
        assert!(msgs.contains(&ServerMessage::PeerLeft {
            peer_id: host.id.clone()
        }));
        assert!(msgs.contains(&ServerMessage::HostChanged {
            room_id,
            host_id: guest.id.clone(),
        }));
    }

    #[test]
    fn test_empty_room_reaped_after_retention() {
        let relay = relay();
        let mut host = TestEndpoint::connect(&relay);
        let mut observer = TestEndpoint::connect(&relay);
        let room_id = create_room(&relay, &mut host);

        relay.disconnect(&host.id);
        let now = Instant::now();

        assert!(relay.reap_rooms(now + Duration::from_secs(60)).is_empty());
        observer.send(&relay, json!({"type": "get-room-info", "roomId": room_id}));
        assert!(matches!(observer.recv_one(), ServerMessage::RoomInfo { .. }));

        assert_eq!(
            relay.reap_rooms(now + Duration::from_secs(2 * 3600)),
            vec![room_id.clone()]
        );
        observer.send(&relay, json!({"type": "get-room-info", "roomId": room_id}));
        assert_eq!(
            observer.recv_one(),
            ServerMessage::RoomNotFound { room_id }
        );
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let relay = relay();
        let e1 = TestEndpoint::connect(&relay);

        relay.disconnect(&e1.id);
        relay.disconnect(&e1.id);
        assert_eq!(relay.endpoint_count(), 0);
    }
}
