//! Relay protocol messages
//!
//! Every envelope is a JSON object tagged by its `type` field, e.g.
//! `{"type":"join-room","roomId":"K7WQ3M"}`. Handshake payloads (`signal`,
//! `candidate`) are opaque JSON values the relay forwards untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCode, RelayError};
use crate::ids::{EndpointId, RoomId};

/// Messages an endpoint sends to the relay
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Create a room; the caller becomes host
    CreateRoom {
        /// Optional preferred room code
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },

    /// Request membership in a room
    JoinRoom { room_id: RoomId },

    /// Leave the current room
    LeaveRoom,

    /// Session offer for another endpoint
    Offer { to: EndpointId, signal: Value },

    /// Session answer for another endpoint
    Answer { to: EndpointId, signal: Value },

    /// Connectivity candidate for another endpoint
    IceCandidate { to: EndpointId, candidate: Value },

    /// Query a room snapshot
    GetRoomInfo { room_id: RoomId },
}

/// Messages the relay sends to an endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Assigns the endpoint its identifier
    Welcome { id: EndpointId },

    /// Room created, the receiver is host
    RoomCreated { room_id: RoomId, room: RoomSnapshot },

    /// Successfully joined a room
    RoomJoined { room_id: RoomId, room: RoomSnapshot },

    /// Join or query for a room that does not exist
    RoomNotFound { room_id: RoomId },

    /// Join rejected, room at capacity
    RoomFull { room_id: RoomId },

    /// Explicit leave acknowledged
    RoomLeft { room_id: RoomId },

    /// Another endpoint joined the receiver's room
    PeerJoined { peer_id: EndpointId },

    /// Another endpoint left the receiver's room
    PeerLeft { peer_id: EndpointId },

    /// The room host migrated to another member
    HostChanged { room_id: RoomId, host_id: EndpointId },

    /// Relayed offer
    Offer {
        from: EndpointId,
        to: EndpointId,
        signal: Value,
    },

    /// Relayed answer
    Answer {
        from: EndpointId,
        to: EndpointId,
        signal: Value,
    },

    /// Relayed connectivity candidate
    IceCandidate {
        from: EndpointId,
        to: EndpointId,
        candidate: Value,
    },

    /// Room snapshot in response to `get-room-info`
    RoomInfo { room: RoomSnapshot },

    /// Error response
    Error { code: ErrorCode, message: String },
}

/// Point-in-time view of a room
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub id: RoomId,
    /// `None` only while a room is empty
    pub host_id: Option<EndpointId>,
    /// Members in join order
    pub members: Vec<EndpointId>,
    pub member_count: usize,
}

impl ClientMessage {
    /// Every `type` value a client may send
    pub const KINDS: &'static [&'static str] = &[
        "create-room",
        "join-room",
        "leave-room",
        "offer",
        "answer",
        "ice-candidate",
        "get-room-info",
    ];

    /// Parse an inbound envelope
    ///
    /// A well-formed envelope with an unrecognized `type` yields
    /// `UnknownMessageType`; anything else that fails yields `MalformedMessage`.
    pub fn parse(json: &str) -> Result<Self, RelayError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| RelayError::MalformedMessage(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::MalformedMessage("missing \"type\" field".into()))?;

        if !Self::KINDS.contains(&kind) {
            return Err(RelayError::UnknownMessageType(kind.to_string()));
        }

        serde_json::from_value(value).map_err(|e| RelayError::MalformedMessage(e.to_string()))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    /// Create an error message
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_wire_format() {
        let msg = ClientMessage::parse(r#"{"type":"join-room","roomId":"ABC123"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinRoom {
                room_id: RoomId::from("ABC123")
            }
        );

        let msg = ClientMessage::parse(r#"{"type":"create-room"}"#).unwrap();
        assert_eq!(msg, ClientMessage::CreateRoom { room_id: None });

        let msg = ClientMessage::parse(r#"{"type":"leave-room"}"#).unwrap();
        assert_eq!(msg, ClientMessage::LeaveRoom);
    }

    #[test]
    fn test_handshake_payload_is_opaque() {
        let msg = ClientMessage::parse(
            r#"{"type":"ice-candidate","to":"e2","candidate":{"candidate":"a=1","sdpMid":"0"}}"#,
        )
        .unwrap();

        match msg {
            ClientMessage::IceCandidate { to, candidate } => {
                assert_eq!(to.as_str(), "e2");
                assert_eq!(candidate, json!({"candidate": "a=1", "sdpMid": "0"}));
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_distinguished_from_malformed() {
        let err = ClientMessage::parse(r#"{"type":"register","id":"x"}"#).unwrap_err();
        assert_eq!(err, RelayError::UnknownMessageType("register".into()));

        // Known type, missing mandatory field
        let err = ClientMessage::parse(r#"{"type":"join-room"}"#).unwrap_err();
        assert!(matches!(err, RelayError::MalformedMessage(_)));

        let err = ClientMessage::parse("not json").unwrap_err();
        assert!(matches!(err, RelayError::MalformedMessage(_)));

        let err = ClientMessage::parse(r#"{"roomId":"ABC123"}"#).unwrap_err();
        assert!(matches!(err, RelayError::MalformedMessage(_)));
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let msg =
            ClientMessage::parse(r#"{"type":"create-room","roomId":"ABC123","hostId":"h"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::CreateRoom {
                room_id: Some(RoomId::from("ABC123"))
            }
        );
    }

    #[test]
    fn test_server_message_wire_format() {
        let msg = ServerMessage::RoomJoined {
            room_id: RoomId::from("ABC123"),
            room: RoomSnapshot {
                id: RoomId::from("ABC123"),
                host_id: Some(EndpointId::from("e1")),
                members: vec![EndpointId::from("e1"), EndpointId::from("e2")],
                member_count: 2,
            },
        };

        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "room-joined",
                "roomId": "ABC123",
                "room": {
                    "id": "ABC123",
                    "hostId": "e1",
                    "members": ["e1", "e2"],
                    "memberCount": 2
                }
            })
        );
    }

    #[test]
    fn test_peer_events_wire_format() {
        let json = ServerMessage::PeerJoined {
            peer_id: EndpointId::from("e2"),
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"peer-joined","peerId":"e2"}"#);

        let parsed = ServerMessage::from_json(r#"{"type":"host-changed","roomId":"R","hostId":"e2"}"#)
            .unwrap();
        assert_eq!(
            parsed,
            ServerMessage::HostChanged {
                room_id: RoomId::from("R"),
                host_id: EndpointId::from("e2"),
            }
        );
    }

    #[test]
    fn test_error_message() {
        let msg = ServerMessage::error(ErrorCode::RoomExists, "room ABC123 already exists");
        let json = msg.to_json().unwrap();

        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains("room-exists"));
        assert!(json.contains("already exists"));
    }
}
