//! Error types for the relay protocol

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{EndpointId, RoomId};
use crate::protocol::ServerMessage;

/// Every way a relay operation can be rejected
///
/// Each variant is reported back to the endpoint that caused it, either as an
/// `error` envelope or as a type-specific rejection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(EndpointId),

    #[error("room {0} already exists")]
    RoomExists(RoomId),

    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    #[error("room {0} is full")]
    RoomFull(RoomId),

    #[error("target peer {0} not found")]
    TargetNotFound(EndpointId),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("already in room {0}")]
    AlreadyInRoom(RoomId),

    #[error("not in a room")]
    NotInRoom,

    #[error("invalid room id: {0}")]
    InvalidRoomId(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Wire error codes carried by `error` envelopes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    UnknownEndpoint,
    RoomExists,
    RoomNotFound,
    RoomFull,
    TargetNotFound,
    UnknownMessageType,
    MalformedMessage,
    AlreadyInRoom,
    NotInRoom,
    InvalidRoomId,
    Internal,
}

impl From<&RelayError> for ErrorCode {
    fn from(e: &RelayError) -> Self {
        match e {
            RelayError::UnknownEndpoint(_) => ErrorCode::UnknownEndpoint,
            RelayError::RoomExists(_) => ErrorCode::RoomExists,
            RelayError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            RelayError::RoomFull(_) => ErrorCode::RoomFull,
            RelayError::TargetNotFound(_) => ErrorCode::TargetNotFound,
            RelayError::UnknownMessageType(_) => ErrorCode::UnknownMessageType,
            RelayError::MalformedMessage(_) => ErrorCode::MalformedMessage,
            RelayError::AlreadyInRoom(_) => ErrorCode::AlreadyInRoom,
            RelayError::NotInRoom => ErrorCode::NotInRoom,
            RelayError::InvalidRoomId(_) => ErrorCode::InvalidRoomId,
            RelayError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<getrandom::Error> for RelayError {
    fn from(e: getrandom::Error) -> Self {
        RelayError::Internal(format!("entropy source unavailable: {}", e))
    }
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::from(self)
    }

    /// The message reporting this error to the endpoint that caused it
    pub fn to_message(&self) -> ServerMessage {
        match self {
            RelayError::RoomNotFound(room_id) => ServerMessage::RoomNotFound {
                room_id: room_id.clone(),
            },
            RelayError::RoomFull(room_id) => ServerMessage::RoomFull {
                room_id: room_id.clone(),
            },
            other => ServerMessage::error(other.code(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_specific_rejections() {
        let msg = RelayError::RoomFull(RoomId::from("ABC123")).to_message();
        assert_eq!(
            msg,
            ServerMessage::RoomFull {
                room_id: RoomId::from("ABC123")
            }
        );

        let msg = RelayError::RoomNotFound(RoomId::from("ABC123")).to_message();
        assert!(matches!(msg, ServerMessage::RoomNotFound { .. }));
    }

    #[test]
    fn test_generic_errors_become_error_envelopes() {
        let err = RelayError::TargetNotFound(EndpointId::from("gone"));
        match err.to_message() {
            ServerMessage::Error { code, message } => {
                assert_eq!(code, ErrorCode::TargetNotFound);
                assert!(message.contains("gone"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_error_code_wire_names() {
        let json = serde_json::to_string(&ErrorCode::UnknownMessageType).unwrap();
        assert_eq!(json, "\"unknown-message-type\"");
    }
}
