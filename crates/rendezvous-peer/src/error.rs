//! Client-side errors

use thiserror::Error;

use rendezvous_core::{EndpointId, ErrorCode, RoomId};

/// Failure inside a local transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Everything the session reports to the application
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    #[error("room {0} is full")]
    RoomFull(RoomId),

    #[error("relay rejected request ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("transport error with {peer}: {message}")]
    Transport { peer: EndpointId, message: String },

    #[error("peer {0} is not connected")]
    NotConnected(EndpointId),

    #[error("unrecognized signal from local transport for {0}")]
    UnrecognizedSignal(EndpointId),

    #[error("relay connection error: {0}")]
    Connection(String),

    #[error("relay unreachable after {attempts} reconnect attempts")]
    RelayUnreachable { attempts: u32 },
}
