//! Rendezvous Core - Shared identifiers, wire protocol and configuration
//!
//! This crate contains the types spoken by both sides of the relay: the
//! relay server (`rendezvous-relay`) and the endpoint-side peer manager
//! (`rendezvous-peer`). It has no networking code.

pub mod config;
pub mod error;
pub mod ids;
pub mod protocol;

pub use config::{ClientConfig, Config, ConfigError, ReconnectConfig, RelayConfig};
pub use error::{ErrorCode, RelayError};
pub use ids::{EndpointId, RoomId};
pub use protocol::{ClientMessage, RoomSnapshot, ServerMessage};

/// Length of a room code in characters
pub const ROOM_CODE_LENGTH: usize = 6;

/// Maximum members per room
pub const MAX_MEMBERS_PER_ROOM: usize = 8;

/// Default relay port
pub const DEFAULT_PORT: u16 = 8080;

/// Interval between liveness probes (30 seconds)
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Interval between empty-room sweeps (5 minutes)
pub const REAP_INTERVAL_SECS: u64 = 300;

/// How long an empty room is retained before it may be reaped (1 hour)
pub const ROOM_RETENTION_SECS: u64 = 3600;
