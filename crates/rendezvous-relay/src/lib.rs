//! Rendezvous Relay
//!
//! WebSocket relay that lets browser endpoints find each other and exchange
//! the handshake payloads needed to open a direct channel.
//!
//! # Protocol
//!
//! 1. Endpoint connects and receives `welcome` with its relay-assigned id
//! 2. Endpoint creates a room (becoming host) or joins one by code
//! 3. Relay tells existing members about the new peer
//! 4. Members exchange offers, answers and candidates through the relay
//! 5. Once the direct channel is open the relay is no longer on the data path

pub mod liveness;
pub mod reaper;
pub mod registry;
pub mod relay;
pub mod room;
pub mod server;

pub use liveness::LivenessMonitor;
pub use reaper::RoomReaper;
pub use registry::{Outbound, Registry};
pub use relay::Relay;
pub use room::{Room, RoomTable};
pub use server::RelayServer;
