//! Rendezvous Peer - Endpoint-side connection manager
//!
//! Talks to the relay on behalf of one endpoint and keeps one negotiation
//! per remote endpoint in the room. The direct transport itself is supplied
//! by the application through [`TransportFactory`]; session events are
//! reported through [`SessionHandler`].
//!
//! ```text
//!   application ──SessionHandle──▶ RelayClient ──WebSocket──▶ relay
//!        ▲                            │
//!        └──── SessionHandler ◀── PeerManager ◀── TransportEvents
//! ```

pub mod backoff;
pub mod client;
pub mod error;
pub mod handler;
pub mod manager;
pub mod signal;
pub mod transport;

pub use backoff::Backoff;
pub use client::{reconnect, RelayClient, SessionHandle};
pub use error::{SessionError, TransportError};
pub use handler::SessionHandler;
pub use manager::{PeerManager, PeerState};
pub use signal::Signal;
pub use transport::{PeerTransport, Role, TransportEvent, TransportEvents, TransportFactory};
