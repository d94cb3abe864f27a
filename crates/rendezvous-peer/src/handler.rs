//! Application-facing session events

use rendezvous_core::{EndpointId, RoomSnapshot};

use crate::error::SessionError;

/// Callbacks the owning application must implement
///
/// Calls happen on the session's task in the order events occur.
pub trait SessionHandler {
    /// Room created, joined, queried or changed host
    fn on_room_update(&mut self, room: &RoomSnapshot);

    /// Direct channel to `peer` is open
    fn on_peer_connected(&mut self, peer: &EndpointId);

    /// Direct channel to `peer` is gone
    fn on_peer_disconnected(&mut self, peer: &EndpointId);

    /// Application data arrived from `peer`
    fn on_message(&mut self, peer: &EndpointId, data: &[u8]);

    /// A request was rejected or something failed
    fn on_error(&mut self, error: &SessionError);
}
