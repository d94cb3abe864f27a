//! Room management for the relay
//!
//! The room table owns every room. Each room is guarded by its map entry, so
//! membership changes in one room never wait on another room, and the
//! notifications for a change are queued while that guard is held.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use rendezvous_core::{EndpointId, RelayError, RoomId, RoomSnapshot, ServerMessage};

use crate::registry::Registry;

/// Attempts at drawing an unused room code before giving up
const ROOM_CODE_ATTEMPTS: usize = 16;

/// A group of endpoints negotiating direct connections
pub struct Room {
    id: RoomId,
    /// Members in join order
    members: Vec<EndpointId>,
    host: Option<EndpointId>,
    capacity: usize,
    created_at: Instant,
    /// Set while the room has no members
    empty_since: Option<Instant>,
}

/// Result of removing a member
#[derive(Debug, PartialEq, Eq)]
pub struct Departure {
    /// New host, if the departing member was host and others remain
    pub new_host: Option<EndpointId>,
}

impl Room {
    /// Create a new, empty room
    pub fn new(id: RoomId, capacity: usize) -> Self {
        let now = Instant::now();
        Self {
            id,
            members: Vec::new(),
            host: None,
            capacity,
            created_at: now,
            empty_since: Some(now),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Add a member; the first member of an empty room becomes host
    pub fn add_member(&mut self, endpoint: &EndpointId) -> Result<(), RelayError> {
        if self.members.contains(endpoint) {
            return Ok(());
        }

        if self.members.len() >= self.capacity {
            return Err(RelayError::RoomFull(self.id.clone()));
        }

        self.members.push(endpoint.clone());
        if self.host.is_none() {
            self.host = Some(endpoint.clone());
        }
        self.empty_since = None;
        Ok(())
    }

    /// Remove a member, migrating the host role to the earliest remaining
    /// member if needed. `None` if the endpoint was not a member.
    pub fn remove_member(&mut self, endpoint: &EndpointId) -> Option<Departure> {
        let index = self.members.iter().position(|m| m == endpoint)?;
        self.members.remove(index);

        let mut departure = Departure { new_host: None };

        if self.host.as_ref() == Some(endpoint) {
            self.host = self.members.first().cloned();
            departure.new_host = self.host.clone();
        }

        if self.members.is_empty() {
            self.empty_since = Some(Instant::now());
        }

        Some(departure)
    }

    pub fn host(&self) -> Option<&EndpointId> {
        self.host.as_ref()
    }

    /// Members in join order
    pub fn members(&self) -> &[EndpointId] {
        &self.members
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Time since creation
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// How long the room has been empty as of `now`
    pub fn empty_for(&self, now: Instant) -> Option<Duration> {
        self.empty_since.map(|since| now.saturating_duration_since(since))
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id.clone(),
            host_id: self.host.clone(),
            members: self.members.clone(),
            member_count: self.members.len(),
        }
    }
}

/// All live rooms
pub struct RoomTable {
    rooms: DashMap<RoomId, Room>,
    capacity: usize,
}

impl RoomTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity,
        }
    }

    /// Create a room hosted by `host` and acknowledge it with `room-created`
    pub fn create(
        &self,
        registry: &Registry,
        host: &EndpointId,
        requested: Option<RoomId>,
    ) -> Result<RoomSnapshot, RelayError> {
        if let Some(current) = registry.room_of(host)? {
            return Err(RelayError::AlreadyInRoom(current));
        }

        let (id, mut room) = match requested {
            Some(requested) => {
                let id = requested.normalized();
                if !id.is_valid() {
                    return Err(RelayError::InvalidRoomId(requested.to_string()));
                }
                match self.rooms.entry(id.clone()) {
                    Entry::Occupied(_) => return Err(RelayError::RoomExists(id)),
                    Entry::Vacant(slot) => (id.clone(), slot.insert(Room::new(id, self.capacity))),
                }
            }
            None => self.insert_generated()?,
        };

        let joined = room
            .add_member(host)
            .and_then(|()| {
                if registry.set_room(host, id.clone()) {
                    Ok(())
                } else {
                    Err(RelayError::UnknownEndpoint(host.clone()))
                }
            });

        if let Err(e) = joined {
            // The room never became visible with a member; take it back out
            drop(room);
            self.rooms.remove(&id);
            return Err(e);
        }

        let snapshot = room.snapshot();
        registry.deliver(
            host,
            ServerMessage::RoomCreated {
                room_id: id.clone(),
                room: snapshot.clone(),
            },
        );

        info!("Room created: {} by {}", id, host);
        Ok(snapshot)
    }

    fn insert_generated(
        &self,
    ) -> Result<(RoomId, dashmap::mapref::one::RefMut<'_, RoomId, Room>), RelayError> {
        for _ in 0..ROOM_CODE_ATTEMPTS {
            let id = RoomId::generate()?;
            if let Entry::Vacant(slot) = self.rooms.entry(id.clone()) {
                return Ok((id.clone(), slot.insert(Room::new(id, self.capacity))));
            }
        }
        Err(RelayError::Internal("no free room code".into()))
    }

    /// Add `endpoint` to a room
    ///
    /// The joiner receives `room-joined` before any other member hears
    /// `peer-joined`, and both are queued while the room is locked, so no
    /// member can observe the join before it is recorded.
    pub fn join(
        &self,
        registry: &Registry,
        room_id: &RoomId,
        endpoint: &EndpointId,
    ) -> Result<RoomSnapshot, RelayError> {
        if let Some(current) = registry.room_of(endpoint)? {
            return Err(RelayError::AlreadyInRoom(current));
        }

        let room_id = room_id.normalized();
        let mut room = self
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| RelayError::RoomNotFound(room_id.clone()))?;

        room.add_member(endpoint)?;

        if !registry.set_room(endpoint, room_id.clone()) {
            room.remove_member(endpoint);
            return Err(RelayError::UnknownEndpoint(endpoint.clone()));
        }

        let snapshot = room.snapshot();
        registry.deliver(
            endpoint,
            ServerMessage::RoomJoined {
                room_id: room_id.clone(),
                room: snapshot.clone(),
            },
        );

        for member in room.members().iter().filter(|m| *m != endpoint) {
            registry.deliver(
                member,
                ServerMessage::PeerJoined {
                    peer_id: endpoint.clone(),
                },
            );
        }

        info!("Endpoint {} joined room {}", endpoint, room_id);
        Ok(snapshot)
    }

    /// Remove `endpoint` from a room and notify the remaining members
    ///
    /// An emptied room stays in the table until the reaper collects it.
    pub fn leave(&self, registry: &Registry, room_id: &RoomId, endpoint: &EndpointId) -> bool {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return false;
        };

        let Some(departure) = room.remove_member(endpoint) else {
            return false;
        };

        for member in room.members() {
            registry.deliver(
                member,
                ServerMessage::PeerLeft {
                    peer_id: endpoint.clone(),
                },
            );
        }

        if let Some(new_host) = departure.new_host {
            info!("Room {} host migrated to {}", room_id, new_host);
            for member in room.members() {
                registry.deliver(
                    member,
                    ServerMessage::HostChanged {
                        room_id: room_id.clone(),
                        host_id: new_host.clone(),
                    },
                );
            }
        }

        if room.is_empty() {
            debug!("Room {} is empty, retained until reaped", room_id);
        }

        info!("Endpoint {} left room {}", endpoint, room_id);
        true
    }

    /// Snapshot of a room
    pub fn snapshot(&self, room_id: &RoomId) -> Result<RoomSnapshot, RelayError> {
        let room_id = room_id.normalized();
        self.rooms
            .get(&room_id)
            .map(|room| room.snapshot())
            .ok_or(RelayError::RoomNotFound(room_id))
    }

    /// Delete rooms that have been empty for longer than `retention`
    pub fn reap(&self, now: Instant, retention: Duration) -> Vec<RoomId> {
        let mut reaped = Vec::new();

        self.rooms.retain(|id, room| {
            let expired = room.empty_for(now).is_some_and(|empty| empty > retention);
            if expired {
                info!("Room {} removed (empty, age {:?})", id, room.age());
                reaped.push(id.clone());
            }
            !expired
        });

        reaped
    }

    /// Number of rooms, including empty ones awaiting reaping
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
