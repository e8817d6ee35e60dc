//! Room membership table.
//!
//! The router only talks to the [`RoomStore`] trait so the table can be faked
//! in tests or swapped for a shared store later. [`InMemoryRoomStore`] keeps
//! everything in process memory, which is all a single relay needs.

use dashmap::DashMap;
use huddle_proto::{ConnectionId, Participant};
use serde::Serialize;

/// Result of inserting a participant into a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Members present at join time, joiner excluded.
    pub existing: Vec<Participant>,
    /// Full roster after the join, joiner included.
    pub roster: Vec<Participant>,
    /// True when the connection was already a member and its entry was overwritten.
    pub replaced: bool,
}

/// A room a departing connection was removed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room_id: String,
    /// Members left behind. Empty when the room was deleted.
    pub remaining: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub participants: usize,
}

pub trait RoomStore: Send + Sync {
    /// Insert or overwrite `participant` in `room_id`, creating the room if needed.
    fn join(&self, room_id: &str, participant: Participant) -> JoinOutcome;

    fn roster(&self, room_id: &str) -> Vec<Participant>;

    fn is_member(&self, room_id: &str, connection_id: &ConnectionId) -> bool;

    /// Remove the connection from every room holding it. Rooms that become
    /// empty are deleted in the same step.
    fn leave(&self, connection_id: &ConnectionId) -> Vec<Departure>;

    fn snapshot(&self) -> Vec<RoomSnapshot>;
}

#[derive(Debug, Default)]
struct Room {
    members: Vec<Participant>,
}

impl Room {
    fn position(&self, connection_id: &ConnectionId) -> Option<usize> {
        self.members
            .iter()
            .position(|member| &member.connection_id == connection_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRoomStore {
    rooms: DashMap<String, Room>,
}

impl InMemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl RoomStore for InMemoryRoomStore {
    fn join(&self, room_id: &str, participant: Participant) -> JoinOutcome {
        let mut room = self.rooms.entry(room_id.to_string()).or_default();

        let existing = room
            .members
            .iter()
            .filter(|member| member.connection_id != participant.connection_id)
            .cloned()
            .collect();

        let replaced = match room.position(&participant.connection_id) {
            Some(index) => {
                room.members[index] = participant;
                true
            }
            None => {
                room.members.push(participant);
                false
            }
        };

        JoinOutcome {
            existing,
            roster: room.members.clone(),
            replaced,
        }
    }

    fn roster(&self, room_id: &str) -> Vec<Participant> {
        self.rooms
            .get(room_id)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    fn is_member(&self, room_id: &str, connection_id: &ConnectionId) -> bool {
        self.rooms
            .get(room_id)
            .map(|room| room.position(connection_id).is_some())
            .unwrap_or(false)
    }

    fn leave(&self, connection_id: &ConnectionId) -> Vec<Departure> {
        // Collect first so no shard guard is held while removing.
        let candidates: Vec<String> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().position(connection_id).is_some())
            .map(|entry| entry.key().clone())
            .collect();

        let mut departures = Vec::with_capacity(candidates.len());
        for room_id in candidates {
            let mut remaining = None;
            self.rooms.remove_if_mut(&room_id, |_, room| {
                if let Some(index) = room.position(connection_id) {
                    room.members.remove(index);
                    remaining = Some(room.members.clone());
                }
                room.members.is_empty()
            });
            if let Some(remaining) = remaining {
                departures.push(Departure { room_id, remaining });
            }
        }
        departures
    }

    fn snapshot(&self) -> Vec<RoomSnapshot> {
        let mut rooms: Vec<RoomSnapshot> = self
            .rooms
            .iter()
            .map(|entry| RoomSnapshot {
                room_id: entry.key().clone(),
                participants: entry.value().members.len(),
            })
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }
}
