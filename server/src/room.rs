//! Room sessions and the registry that owns them.
//!
//! A room only stores a reference snapshot of playback. The live position is
//! always derived from it (see [`crate::clock`]), so every mutation rewrites
//! position and timestamp together and nothing ever ticks on the server.
//!
//! Concurrent writers are not reconciled: whichever mutation the hub handles
//! last wins.

use crate::clock::current_position;
use crate::types::Track;
use log::{debug, info};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

const MAX_POSITION_SECONDS: f64 = 86400.0; // 24 hours max

/// Rejects NaN, infinities, negative values and anything past 24 hours.
pub fn is_valid_position(pos: f64) -> bool {
    pos.is_finite() && (0.0..=MAX_POSITION_SECONDS).contains(&pos)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub room_id: String,
    pub current_track: Option<Track>,
    pub is_playing: bool,
    /// Seconds into the track at `reference_ts`.
    pub reference_position: f64,
    /// Server wall clock (ms since epoch) when `reference_position` was recorded.
    pub reference_ts: u64,
    pub members: HashSet<String>,
}

impl Room {
    pub fn new(room_id: &str, now: u64) -> Self {
        Self {
            room_id: room_id.to_string(),
            current_track: None,
            is_playing: false,
            reference_position: 0.0,
            reference_ts: now,
            members: HashSet::new(),
        }
    }

    pub fn position_at(&self, now: u64) -> f64 {
        current_position(self.reference_position, self.reference_ts, self.is_playing, now)
    }

    /// Full state handed to a joining connection.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            current_track: self.current_track.clone(),
            is_playing: self.is_playing,
            position: self.reference_position,
            at: self.reference_ts,
            playlist: Vec::new(),
            member_count: self.members.len(),
        }
    }

    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }

    fn set_reference(&mut self, position: f64, now: u64) {
        self.reference_position = position;
        self.reference_ts = now;
    }
}

/// Late-join catch-up state, sent only to the joiner as `room-state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub current_track: Option<Track>,
    pub is_playing: bool,
    pub position: f64,
    pub at: u64,
    pub playlist: Vec<Track>,
    pub member_count: usize,
}

/// Backing storage for rooms.
///
/// Owned values in and out, so an implementation can live behind a cache or
/// another process as long as it keeps last-write-wins semantics.
pub trait RoomStore {
    fn get(&self, room_id: &str) -> Option<Room>;
    fn set(&mut self, room: Room);
    fn delete(&mut self, room_id: &str) -> Option<Room>;
    fn room_ids(&self) -> Vec<String>;
    fn len(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct MemoryRoomStore {
    rooms: HashMap<String, Room>,
}

impl RoomStore for MemoryRoomStore {
    fn get(&self, room_id: &str) -> Option<Room> {
        self.rooms.get(room_id).cloned()
    }

    fn set(&mut self, room: Room) {
        self.rooms.insert(room.room_id.clone(), room);
    }

    fn delete(&mut self, room_id: &str) -> Option<Room> {
        self.rooms.remove(room_id)
    }

    fn room_ids(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.rooms.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Next => f.write_str("next"),
            Direction::Previous => f.write_str("previous"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Joined {
    pub snapshot: RoomSnapshot,
    pub members: Vec<String>,
}

/// Result of removing a connection from a room.
#[derive(Debug, Clone, PartialEq)]
pub enum Departure {
    /// Room unknown, or the connection was not a member.
    NotMember,
    /// Last member left; the room is gone.
    Closed,
    /// Members still present after the departure.
    Remaining(Vec<String>),
}

pub struct RoomRegistry<S = MemoryRoomStore> {
    store: S,
}

impl Default for RoomRegistry<MemoryRoomStore> {
    fn default() -> Self {
        Self::new(MemoryRoomStore::default())
    }
}

impl<S: RoomStore> RoomRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn get(&self, room_id: &str) -> Option<Room> {
        self.store.get(room_id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn get_or_create(&mut self, room_id: &str, now: u64) -> Room {
        match self.store.get(room_id) {
            Some(room) => room,
            None => {
                info!("Creating room {}", room_id);
                let room = Room::new(room_id, now);
                self.store.set(room.clone());
                room
            }
        }
    }

    pub fn join(&mut self, room_id: &str, client_id: &str, now: u64) -> Joined {
        let mut room = self.get_or_create(room_id, now);
        room.members.insert(client_id.to_string());
        let joined = Joined { snapshot: room.snapshot(), members: room.member_ids() };
        self.store.set(room);
        joined
    }

    pub fn leave(&mut self, room_id: &str, client_id: &str) -> Departure {
        let Some(mut room) = self.store.get(room_id) else {
            return Departure::NotMember;
        };
        if !room.members.remove(client_id) {
            return Departure::NotMember;
        }
        if room.members.is_empty() {
            info!("Closing room {}", room_id);
            self.store.delete(room_id);
            Departure::Closed
        } else {
            let members = room.member_ids();
            self.store.set(room);
            Departure::Remaining(members)
        }
    }

    /// Play/pause. `position` only replaces the reference when it is valid.
    /// Numbers outside `0..=86400` (and NaN) count as absent, like a missing position.
    pub fn set_playback(&mut self, room_id: &str, is_playing: bool, position: Option<f64>, now: u64) -> Room {
        self.update(room_id, now, |room| {
            room.is_playing = is_playing;
            let position = position.filter(|p| is_valid_position(*p)).unwrap_or(room.reference_position);
            room.set_reference(position, now);
        })
    }

    pub fn change_track(&mut self, room_id: &str, track: Option<Track>, position: Option<f64>, now: u64) -> Room {
        self.update(room_id, now, |room| {
            room.current_track = track;
            room.is_playing = true;
            room.set_reference(position.filter(|p| is_valid_position(*p)).unwrap_or(0.0), now);
        })
    }

    /// Seek keeps the play flag. An unusable position still refreshes the timestamp.
    pub fn seek(&mut self, room_id: &str, position: Option<f64>, now: u64) -> Room {
        self.update(room_id, now, |room| {
            let position = position.filter(|p| is_valid_position(*p)).unwrap_or(room.reference_position);
            room.set_reference(position, now);
        })
    }

    /// Next/previous. The caller has already chosen the track.
    pub fn advance(&mut self, room_id: &str, track: Option<Track>, direction: Direction, now: u64) -> Room {
        debug!("Room {} skipping to {} track", room_id, direction);
        self.change_track(room_id, track, Some(0.0), now)
    }

    /// Deletes rooms that have no members, e.g. rooms created on demand by a
    /// mutation from a connection that never joined.
    pub fn sweep_empty(&mut self) -> Vec<String> {
        let mut removed = Vec::new();
        for room_id in self.store.room_ids() {
            if self.store.get(&room_id).is_some_and(|room| room.members.is_empty()) {
                self.store.delete(&room_id);
                removed.push(room_id);
            }
        }
        removed
    }

    fn update(&mut self, room_id: &str, now: u64, mutate: impl FnOnce(&mut Room)) -> Room {
        let mut room = self.get_or_create(room_id, now);
        mutate(&mut room);
        self.store.set(room.clone());
        room
    }
}
