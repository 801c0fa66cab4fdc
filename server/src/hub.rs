//! The hub owns every piece of shared state: connections, rooms and identity
//! bindings. A single task drains one command queue and handles each command
//! to completion before the next, so room mutations and their broadcasts are
//! atomic with respect to each other without any locks.

use crate::auth::IdentityVerifier;
use crate::clock::now_ms;
use crate::config::Limits;
use crate::error::EventError;
use crate::events::{decode, ClientEvent, ServerEvent};
use crate::identity::{IdentityBindings, IdentityStore, MemoryIdentityStore};
use crate::messaging::{broadcast_to_room, ping_all, send_to_client};
use crate::relay;
use crate::room::{Departure, Direction, MemoryRoomStore, RoomRegistry, RoomStore};
use crate::types::{Client, Clients, OutboundSender, Track};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const HUB_QUEUE_SIZE: usize = 1024;

pub enum HubCommand {
    Connect { client_id: String, sender: OutboundSender },
    Frame { client_id: String, message: warp::ws::Message },
    Disconnect { client_id: String },
    Stats { reply: oneshot::Sender<HubStats> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub rooms: usize,
    pub connections: usize,
}

/// Cloneable entry point into the hub task.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub fn channel() -> (Self, mpsc::Receiver<HubCommand>) {
        let (commands, rx) = mpsc::channel(HUB_QUEUE_SIZE);
        (Self { commands }, rx)
    }

    async fn send(&self, command: HubCommand) {
        if self.commands.send(command).await.is_err() {
            warn!("Hub is gone, dropping command");
        }
    }

    pub async fn connect(&self, client_id: String, sender: OutboundSender) {
        self.send(HubCommand::Connect { client_id, sender }).await;
    }

    pub async fn frame(&self, client_id: String, message: warp::ws::Message) {
        self.send(HubCommand::Frame { client_id, message }).await;
    }

    pub async fn disconnect(&self, client_id: String) {
        self.send(HubCommand::Disconnect { client_id }).await;
    }

    pub async fn stats(&self) -> Option<HubStats> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply }).await;
        rx.await.ok()
    }
}

pub struct Hub<R = MemoryRoomStore, I = MemoryIdentityStore> {
    clients: Clients,
    rooms: RoomRegistry<R>,
    identities: IdentityBindings<I>,
    verifier: IdentityVerifier,
    limits: Limits,
}

impl Hub {
    pub fn new(verifier: IdentityVerifier, limits: Limits) -> Self {
        Self::with_stores(MemoryRoomStore::default(), MemoryIdentityStore::default(), verifier, limits)
    }
}

impl<R: RoomStore, I: IdentityStore> Hub<R, I> {
    pub fn with_stores(rooms: R, identities: I, verifier: IdentityVerifier, limits: Limits) -> Self {
        Self {
            clients: Clients::new(),
            rooms: RoomRegistry::new(rooms),
            identities: IdentityBindings::new(identities),
            verifier,
            limits,
        }
    }

    pub fn stats(&self) -> HubStats {
        HubStats { rooms: self.rooms.len(), connections: self.clients.len() }
    }

    pub fn apply(&mut self, command: HubCommand, now: u64) {
        match command {
            HubCommand::Connect { client_id, sender } => self.connect(&client_id, sender, now),
            HubCommand::Frame { client_id, message } => self.handle_frame(&client_id, &message, now),
            HubCommand::Disconnect { client_id } => self.disconnect(&client_id),
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    pub fn connect(&mut self, client_id: &str, sender: OutboundSender, now: u64) {
        info!("Client connected: {}", client_id);
        self.clients.insert(client_id.to_string(), Client::new(sender, now));
        send_to_client(client_id, &self.clients, &ServerEvent::ClientHello { client_id: client_id.to_string() });
    }

    /// Tears down a connection: room membership first, then its identity binding.
    pub fn disconnect(&mut self, client_id: &str) {
        if !self.clients.contains_key(client_id) {
            return;
        }
        info!("Disconnecting client {}", client_id);
        self.leave_current_room(client_id);
        relay::release(client_id, &self.clients, &mut self.identities);
        self.clients.remove(client_id);
    }

    /// Disconnects connections that have been silent too long, drops rooms
    /// nobody is in anymore and pings the survivors. A client's pong (or any
    /// other frame) before the next sweep keeps it alive.
    pub fn reap_zombies(&mut self, now: u64) -> Vec<String> {
        let zombies: Vec<String> = self
            .clients
            .iter()
            .filter(|(_, c)| now.saturating_sub(c.last_seen) > self.limits.zombie_timeout_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &zombies {
            warn!("Removing zombie connection: {}", id);
            self.disconnect(id);
        }
        for room_id in self.rooms.sweep_empty() {
            debug!("Dropped empty room {}", room_id);
        }
        ping_all(&self.clients);
        zombies
    }

    /// Returns true if the client is over its message budget for the current window.
    fn check_rate_limit(&mut self, client_id: &str, now: u64) -> bool {
        let Some(client) = self.clients.get_mut(client_id) else {
            return false;
        };
        client.last_seen = now;
        if now.saturating_sub(client.last_reset) > self.limits.rate_limit_window_ms {
            client.message_count = 0;
            client.last_reset = now;
        }
        client.message_count += 1;
        client.message_count > self.limits.rate_limit_messages
    }

    fn reject(&self, client_id: &str, err: &EventError) {
        warn!("Rejected message from {}: {}", client_id, err);
        send_to_client(client_id, &self.clients, &ServerEvent::from(err));
    }

    pub fn handle_frame(&mut self, client_id: &str, message: &warp::ws::Message, now: u64) {
        if !self.clients.contains_key(client_id) {
            return;
        }
        // Answer to our keep-alive ping: proof of life, not a message
        if message.is_pong() {
            if let Some(client) = self.clients.get_mut(client_id) {
                client.last_seen = now;
            }
            return;
        }
        if self.check_rate_limit(client_id, now) {
            self.reject(client_id, &EventError::RateLimited);
            return;
        }
        let size = message.as_bytes().len();
        if size > self.limits.max_message_size {
            self.reject(client_id, &EventError::TooLarge(size));
            return;
        }
        // Binary, ping and close frames carry no events
        let Ok(text) = message.to_str() else {
            return;
        };
        match decode(text) {
            Ok(event) => self.handle_event(client_id, event, now),
            Err(e) => self.reject(client_id, &e),
        }
    }

    pub fn handle_event(&mut self, client_id: &str, event: ClientEvent, now: u64) {
        debug!("Message from {}: {}", client_id, event.name());
        match event {
            ClientEvent::JoinRoom(room_id) => {
                if let Some(room_id) = room_scope(client_id, &room_id) {
                    self.join_room(client_id, room_id, now);
                }
            }
            ClientEvent::LeaveRoom => self.leave_current_room(client_id),
            ClientEvent::TogglePlay(play) => {
                if let Some(room_id) = room_scope(client_id, &play.room_id) {
                    let room = self.rooms.set_playback(room_id, play.is_playing, play.position, now);
                    debug!(
                        "Room {} {} at {:.1}s",
                        room_id,
                        if room.is_playing { "playing" } else { "paused" },
                        room.position_at(now)
                    );
                    let event = ServerEvent::SyncPlay {
                        is_playing: room.is_playing,
                        position: room.reference_position,
                        at: room.reference_ts,
                    };
                    broadcast_to_room(&room.member_ids(), &self.clients, &event, Some(client_id));
                }
            }
            ClientEvent::ChangeSong(change) => {
                if let Some(room_id) = room_scope(client_id, &change.room_id) {
                    self.change_track(room_id, change.song, change.position, None, now);
                }
            }
            ClientEvent::NextSong(skip) => {
                if let Some(room_id) = room_scope(client_id, &skip.room_id) {
                    self.change_track(room_id, skip.song, None, Some(Direction::Next), now);
                }
            }
            ClientEvent::PrevSong(skip) => {
                if let Some(room_id) = room_scope(client_id, &skip.room_id) {
                    self.change_track(room_id, skip.song, None, Some(Direction::Previous), now);
                }
            }
            ClientEvent::SeekTime(seek) => {
                if let Some(room_id) = room_scope(client_id, &seek.room_id) {
                    let room = self.rooms.seek(room_id, seek.position, now);
                    let event = ServerEvent::SyncSeek { position: room.reference_position, at: room.reference_ts };
                    broadcast_to_room(&room.member_ids(), &self.clients, &event, Some(client_id));
                }
            }
            ClientEvent::ChatMessage(chat) => {
                // Chat never creates a room; it only reaches people already in one
                if let Some(room) = room_scope(client_id, &chat.room_id).and_then(|id| self.rooms.get(id)) {
                    broadcast_to_room(&room.member_ids(), &self.clients, &ServerEvent::ChatMessage(chat.msg), Some(client_id));
                }
            }
            ClientEvent::RegisterUser(registration) => {
                if let Err(e) =
                    relay::register(client_id, &registration, &self.verifier, &mut self.clients, &mut self.identities)
                {
                    self.reject(client_id, &e);
                }
            }
            ClientEvent::SendDm(dm) => {
                if let Err(e) = relay::send_dm(client_id, dm, &self.clients, &self.identities, now) {
                    self.reject(client_id, &e);
                }
            }
            ClientEvent::Typing(typing) => relay::relay_typing(client_id, typing, &self.clients, &self.identities),
            ClientEvent::MarkRead(read) => relay::relay_read(client_id, read, &self.clients, &self.identities),
            ClientEvent::Ping => {
                send_to_client(client_id, &self.clients, &ServerEvent::Pong { server_ts: now });
            }
        }
    }

    fn join_room(&mut self, client_id: &str, room_id: &str, now: u64) {
        let current = self.clients.get(client_id).and_then(|c| c.room_id.clone());
        if current.as_deref().is_some_and(|id| id != room_id) {
            self.leave_current_room(client_id);
        }

        info!("Client {} joining room {}", client_id, room_id);
        let joined = self.rooms.join(room_id, client_id, now);
        if let Some(client) = self.clients.get_mut(client_id) {
            client.room_id = Some(room_id.to_string());
        }
        send_to_client(client_id, &self.clients, &ServerEvent::RoomState(joined.snapshot));
        broadcast_to_room(&joined.members, &self.clients, &ServerEvent::UserCount(joined.members.len()), None);
    }

    fn leave_current_room(&mut self, client_id: &str) {
        let Some(room_id) = self.clients.get_mut(client_id).and_then(|c| c.room_id.take()) else {
            return;
        };
        info!("Client {} leaving room {}", client_id, room_id);
        if let Departure::Remaining(members) = self.rooms.leave(&room_id, client_id) {
            broadcast_to_room(&members, &self.clients, &ServerEvent::UserCount(members.len()), None);
        }
    }

    /// `change-song`, `next-song` and `prev-song`. Everyone, sender included,
    /// gets the canonical start time.
    fn change_track(
        &mut self,
        room_id: &str,
        track: Option<Track>,
        position: Option<f64>,
        direction: Option<Direction>,
        now: u64,
    ) {
        let room = match direction {
            Some(direction) => self.rooms.advance(room_id, track, direction, now),
            None => self.rooms.change_track(room_id, track, position, now),
        };
        match &room.current_track {
            Some(track) => info!("Room {} now playing track {}", room_id, track.id),
            None => info!("Room {} cleared its track", room_id),
        }
        let event = ServerEvent::SyncSong {
            song: room.current_track.clone(),
            is_playing: room.is_playing,
            position: room.reference_position,
            at: room.reference_ts,
        };
        broadcast_to_room(&room.member_ids(), &self.clients, &event, None);
    }
}

/// Room-scoped events need a non-blank room id; anything else is a no-op.
/// The id itself is used verbatim as the room key.
fn room_scope<'a>(client_id: &str, room_id: &'a str) -> Option<&'a str> {
    if room_id.trim().is_empty() {
        warn!("Ignoring room event without room id from {}", client_id);
        return None;
    }
    Some(room_id)
}

/// Drives the hub until every handle is dropped.
pub async fn run<R: RoomStore, I: IdentityStore>(mut hub: Hub<R, I>, mut commands: mpsc::Receiver<HubCommand>) {
    let mut sweep = tokio::time::interval(Duration::from_secs(hub.limits.zombie_check_interval_secs));
    sweep.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => hub.apply(command, now_ms()),
                None => break,
            },
            _ = sweep.tick() => {
                let reaped = hub.reap_zombies(now_ms());
                if !reaped.is_empty() {
                    info!("Reaped {} zombie connection(s)", reaped.len());
                }
            }
        }
    }
    info!("Hub stopped");
}
