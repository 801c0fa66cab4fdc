//! Wire protocol.
//!
//! Every frame is a JSON envelope `{"type": "<event>", "payload": ...}`.
//! Inbound frames decode into [`ClientEvent`]; anything that does not match a
//! variant (unknown type, missing or mistyped field) is rejected at decode
//! time instead of reaching the room logic.

use crate::error::EventError;
use crate::room::RoomSnapshot;
use crate::types::Track;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom(String),
    LeaveRoom,
    TogglePlay(TogglePlay),
    ChangeSong(ChangeSong),
    NextSong(SkipSong),
    PrevSong(SkipSong),
    SeekTime(SeekTime),
    #[serde(rename = "chat message")]
    ChatMessage(ChatMessage),
    RegisterUser(Registration),
    SendDm(SendDm),
    Typing(Typing),
    MarkRead(MarkRead),
    Ping,
}

impl ClientEvent {
    /// Event name for logging. Payloads are never logged.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join-room",
            ClientEvent::LeaveRoom => "leave-room",
            ClientEvent::TogglePlay(_) => "toggle-play",
            ClientEvent::ChangeSong(_) => "change-song",
            ClientEvent::NextSong(_) => "next-song",
            ClientEvent::PrevSong(_) => "prev-song",
            ClientEvent::SeekTime(_) => "seek-time",
            ClientEvent::ChatMessage(_) => "chat message",
            ClientEvent::RegisterUser(_) => "register-user",
            ClientEvent::SendDm(_) => "send-dm",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::MarkRead(_) => "mark-read",
            ClientEvent::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TogglePlay {
    pub room_id: String,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub position: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSong {
    pub room_id: String,
    #[serde(default)]
    pub song: Option<Track>,
    #[serde(default)]
    pub position: Option<f64>,
}

/// Payload of `next-song` / `prev-song`. The client has already picked the track.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipSong {
    pub room_id: String,
    #[serde(default)]
    pub song: Option<Track>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekTime {
    pub room_id: String,
    #[serde(default)]
    pub position: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room_id: String,
    pub msg: serde_json::Value,
}

/// `register-user` accepts either the bare identity or a signed token from the
/// identity provider, depending on whether verification is configured.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Registration {
    Identity(String),
    Token { token: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendDm {
    pub recipient_id: String,
    pub message: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub recipient_id: String,
    #[serde(default)]
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRead {
    pub sender_id: String,
}

/// Outbound events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    ClientHello { client_id: String },
    RoomState(RoomSnapshot),
    #[serde(rename_all = "camelCase")]
    SyncPlay { is_playing: bool, position: f64, at: u64 },
    #[serde(rename_all = "camelCase")]
    SyncSong { song: Option<Track>, is_playing: bool, position: f64, at: u64 },
    SyncSeek { position: f64, at: u64 },
    #[serde(rename = "chat message")]
    ChatMessage(serde_json::Value),
    UserCount(usize),
    #[serde(rename_all = "camelCase")]
    DmSent { recipient_id: String, message: String, timestamp: u64 },
    #[serde(rename_all = "camelCase")]
    DmError { recipient_id: String, error: &'static str },
    #[serde(rename_all = "camelCase")]
    ReceiveDm {
        sender_id: String,
        sender_name: Option<String>,
        sender_image: Option<String>,
        message: String,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    UserTyping { sender_id: String, is_typing: bool },
    #[serde(rename_all = "camelCase")]
    MessagesRead { reader_id: String },
    #[serde(rename_all = "camelCase")]
    Pong { server_ts: u64 },
    Error { kind: &'static str, message: &'static str },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ClientHello { .. } => "client-hello",
            ServerEvent::RoomState(_) => "room-state",
            ServerEvent::SyncPlay { .. } => "sync-play",
            ServerEvent::SyncSong { .. } => "sync-song",
            ServerEvent::SyncSeek { .. } => "sync-seek",
            ServerEvent::ChatMessage(_) => "chat message",
            ServerEvent::UserCount(_) => "user-count",
            ServerEvent::DmSent { .. } => "dm-sent",
            ServerEvent::DmError { .. } => "dm-error",
            ServerEvent::ReceiveDm { .. } => "receive-dm",
            ServerEvent::UserTyping { .. } => "user-typing",
            ServerEvent::MessagesRead { .. } => "messages-read",
            ServerEvent::Pong { .. } => "pong",
            ServerEvent::Error { .. } => "error",
        }
    }
}

impl From<&EventError> for ServerEvent {
    fn from(err: &EventError) -> Self {
        ServerEvent::Error { kind: err.kind(), message: err.client_message() }
    }
}

/// Decodes one inbound text frame.
pub fn decode(text: &str) -> Result<ClientEvent, EventError> {
    Ok(serde_json::from_str(text)?)
}
