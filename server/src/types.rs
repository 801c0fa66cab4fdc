use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;

/// Outbound half of a connection. Bounded so a slow client cannot grow memory without limit.
pub type OutboundSender = mpsc::Sender<std::result::Result<warp::ws::Message, warp::Error>>;

pub type Clients = HashMap<String, Client>;

/// Per-connection session, owned by the hub.
#[derive(Debug, Clone)]
pub struct Client {
    pub sender: OutboundSender,
    pub room_id: Option<String>,
    /// External user identity, set by `register-user`. Only used for direct messaging.
    pub identity: Option<String>,
    pub message_count: u32,
    pub last_reset: u64,
    pub last_seen: u64,
}

impl Client {
    pub fn new(sender: OutboundSender, now: u64) -> Self {
        Self {
            sender,
            room_id: None,
            identity: None,
            message_count: 0,
            last_reset: now,
            last_seen: now,
        }
    }
}

/// Track identifiers come from the catalog as numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackId {
    Number(i64),
    Text(String),
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackId::Number(n) => write!(f, "{}", n),
            TrackId::Text(s) => f.write_str(s),
        }
    }
}

/// Track metadata as supplied by the client that picked it.
///
/// Only `id` is interpreted here; title, artist, artwork, preview URL and
/// duration travel through untouched in `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_keeps_unknown_fields() {
        let json = r#"{"id": 3135556, "title": "Harder, Better, Faster, Stronger", "preview": "https://cdn.example/p.mp3", "duration": 224, "artist": {"name": "Daft Punk"}}"#;
        let track: Track = serde_json::from_str(json).unwrap();
        assert_eq!(track.id, TrackId::Number(3135556));
        assert_eq!(track.metadata["duration"], 224);
        assert_eq!(track.metadata["artist"]["name"], "Daft Punk");

        let back = serde_json::to_value(&track).unwrap();
        assert_eq!(back["id"], 3135556);
        assert_eq!(back["preview"], "https://cdn.example/p.mp3");
    }

    #[test]
    fn test_track_id_string() {
        let track: Track = serde_json::from_str(r#"{"id": "abc-1"}"#).unwrap();
        assert_eq!(track.id, TrackId::Text("abc-1".to_string()));
        assert_eq!(track.id.to_string(), "abc-1");
        assert!(track.metadata.is_empty());
    }

    #[test]
    fn test_track_requires_id() {
        assert!(serde_json::from_str::<Track>(r#"{"title": "no id"}"#).is_err());
    }

    #[test]
    fn test_new_client_defaults() {
        let (tx, _rx) = mpsc::channel(1);
        let client = Client::new(tx, 1_000);
        assert!(client.room_id.is_none());
        assert!(client.identity.is_none());
        assert_eq!(client.last_seen, 1_000);
        assert_eq!(client.message_count, 0);
    }
}
