//! Sync Protocol Messages
//!
//! Every message on the data channel is a single-key JSON object:
//!
//! ```text
//! {"videoState": {"position": 12.34, "paused": true}}
//! {"sourceURL": "https://example.com/video.mp4"}
//! {"users": {"peer-a": "Guest", "peer-b": "Alice"}}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Playback position and pause flag of one peer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    /// Position in seconds
    #[serde(deserialize_with = "position_from_number_or_string")]
    pub position: f64,
    pub paused: bool,
}

impl PlaybackState {
    pub fn new(position: f64, paused: bool) -> Self {
        Self {
            position: position.max(0.0),
            paused,
        }
    }
}

/// Messages exchanged between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// Play/pause/seek happened on the sender's player
    #[serde(rename = "videoState")]
    VideoState(PlaybackState),

    /// The sender switched to a new source
    #[serde(rename = "sourceURL")]
    SourceChanged(String),

    /// Peer id -> display name of everyone the sender knows about
    #[serde(rename = "users")]
    UserListChanged(BTreeMap<String, String>),
}

impl SyncEvent {
    pub fn video_state(position: f64, paused: bool) -> Self {
        SyncEvent::VideoState(PlaybackState::new(position, paused))
    }

    /// Wire tag of this event
    pub fn tag(&self) -> &'static str {
        match self {
            SyncEvent::VideoState(_) => "videoState",
            SyncEvent::SourceChanged(_) => "sourceURL",
            SyncEvent::UserListChanged(_) => "users",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Result of parsing one inbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Sync(SyncEvent),
    /// Well-formed object whose tag we don't handle (e.g. `{"info": ...}`)
    Unknown { tag: String },
    Malformed(String),
}

impl WireMessage {
    pub fn parse(data: &[u8]) -> Self {
        let value: serde_json::Value = match serde_json::from_slice(data) {
            Ok(v) => v,
            Err(e) => return WireMessage::Malformed(e.to_string()),
        };

        let tag = match value.as_object() {
            Some(obj) if obj.len() == 1 => obj.keys().next().cloned().unwrap_or_default(),
            Some(obj) => {
                return WireMessage::Malformed(format!("expected one key, found {}", obj.len()))
            }
            None => return WireMessage::Malformed("not a JSON object".to_string()),
        };

        match tag.as_str() {
            "videoState" | "sourceURL" | "users" => match serde_json::from_value(value) {
                Ok(event) => WireMessage::Sync(event),
                Err(e) => WireMessage::Malformed(format!("{}: {}", tag, e)),
            },
            _ => WireMessage::Unknown { tag },
        }
    }
}

/// Some peers send the position as a fixed-point string ("12.34").
/// Non-finite positions are rejected, negative ones clamped to 0.
fn position_from_number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Position {
        Number(f64),
        Text(String),
    }

    let position = match Position::deserialize(deserializer)? {
        Position::Number(n) => n,
        Position::Text(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom)?,
    };
    if !position.is_finite() {
        return Err(serde::de::Error::custom(format!(
            "position must be finite, got {}",
            position
        )));
    }
    Ok(position.max(0.0))
}
