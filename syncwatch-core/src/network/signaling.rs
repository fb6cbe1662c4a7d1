//! Signaling store for room discovery
//!
//! Every peer publishes its listen addresses under `{roomId}/{peerId}` and
//! watches the room for entries of other peers. Two stores exist:
//!
//! - `NtfySignalStore`: the free ntfy.sh pub/sub service (or a self-hosted
//!   ntfy), one topic per room. No signup required.
//! - `MemorySignalStore`: in-process, shared through a `MemorySignalHub`.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::room_code::RoomId;
use crate::config::SignalingConfig;

/// What a peer publishes so others can reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub addresses: Vec<String>,
}

/// Body of one store entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    pub room_id: String,
    pub peer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalPayload>,
    /// Tombstone published when the peer leaves
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub left: bool,
}

/// Change of a room's entries
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    Added {
        peer_id: String,
        payload: SignalPayload,
    },
    Removed {
        peer_id: String,
    },
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid signaling message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Signaling server rejected the request (HTTP {0})")]
    Rejected(u16),
}

/// Shared store the peers of a room meet in
pub trait SignalStore: Send + Sync + 'static {
    /// Publish our signal under `{room}/{peer_id}`
    fn push_signal(
        &self,
        room: &RoomId,
        peer_id: &str,
        payload: SignalPayload,
    ) -> impl Future<Output = Result<(), SignalingError>> + Send;

    /// Stream of entries added to / removed from the room, existing ones first.
    ///
    /// Watching stops when the receiver is dropped.
    fn watch_room(&self, room: &RoomId) -> mpsc::UnboundedReceiver<SignalEvent>;

    /// Remove our entry once we are gone, however we leave
    fn on_disconnect_cleanup(
        &self,
        room: &RoomId,
        peer_id: &str,
    ) -> impl Future<Output = Result<(), SignalingError>> + Send;

    /// Leave now, running the registered cleanups
    fn disconnect(&self) -> impl Future<Output = Result<(), SignalingError>> + Send;
}

/// ntfy-backed store
pub struct NtfySignalStore {
    client: Client,
    base_url: String,
    topic_prefix: String,
    poll_interval: Duration,
    since: String,
    cleanups: Mutex<Vec<(RoomId, String)>>,
}

impl NtfySignalStore {
    pub fn new(config: &SignalingConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            topic_prefix: config.topic_prefix.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            since: config.since.clone(),
            cleanups: Mutex::new(Vec::new()),
        }
    }

    fn topic_url(&self, room: &RoomId) -> String {
        format!("{}/{}-{}", self.base_url, self.topic_prefix, room)
    }

    async fn publish(&self, room: &RoomId, message: &SignalingMessage) -> Result<(), SignalingError> {
        let body = serde_json::to_string(message)?;
        let response = self
            .client
            .post(self.topic_url(room))
            .header("Title", format!("Room {}", room))
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SignalingError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

impl SignalStore for NtfySignalStore {
    async fn push_signal(
        &self,
        room: &RoomId,
        peer_id: &str,
        payload: SignalPayload,
    ) -> Result<(), SignalingError> {
        info!("Signaling: Publishing {} in room {}", peer_id, room);
        let message = SignalingMessage {
            room_id: room.to_string(),
            peer_id: peer_id.to_string(),
            signal: Some(payload),
            left: false,
        };
        self.publish(room, &message).await
    }

    fn watch_room(&self, room: &RoomId) -> mpsc::UnboundedReceiver<SignalEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let url = self.topic_url(room);
        let room = room.clone();
        let poll_interval = self.poll_interval;
        let mut since = self.since.clone();

        tokio::spawn(async move {
            while !tx.is_closed() {
                match poll_once(&client, &url, &since).await {
                    Ok(entries) => {
                        for (id, message) in entries {
                            since = id;
                            if message.room_id != room.as_str() {
                                continue;
                            }
                            if let Some(event) = signal_event(message) {
                                if tx.send(event).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => warn!("Signaling: Polling room {} failed: {}", room, e),
                }
                tokio::time::sleep(poll_interval).await;
            }
            debug!("Signaling: Stopped watching room {}", room);
        });

        rx
    }

    async fn on_disconnect_cleanup(&self, room: &RoomId, peer_id: &str) -> Result<(), SignalingError> {
        self.cleanups
            .lock()
            .push((room.clone(), peer_id.to_string()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SignalingError> {
        let cleanups = std::mem::take(&mut *self.cleanups.lock());
        let mut result = Ok(());
        for (room, peer_id) in cleanups {
            let tombstone = SignalingMessage {
                room_id: room.to_string(),
                peer_id,
                signal: None,
                left: true,
            };
            if let Err(e) = self.publish(&room, &tombstone).await {
                warn!("Signaling: Failed to leave room {}: {}", room, e);
                result = Err(e);
            }
        }
        result
    }
}

async fn poll_once(
    client: &Client,
    topic_url: &str,
    since: &str,
) -> Result<Vec<(String, SignalingMessage)>, SignalingError> {
    let url = format!("{}/json?poll=1&since={}", topic_url, since);
    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(SignalingError::Rejected(response.status().as_u16()));
    }
    let text = response.text().await?;
    Ok(parse_poll_response(&text))
}

/// ntfy answers with one JSON object per line; our entry is in `message`
fn parse_poll_response(text: &str) -> Vec<(String, SignalingMessage)> {
    #[derive(Deserialize)]
    struct NtfyLine {
        id: String,
        #[serde(default)]
        event: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    let mut entries = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let ntfy: NtfyLine = match serde_json::from_str(line) {
            Ok(n) => n,
            Err(e) => {
                debug!("Signaling: Skipping unreadable line: {}", e);
                continue;
            }
        };
        if ntfy.event.as_deref().is_some_and(|e| e != "message") {
            continue;
        }
        let Some(body) = ntfy.message else { continue };
        match serde_json::from_str::<SignalingMessage>(&body) {
            Ok(message) => entries.push((ntfy.id, message)),
            Err(e) => debug!("Signaling: Ignoring foreign message: {}", e),
        }
    }
    entries
}

fn signal_event(message: SignalingMessage) -> Option<SignalEvent> {
    if message.left {
        return Some(SignalEvent::Removed {
            peer_id: message.peer_id,
        });
    }
    message.signal.map(|payload| SignalEvent::Added {
        peer_id: message.peer_id,
        payload,
    })
}

#[derive(Default)]
struct MemoryRooms {
    entries: HashMap<RoomId, BTreeMap<String, SignalPayload>>,
    watchers: HashMap<RoomId, Vec<mpsc::UnboundedSender<SignalEvent>>>,
}

impl MemoryRooms {
    fn notify(&mut self, room: &RoomId, event: SignalEvent) {
        if let Some(watchers) = self.watchers.get_mut(room) {
            watchers.retain(|w| w.send(event.clone()).is_ok());
        }
    }

    fn remove(&mut self, room: &RoomId, peer_id: &str) {
        let removed = self
            .entries
            .get_mut(room)
            .and_then(|peers| peers.remove(peer_id));
        if removed.is_some() {
            self.notify(
                room,
                SignalEvent::Removed {
                    peer_id: peer_id.to_string(),
                },
            );
        }
    }
}

/// The shared side of the in-process store
#[derive(Clone, Default)]
pub struct MemorySignalHub {
    rooms: Arc<Mutex<MemoryRooms>>,
}

impl MemorySignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client handle; its cleanups run when it is dropped
    pub fn connect(&self) -> MemorySignalStore {
        MemorySignalStore {
            rooms: self.rooms.clone(),
            cleanups: Mutex::new(Vec::new()),
        }
    }

    pub fn peers(&self, room: &RoomId) -> Vec<String> {
        self.rooms
            .lock()
            .entries
            .get(room)
            .map(|peers| peers.keys().cloned().collect())
            .unwrap_or_default()
    }
}

pub struct MemorySignalStore {
    rooms: Arc<Mutex<MemoryRooms>>,
    cleanups: Mutex<Vec<(RoomId, String)>>,
}

impl MemorySignalStore {
    fn run_cleanups(&self) {
        let cleanups = std::mem::take(&mut *self.cleanups.lock());
        let mut rooms = self.rooms.lock();
        for (room, peer_id) in cleanups {
            rooms.remove(&room, &peer_id);
        }
    }
}

impl SignalStore for MemorySignalStore {
    async fn push_signal(
        &self,
        room: &RoomId,
        peer_id: &str,
        payload: SignalPayload,
    ) -> Result<(), SignalingError> {
        let mut rooms = self.rooms.lock();
        rooms
            .entries
            .entry(room.clone())
            .or_default()
            .insert(peer_id.to_string(), payload.clone());
        rooms.notify(
            room,
            SignalEvent::Added {
                peer_id: peer_id.to_string(),
                payload,
            },
        );
        Ok(())
    }

    fn watch_room(&self, room: &RoomId) -> mpsc::UnboundedReceiver<SignalEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut rooms = self.rooms.lock();
        if let Some(peers) = rooms.entries.get(room) {
            for (peer_id, payload) in peers {
                let _ = tx.send(SignalEvent::Added {
                    peer_id: peer_id.clone(),
                    payload: payload.clone(),
                });
            }
        }
        rooms.watchers.entry(room.clone()).or_default().push(tx);
        rx
    }

    async fn on_disconnect_cleanup(&self, room: &RoomId, peer_id: &str) -> Result<(), SignalingError> {
        self.cleanups
            .lock()
            .push((room.clone(), peer_id.to_string()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SignalingError> {
        self.run_cleanups();
        Ok(())
    }
}

impl Drop for MemorySignalStore {
    fn drop(&mut self) {
        self.run_cleanups();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomId {
        RoomId::parse("room-abcd3467").unwrap()
    }

    fn payload(addr: &str) -> SignalPayload {
        SignalPayload {
            addresses: vec![addr.to_string()],
        }
    }

    #[test]
    fn test_message_wire_shape() {
        let msg = SignalingMessage {
            room_id: "room-abcd3467".to_string(),
            peer_id: "12D3KooW".to_string(),
            signal: Some(payload("/ip4/127.0.0.1/tcp/4001")),
            left: false,
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"roomId":"room-abcd3467","peerId":"12D3KooW","signal":{"addresses":["/ip4/127.0.0.1/tcp/4001"]}}"#
        );
    }

    #[test]
    fn test_parse_poll_response() {
        let added = serde_json::json!({
            "roomId": "room-abcd3467",
            "peerId": "a",
            "signal": {"addresses": ["/ip4/10.0.0.1/tcp/1"]}
        })
        .to_string();
        let left = serde_json::json!({"roomId": "room-abcd3467", "peerId": "a", "left": true}).to_string();

        let text = format!(
            "{}\n{}\n\n{}\n{}\nnot json\n",
            serde_json::json!({"id": "1", "event": "open"}),
            serde_json::json!({"id": "2", "event": "message", "message": added}),
            serde_json::json!({"id": "3", "event": "message", "message": "hello"}),
            serde_json::json!({"id": "4", "event": "message", "message": left}),
        );

        let entries = parse_poll_response(&text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "2");
        assert_eq!(
            signal_event(entries[0].1.clone()),
            Some(SignalEvent::Added {
                peer_id: "a".to_string(),
                payload: payload("/ip4/10.0.0.1/tcp/1"),
            })
        );
        assert_eq!(
            signal_event(entries[1].1.clone()),
            Some(SignalEvent::Removed {
                peer_id: "a".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_memory_watch_replays_and_follows() {
        let hub = MemorySignalHub::new();
        let host = hub.connect();
        let guest = hub.connect();

        host.push_signal(&room(), "host", payload("h")).await.unwrap();
        let mut events = guest.watch_room(&room());
        guest.push_signal(&room(), "guest", payload("g")).await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(SignalEvent::Added {
                peer_id: "host".to_string(),
                payload: payload("h")
            })
        );
        assert_eq!(
            events.recv().await,
            Some(SignalEvent::Added {
                peer_id: "guest".to_string(),
                payload: payload("g")
            })
        );
    }

    #[tokio::test]
    async fn test_memory_cleanup_runs_on_drop() {
        let hub = MemorySignalHub::new();
        let host = hub.connect();
        let guest = hub.connect();
        let mut events = host.watch_room(&room());

        guest.push_signal(&room(), "guest", payload("g")).await.unwrap();
        guest.on_disconnect_cleanup(&room(), "guest").await.unwrap();
        assert_eq!(hub.peers(&room()), vec!["guest".to_string()]);

        drop(guest);

        assert!(hub.peers(&room()).is_empty());
        assert!(matches!(events.recv().await, Some(SignalEvent::Added { .. })));
        assert_eq!(
            events.recv().await,
            Some(SignalEvent::Removed {
                peer_id: "guest".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_memory_without_cleanup_keeps_entry() {
        let hub = MemorySignalHub::new();
        let guest = hub.connect();
        guest.push_signal(&room(), "guest", payload("g")).await.unwrap();
        drop(guest);
        assert_eq!(hub.peers(&room()), vec!["guest".to_string()]);
    }
}
