//! Status display
//!
//! Room link, peers, current source and user list are shown to the user
//! through a `StatusDisplay`. The core never reads anything back from it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::player::MpvClient;

pub trait StatusDisplay: Send + Sync {
    fn set_room_link(&self, link: &str);

    /// Our own signal was published under `peer_id`
    fn add_local_peer(&self, peer_id: &str);

    fn add_peer(&self, peer_id: &str);

    fn remove_peer(&self, peer_id: &str);

    fn set_source(&self, url: &str);

    fn set_users(&self, users: &BTreeMap<String, String>);
}

/// Prints everything through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDisplay;

impl StatusDisplay for LogDisplay {
    fn set_room_link(&self, link: &str) {
        info!("Room link: {}", link);
    }

    fn add_local_peer(&self, peer_id: &str) {
        info!("Joined as {}", peer_id);
    }

    fn add_peer(&self, peer_id: &str) {
        info!("Peer joined: {}", peer_id);
    }

    fn remove_peer(&self, peer_id: &str) {
        info!("Peer left: {}", peer_id);
    }

    fn set_source(&self, url: &str) {
        info!("Now playing: {}", url);
    }

    fn set_users(&self, users: &BTreeMap<String, String>) {
        let names: Vec<&str> = users.values().map(String::as_str).collect();
        info!("Watching: {}", names.join(", "));
    }
}

/// Feeds an overlay script running inside mpv via `script-message`
///
/// Messages are `room_link:<link>`, `peer_me:<id>` and `new_peer:<id>`.
#[derive(Clone)]
pub struct PlayerOverlay {
    client: MpvClient,
}

impl PlayerOverlay {
    pub fn new(client: MpvClient) -> Self {
        Self { client }
    }

    fn send(&self, message: String) {
        if let Err(e) = self.client.script_message(&message) {
            debug!("Overlay message dropped: {}", e);
        }
    }
}

impl StatusDisplay for PlayerOverlay {
    fn set_room_link(&self, link: &str) {
        self.send(format!("room_link:{}", link));
    }

    fn add_local_peer(&self, peer_id: &str) {
        self.send(format!("peer_me:{}", peer_id));
    }

    fn add_peer(&self, peer_id: &str) {
        self.send(format!("new_peer:{}", peer_id));
    }

    fn remove_peer(&self, peer_id: &str) {
        self.send(format!("peer_left:{}", peer_id));
    }

    fn set_source(&self, url: &str) {
        self.send(format!("source:{}", url));
    }

    fn set_users(&self, users: &BTreeMap<String, String>) {
        for (peer_id, name) in users {
            self.send(format!("user:{}={}", peer_id, name));
        }
    }
}

/// Fan-out to several displays
#[derive(Clone, Default)]
pub struct Displays {
    targets: Vec<Arc<dyn StatusDisplay>>,
}

impl Displays {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, display: Arc<dyn StatusDisplay>) -> Self {
        self.targets.push(display);
        self
    }
}

impl StatusDisplay for Displays {
    fn set_room_link(&self, link: &str) {
        self.targets.iter().for_each(|d| d.set_room_link(link));
    }

    fn add_local_peer(&self, peer_id: &str) {
        self.targets.iter().for_each(|d| d.add_local_peer(peer_id));
    }

    fn add_peer(&self, peer_id: &str) {
        self.targets.iter().for_each(|d| d.add_peer(peer_id));
    }

    fn remove_peer(&self, peer_id: &str) {
        self.targets.iter().for_each(|d| d.remove_peer(peer_id));
    }

    fn set_source(&self, url: &str) {
        self.targets.iter().for_each(|d| d.set_source(url));
    }

    fn set_users(&self, users: &BTreeMap<String, String>) {
        self.targets.iter().for_each(|d| d.set_users(users));
    }
}

/// Records every call, for tests
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingDisplay {
    pub lines: parking_lot::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingDisplay {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    fn push(&self, line: String) {
        self.lines.lock().push(line);
    }
}

#[cfg(test)]
impl StatusDisplay for RecordingDisplay {
    fn set_room_link(&self, link: &str) {
        self.push(format!("room_link:{}", link));
    }

    fn add_local_peer(&self, peer_id: &str) {
        self.push(format!("peer_me:{}", peer_id));
    }

    fn add_peer(&self, peer_id: &str) {
        self.push(format!("new_peer:{}", peer_id));
    }

    fn remove_peer(&self, peer_id: &str) {
        self.push(format!("peer_left:{}", peer_id));
    }

    fn set_source(&self, url: &str) {
        self.push(format!("source:{}", url));
    }

    fn set_users(&self, users: &BTreeMap<String, String>) {
        let names: Vec<&str> = users.values().map(String::as_str).collect();
        self.push(format!("users:{}", names.join(",")));
    }
}
