//! Session State

use std::collections::{BTreeMap, BTreeSet};

use crate::network::RoomId;

/// Lifecycle of the peer session
///
/// `Uninitialized -> Creating | Joining -> SignalingExchange -> Connected -> Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    /// Room created, waiting for our own listen addresses
    Creating,
    /// Joined a room, waiting for our own listen addresses
    Joining,
    /// Our signal is published, waiting for a peer to connect
    SignalingExchange,
    Connected,
    /// Last connected peer left. Terminal.
    Disconnected,
}

impl SessionPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionPhase::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Disconnected)
    }
}

/// Room identity and peer bookkeeping
#[derive(Debug, Clone)]
pub struct Session {
    pub room_id: RoomId,
    pub local_peer_id: String,
    /// Peers discovered through signaling
    pub peers: BTreeSet<String>,
    /// Peers with a live data channel
    pub connected_peers: BTreeSet<String>,
    pub connected: bool,
    /// peer id -> display name, ourselves included
    pub users: BTreeMap<String, String>,
}

impl Session {
    pub fn new(room_id: RoomId, local_peer_id: String, display_name: String) -> Self {
        let mut users = BTreeMap::new();
        users.insert(local_peer_id.clone(), display_name);

        Self {
            room_id,
            local_peer_id,
            peers: BTreeSet::new(),
            connected_peers: BTreeSet::new(),
            connected: false,
            users,
        }
    }

    pub fn is_local(&self, peer_id: &str) -> bool {
        self.local_peer_id == peer_id
    }

    /// Record a discovered peer. Returns false for ourselves or a known peer.
    pub fn add_peer(&mut self, peer_id: &str) -> bool {
        if self.is_local(peer_id) {
            return false;
        }
        self.peers.insert(peer_id.to_string())
    }

    /// Returns true if this is the peer's first live connection
    pub fn peer_connected(&mut self, peer_id: &str) -> bool {
        self.peers.insert(peer_id.to_string());
        self.connected = true;
        self.connected_peers.insert(peer_id.to_string())
    }

    /// Drop a peer and its user entry.
    ///
    /// Returns true when this removed the last live connection.
    pub fn remove_peer(&mut self, peer_id: &str) -> bool {
        self.peers.remove(peer_id);
        self.users.remove(peer_id);
        let was_connected = self.connected_peers.remove(peer_id);
        if was_connected && self.connected_peers.is_empty() {
            self.connected = false;
            return true;
        }
        false
    }

    /// Merge a received user map. Our own entry is never overwritten.
    ///
    /// Returns true if anything changed.
    pub fn merge_users(&mut self, users: &BTreeMap<String, String>) -> bool {
        let mut changed = false;
        for (peer_id, name) in users {
            if self.is_local(peer_id) {
                continue;
            }
            if self.users.get(peer_id) != Some(name) {
                self.users.insert(peer_id.clone(), name.clone());
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            RoomId::parse("room-abcd3467").unwrap(),
            "me".to_string(),
            "Guest".to_string(),
        )
    }

    #[test]
    fn test_new_session_knows_only_itself() {
        let s = session();
        assert!(s.peers.is_empty());
        assert!(!s.connected);
        assert_eq!(s.users.get("me"), Some(&"Guest".to_string()));
    }

    #[test]
    fn test_add_peer_skips_self_and_duplicates() {
        let mut s = session();
        assert!(!s.add_peer("me"));
        assert!(s.add_peer("other"));
        assert!(!s.add_peer("other"));
        assert_eq!(s.peers.len(), 1);
    }

    #[test]
    fn test_last_peer_leaving() {
        let mut s = session();
        assert!(s.peer_connected("a"));
        assert!(!s.peer_connected("a"));
        assert!(s.peer_connected("b"));
        assert!(s.connected);

        assert!(!s.remove_peer("a"));
        assert!(s.connected);
        assert!(s.remove_peer("b"));
        assert!(!s.connected);
    }

    #[test]
    fn test_remove_unconnected_peer() {
        let mut s = session();
        s.add_peer("a");
        assert!(!s.remove_peer("a"));
        assert!(s.peers.is_empty());
    }

    #[test]
    fn test_merge_users_keeps_own_name() {
        let mut s = session();
        let mut received = BTreeMap::new();
        received.insert("me".to_string(), "Someone else".to_string());
        received.insert("alice".to_string(), "Alice".to_string());

        assert!(s.merge_users(&received));
        assert!(!s.merge_users(&received));
        assert_eq!(s.users.get("me"), Some(&"Guest".to_string()));
        assert_eq!(s.users.get("alice"), Some(&"Alice".to_string()));
    }

    #[test]
    fn test_phase_helpers() {
        assert!(SessionPhase::Connected.is_connected());
        assert!(!SessionPhase::SignalingExchange.is_connected());
        assert!(SessionPhase::Disconnected.is_terminal());
    }
}
