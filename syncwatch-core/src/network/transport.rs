//! Peer data channel boundary

use super::behaviour::NetworkError;
use super::room_code::RoomId;

/// Commands into the data channel. Its events arrive as `NetworkEvent`s.
pub trait Transport: Send + Sync {
    fn local_peer_id(&self) -> &str;

    /// Join the room's channel; may only be called once
    fn open_room(&self, room_id: &RoomId) -> Result<(), NetworkError>;

    /// Connect to a peer found through signaling
    fn dial(&self, addresses: &[String]) -> Result<(), NetworkError>;

    /// Deliver a payload to every connected peer of the room
    fn send(&self, data: Vec<u8>) -> Result<(), NetworkError>;

    fn shutdown(&self);
}

/// Records every command, for tests
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct FakeTransport {
    pub peer_id: String,
    pub log: std::sync::Arc<parking_lot::Mutex<Vec<String>>>,
    pub sent: std::sync::Arc<parking_lot::Mutex<Vec<Vec<u8>>>>,
}

#[cfg(test)]
impl FakeTransport {
    pub fn new(peer_id: &str) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            log: Default::default(),
            sent: Default::default(),
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Payloads sent so far, decoded
    pub fn sent_events(&self) -> Vec<crate::sync::WireMessage> {
        self.sent
            .lock()
            .iter()
            .map(|data| crate::sync::WireMessage::parse(data))
            .collect()
    }
}

#[cfg(test)]
impl Transport for FakeTransport {
    fn local_peer_id(&self) -> &str {
        &self.peer_id
    }

    fn open_room(&self, room_id: &RoomId) -> Result<(), NetworkError> {
        self.log.lock().push(format!("open {}", room_id));
        Ok(())
    }

    fn dial(&self, addresses: &[String]) -> Result<(), NetworkError> {
        self.log.lock().push(format!("dial {}", addresses.join(",")));
        Ok(())
    }

    fn send(&self, data: Vec<u8>) -> Result<(), NetworkError> {
        self.sent.lock().push(data);
        Ok(())
    }

    fn shutdown(&self) {
        self.log.lock().push("shutdown".to_string());
    }
}
