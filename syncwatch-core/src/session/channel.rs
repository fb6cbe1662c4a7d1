//! Session Channel
//!
//! Room create/join, the signaling handshake and the connection lifecycle:
//!
//! ```text
//! Uninitialized -> Creating | Joining -> SignalingExchange -> Connected -> Disconnected
//! ```
//!
//! Creating and Joining differ only in who made up the room id. Both publish
//! our addresses under `{roomId}/{peerId}` once the network knows them and
//! dial every other peer that shows up in the room.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::SessionError;
use crate::display::StatusDisplay;
use crate::network::{
    NetworkEvent, RoomId, RoomLink, SignalEvent, SignalPayload, SignalStore, Transport,
};
use crate::sync::{Session, SessionPhase, SyncEvent, WireMessage};

/// What the coordinator needs to react to
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A peer's data channel is up
    Connected { peer_id: String },
    /// A connected peer went away, others remain
    PeerLeft { peer_id: String },
    /// The last peer went away. Terminal.
    Disconnected { peer_id: String },
    Inbound { from: String, message: WireMessage },
}

pub struct SessionChannel<S: SignalStore> {
    store: Arc<S>,
    transport: Box<dyn Transport>,
    display: Arc<dyn StatusDisplay>,
    display_name: String,
    session: Option<Session>,
    phase: SessionPhase,
    /// Addresses in our last published signal
    published: Option<Vec<String>>,
    signals: Option<mpsc::UnboundedReceiver<SignalEvent>>,
}

impl<S: SignalStore> SessionChannel<S> {
    pub fn new(
        store: Arc<S>,
        transport: Box<dyn Transport>,
        display: Arc<dyn StatusDisplay>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            display,
            display_name: display_name.into(),
            session: None,
            phase: SessionPhase::Uninitialized,
            published: None,
            signals: None,
        }
    }

    /// Create a new room and return its shareable link
    pub async fn create_room(&mut self) -> Result<RoomLink, SessionError> {
        let room_id = RoomId::generate();
        self.begin(room_id.clone(), SessionPhase::Creating).await?;
        Ok(room_id.link())
    }

    pub async fn join_room(&mut self, room_id: RoomId) -> Result<(), SessionError> {
        self.begin(room_id, SessionPhase::Joining).await
    }

    async fn begin(&mut self, room_id: RoomId, phase: SessionPhase) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Uninitialized {
            return Err(SessionError::AlreadyStarted);
        }

        self.transport.open_room(&room_id)?;
        let local_peer_id = self.transport.local_peer_id().to_string();

        if let Err(e) = self
            .store
            .on_disconnect_cleanup(&room_id, &local_peer_id)
            .await
        {
            warn!("Could not register signaling cleanup: {}", e);
        }
        self.signals = Some(self.store.watch_room(&room_id));

        info!("{:?} room {} as {}", phase, room_id, local_peer_id);
        self.session = Some(Session::new(
            room_id,
            local_peer_id,
            self.display_name.clone(),
        ));
        self.phase = phase;
        Ok(())
    }

    /// Signaling entries of the room; can be taken once
    pub fn take_signals(&mut self) -> Option<mpsc::UnboundedReceiver<SignalEvent>> {
        self.signals.take()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase.is_connected()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn users(&self) -> BTreeMap<String, String> {
        self.session
            .as_ref()
            .map(|s| s.users.clone())
            .unwrap_or_default()
    }

    /// Returns true if the user list changed
    pub fn merge_users(&mut self, users: &BTreeMap<String, String>) -> bool {
        self.session
            .as_mut()
            .is_some_and(|s| s.merge_users(users))
    }

    pub fn handle_network_event(&mut self, event: NetworkEvent) -> Vec<ChannelEvent> {
        match event {
            NetworkEvent::Ready { peer_id } => {
                debug!("Network ready as {}", peer_id);
                Vec::new()
            }
            NetworkEvent::ListeningAddresses { addresses } => {
                self.publish_signal(addresses);
                Vec::new()
            }
            NetworkEvent::PeerConnected { peer_id } => self.peer_connected(peer_id),
            NetworkEvent::PeerDisconnected { peer_id } => self.peer_disconnected(peer_id),
            NetworkEvent::Data { from, data } => vec![ChannelEvent::Inbound {
                from,
                message: WireMessage::parse(&data),
            }],
            NetworkEvent::Error(e) => {
                warn!("Network error: {}", e);
                Vec::new()
            }
        }
    }

    /// Apply an entry of the room's signaling store
    pub fn handle_signal(&mut self, event: SignalEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match event {
            SignalEvent::Added { peer_id, payload } => {
                if session.is_local(&peer_id) {
                    return;
                }
                if session.add_peer(&peer_id) {
                    self.display.add_peer(&peer_id);
                }
                if session.connected_peers.contains(&peer_id) {
                    return;
                }
                debug!("Dialing {} at {:?}", peer_id, payload.addresses);
                if let Err(e) = self.transport.dial(&payload.addresses) {
                    warn!("Failed to dial {}: {}", peer_id, e);
                }
            }
            SignalEvent::Removed { peer_id } => {
                if session.is_local(&peer_id) || session.connected_peers.contains(&peer_id) {
                    return;
                }
                if session.peers.remove(&peer_id) {
                    self.display.remove_peer(&peer_id);
                }
            }
        }
    }

    /// Send an event to every connected peer
    pub fn send(&self, event: &SyncEvent) -> Result<(), SessionError> {
        if !self.phase.is_connected() {
            return Err(SessionError::NotConnected);
        }
        debug!("Sending {}", event.tag());
        self.transport.send(event.encode()?)?;
        Ok(())
    }

    /// Leave the room: close the data channel and run signaling cleanups
    pub async fn disconnect(&mut self) {
        self.transport.shutdown();
        if let Err(e) = self.store.disconnect().await {
            warn!("Signaling cleanup failed: {}", e);
        }
        if self.session.is_some() {
            self.phase = SessionPhase::Disconnected;
        }
    }

    fn publish_signal(&mut self, addresses: Vec<String>) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if self.published.as_ref() == Some(&addresses) {
            return;
        }
        self.published = Some(addresses.clone());

        let store = self.store.clone();
        let display = self.display.clone();
        let room_id = session.room_id.clone();
        let peer_id = session.local_peer_id.clone();
        tokio::spawn(async move {
            match store
                .push_signal(&room_id, &peer_id, SignalPayload { addresses })
                .await
            {
                Ok(()) => display.add_local_peer(&peer_id),
                Err(e) => warn!("Failed to publish signal for room {}: {}", room_id, e),
            }
        });

        if matches!(self.phase, SessionPhase::Creating | SessionPhase::Joining) {
            self.phase = SessionPhase::SignalingExchange;
        }
    }

    fn peer_connected(&mut self, peer_id: String) -> Vec<ChannelEvent> {
        if self.phase.is_terminal() {
            debug!("Ignoring {} after session ended", peer_id);
            return Vec::new();
        }
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };

        if session.add_peer(&peer_id) {
            self.display.add_peer(&peer_id);
        }
        if !session.peer_connected(&peer_id) {
            return Vec::new();
        }

        info!("Connected to {}", peer_id);
        self.phase = SessionPhase::Connected;
        vec![ChannelEvent::Connected { peer_id }]
    }

    fn peer_disconnected(&mut self, peer_id: String) -> Vec<ChannelEvent> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if !session.connected_peers.contains(&peer_id) {
            return Vec::new();
        }

        let last = session.remove_peer(&peer_id);
        self.display.remove_peer(&peer_id);

        if last {
            info!("Last peer {} left, session over", peer_id);
            self.phase = SessionPhase::Disconnected;
            vec![ChannelEvent::Disconnected { peer_id }]
        } else {
            vec![ChannelEvent::PeerLeft { peer_id }]
        }
    }
}
