//! Sync Coordinator
//!
//! Local player observations go through the deduplicator and out over the
//! session channel. Inbound messages are recorded as received first and only
//! then applied to the player, so the player's own event for that apply is
//! recognised as an echo.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::channel::{ChannelEvent, SessionChannel};
use super::SessionError;
use crate::display::StatusDisplay;
use crate::network::{NetworkEvent, RoomLink, SignalEvent, SignalStore};
use crate::player::{EngineOutcome, PlaybackEngine, PlaybackEngineAdapter, PlayerEvent};
use crate::sync::{EventDeduplicator, PlaybackState, SyncEvent, WireMessage};

/// Upper bound for publishing our departure once the player is gone
const LEAVE_TIMEOUT: Duration = Duration::from_secs(3);

/// Requests from the user interface
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorCommand {
    SetSource { url: String, send_to_peer: bool },
    SetTitle(String),
    Shutdown,
}

/// Why `run` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The player exited and the room was left; the process should end now
    PlayerQuit,
    /// Asked to stop
    Shutdown,
    /// The network task stopped
    NetworkClosed,
}

pub struct SyncCoordinator<E: PlaybackEngine, S: SignalStore> {
    adapter: PlaybackEngineAdapter<E>,
    dedup: EventDeduplicator,
    channel: SessionChannel<S>,
    display: Arc<dyn StatusDisplay>,
}

impl<E: PlaybackEngine, S: SignalStore> SyncCoordinator<E, S> {
    pub fn new(
        adapter: PlaybackEngineAdapter<E>,
        channel: SessionChannel<S>,
        dedup: EventDeduplicator,
        display: Arc<dyn StatusDisplay>,
    ) -> Self {
        Self {
            adapter,
            dedup,
            channel,
            display,
        }
    }

    pub fn adapter(&self) -> &PlaybackEngineAdapter<E> {
        &self.adapter
    }

    pub fn channel(&self) -> &SessionChannel<S> {
        &self.channel
    }

    pub fn dedup(&self) -> &EventDeduplicator {
        &self.dedup
    }

    pub async fn create_room(&mut self) -> Result<RoomLink, SessionError> {
        let link = self.channel.create_room().await?;
        self.show_room(&link);
        Ok(link)
    }

    pub async fn join_room(&mut self, link: &RoomLink) -> Result<(), SessionError> {
        self.channel.join_room(link.room_id().clone()).await?;
        self.show_room(link);
        Ok(())
    }

    fn show_room(&self, link: &RoomLink) {
        let link = link.to_string();
        self.display.set_room_link(&link);
        if let Err(e) = self.adapter.set_title(&link) {
            warn!("Could not set player title: {}", e);
        }
    }

    /// Play a new source, sharing it with the room if asked to
    pub fn set_source(&mut self, url: &str, send_to_peer: bool) {
        let connected = self.channel.is_connected();
        if let Some(event) = self.adapter.set_source(url, send_to_peer, connected) {
            self.send(&event);
        }
    }

    /// Returns `Some` when the player is gone
    pub async fn handle_player_event(&mut self, event: PlayerEvent) -> Option<RunOutcome> {
        match self.adapter.observe(event).await {
            EngineOutcome::Observed(state) => self.handle_observation(state),
            EngineOutcome::Suppressed => {}
            EngineOutcome::Quit => return Some(RunOutcome::PlayerQuit),
        }
        None
    }

    pub fn handle_observation(&mut self, state: PlaybackState) {
        if !self.channel.is_connected() {
            debug!("Not connected, keeping {:?} local", state);
            return;
        }
        if self.dedup.should_broadcast(&state) {
            self.send(&SyncEvent::VideoState(state));
        }
    }

    pub fn handle_network_event(&mut self, event: NetworkEvent) {
        for event in self.channel.handle_network_event(event) {
            match event {
                ChannelEvent::Connected { peer_id } => self.on_peer_connected(&peer_id),
                ChannelEvent::PeerLeft { .. } => self.display.set_users(&self.channel.users()),
                ChannelEvent::Disconnected { peer_id } => {
                    info!("{} was the last peer, nothing left to sync with", peer_id);
                    self.display.set_users(&self.channel.users());
                }
                ChannelEvent::Inbound { from, message } => {
                    debug!("Message from {}", from);
                    self.handle_inbound(message);
                }
            }
        }
    }

    pub fn handle_signal(&mut self, event: SignalEvent) {
        self.channel.handle_signal(event);
    }

    /// Late joiners get our source; everyone gets our user list
    fn on_peer_connected(&mut self, peer_id: &str) {
        let source = self.adapter.current_source();
        if !source.is_empty() {
            debug!("Sending current source to {}", peer_id);
            let event = SyncEvent::SourceChanged(source.to_string());
            self.send(&event);
        }

        let users = self.channel.users();
        self.display.set_users(&users);
        self.send(&SyncEvent::UserListChanged(users));
    }

    pub fn handle_inbound(&mut self, message: WireMessage) {
        let event = match message {
            WireMessage::Sync(event) => event,
            WireMessage::Unknown { tag } => {
                debug!("Ignoring message with unknown tag {}", tag);
                return;
            }
            WireMessage::Malformed(reason) => {
                debug!("Ignoring malformed message: {}", reason);
                return;
            }
        };

        // Before touching the player, see module docs
        self.dedup.record_received(event.clone());

        match event {
            SyncEvent::VideoState(state) => {
                if let Err(e) = self.adapter.set_pause(state.paused) {
                    warn!("Failed to apply pause={}: {}", state.paused, e);
                }
                if let Err(e) = self.adapter.set_position(state.position) {
                    warn!("Failed to seek to {}: {}", state.position, e);
                }
            }
            SyncEvent::SourceChanged(url) => {
                if url == self.adapter.current_source() {
                    debug!("Already playing {}", url);
                    return;
                }
                self.adapter.set_source(&url, false, self.channel.is_connected());
            }
            SyncEvent::UserListChanged(users) => {
                if self.channel.merge_users(&users) {
                    self.display.set_users(&self.channel.users());
                }
            }
        }
    }

    fn send(&self, event: &SyncEvent) {
        if let Err(e) = self.channel.send(event) {
            warn!("Failed to send {}: {}", event.tag(), e);
        }
    }

    /// Leave the room
    pub async fn shutdown(&mut self) {
        self.channel.disconnect().await;
    }

    /// Best-effort leave so the room stops advertising us
    async fn player_gone(&mut self) -> RunOutcome {
        if tokio::time::timeout(LEAVE_TIMEOUT, self.shutdown())
            .await
            .is_err()
        {
            warn!("Timed out leaving the room");
        }
        RunOutcome::PlayerQuit
    }

    /// Event loop. Returns when the player quits, the network stops, or on `Shutdown`.
    pub async fn run(
        mut self,
        mut player_events: mpsc::UnboundedReceiver<PlayerEvent>,
        mut network_events: mpsc::UnboundedReceiver<NetworkEvent>,
        mut commands: mpsc::UnboundedReceiver<CoordinatorCommand>,
    ) -> RunOutcome {
        let mut signals = self.channel.take_signals();

        loop {
            tokio::select! {
                event = player_events.recv() => {
                    let Some(event) = event else {
                        return self.player_gone().await;
                    };
                    if self.handle_player_event(event).await.is_some() {
                        return self.player_gone().await;
                    }
                }
                event = network_events.recv() => {
                    let Some(event) = event else {
                        warn!("Network task stopped");
                        return RunOutcome::NetworkClosed;
                    };
                    self.handle_network_event(event);
                }
                signal = next_signal(&mut signals) => {
                    match signal {
                        Some(signal) => self.handle_signal(signal),
                        None => {
                            debug!("Signaling watch ended");
                            signals = None;
                        }
                    }
                }
                command = commands.recv() => {
                    match command {
                        Some(CoordinatorCommand::SetSource { url, send_to_peer }) => {
                            self.set_source(&url, send_to_peer);
                        }
                        Some(CoordinatorCommand::SetTitle(title)) => {
                            if let Err(e) = self.adapter.set_title(&title) {
                                warn!("Could not set player title: {}", e);
                            }
                        }
                        Some(CoordinatorCommand::Shutdown) | None => {
                            self.shutdown().await;
                            return RunOutcome::Shutdown;
                        }
                    }
                }
            }
        }
    }
}

async fn next_signal(
    signals: &mut Option<mpsc::UnboundedReceiver<SignalEvent>>,
) -> Option<SignalEvent> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::RecordingDisplay;
    use crate::network::{FakeTransport, MemorySignalHub, MemorySignalStore, SignalPayload};
    use crate::player::FakeEngine;
    use crate::torrent::RecordingTorrentHandler;

    struct Fixture {
        engine: Arc<FakeEngine>,
        transport: FakeTransport,
        hub: MemorySignalHub,
        store: Arc<MemorySignalStore>,
        coordinator: SyncCoordinator<FakeEngine, MemorySignalStore>,
    }

    fn fixture() -> Fixture {
        let engine = Arc::new(FakeEngine::with_state(12.34, true));
        let display = Arc::new(RecordingDisplay::default());
        let adapter = PlaybackEngineAdapter::new(
            engine.clone(),
            Arc::new(RecordingTorrentHandler::default()),
            display.clone(),
        )
        .with_home_dir(None);

        let hub = MemorySignalHub::new();
        let store = Arc::new(hub.connect());
        let transport = FakeTransport::new("host");
        let channel = SessionChannel::new(
            store.clone(),
            Box::new(transport.clone()),
            display.clone(),
            "Host",
        );

        Fixture {
            engine,
            transport,
            hub,
            store,
            coordinator: SyncCoordinator::new(adapter, channel, EventDeduplicator::new(), display),
        }
    }

    fn connect(f: &mut Fixture, peer: &str) {
        f.coordinator.handle_network_event(NetworkEvent::PeerConnected {
            peer_id: peer.to_string(),
        });
    }

    fn sent_video_states(f: &Fixture) -> Vec<SyncEvent> {
        f.transport
            .sent_events()
            .into_iter()
            .filter_map(|m| match m {
                WireMessage::Sync(e @ SyncEvent::VideoState(_)) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn sent_sources(f: &Fixture) -> Vec<SyncEvent> {
        f.transport
            .sent_events()
            .into_iter()
            .filter_map(|m| match m {
                WireMessage::Sync(e @ SyncEvent::SourceChanged(_)) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// Get past the pause forced by the first load
    async fn started(f: &mut Fixture) {
        f.coordinator.handle_player_event(PlayerEvent::Started).await;
        f.coordinator.handle_player_event(PlayerEvent::Paused).await;
    }

    #[tokio::test]
    async fn test_create_room_sets_title() {
        let mut f = fixture();
        let link = f.coordinator.create_room().await.unwrap();
        assert_eq!(
            f.engine.calls(),
            vec![format!("set title=\"{}\"", link)]
        );
    }

    #[tokio::test]
    async fn test_applied_remote_state_is_not_echoed() {
        let mut f = fixture();
        f.coordinator.create_room().await.unwrap();
        connect(&mut f, "guest");
        started(&mut f).await;

        // user pauses at 12.34
        f.coordinator.handle_player_event(PlayerEvent::Paused).await;
        assert_eq!(sent_video_states(&f), vec![SyncEvent::video_state(12.34, true)]);

        // the same state arrives from the peer and is applied
        f.coordinator
            .handle_inbound(WireMessage::Sync(SyncEvent::video_state(12.34, true)));
        let calls = f.engine.calls();
        assert_eq!(&calls[calls.len() - 2..], ["pause", "seek 12.34"]);

        // the player's resulting events stay local
        f.coordinator.handle_player_event(PlayerEvent::Paused).await;
        f.coordinator
            .handle_player_event(PlayerEvent::Seek { end: 12.34 })
            .await;
        assert_eq!(sent_video_states(&f).len(), 1);
    }

    #[tokio::test]
    async fn test_remote_state_echo_suppressed_then_user_change_sent() {
        let mut f = fixture();
        f.coordinator.create_room().await.unwrap();
        connect(&mut f, "guest");
        started(&mut f).await;

        f.coordinator
            .handle_inbound(WireMessage::Sync(SyncEvent::video_state(30.0, false)));
        f.engine.set_state(30.0, false);
        f.coordinator.handle_player_event(PlayerEvent::Resumed).await;
        assert!(sent_video_states(&f).is_empty());

        f.engine.set_state(31.5, true);
        f.coordinator.handle_player_event(PlayerEvent::Paused).await;
        assert_eq!(sent_video_states(&f), vec![SyncEvent::video_state(31.5, true)]);
    }

    #[tokio::test]
    async fn test_observations_before_connect_stay_local() {
        let mut f = fixture();
        f.coordinator.create_room().await.unwrap();
        started(&mut f).await;

        f.coordinator.handle_player_event(PlayerEvent::Paused).await;
        assert!(f.transport.sent_events().is_empty());
        assert_eq!(f.coordinator.dedup().state().last_sent, None);
    }

    #[tokio::test]
    async fn test_no_source_no_catch_up() {
        let mut f = fixture();
        f.coordinator.create_room().await.unwrap();
        connect(&mut f, "guest");

        assert!(sent_sources(&f).is_empty());
        // user list still goes out
        assert!(f.transport.sent_events().iter().any(|m| matches!(
            m,
            WireMessage::Sync(SyncEvent::UserListChanged(users)) if users.get("host") == Some(&"Host".to_string())
        )));
    }

    #[tokio::test]
    async fn test_late_joiner_gets_current_source_once() {
        let mut f = fixture();
        f.coordinator.create_room().await.unwrap();
        f.coordinator.set_source("/videos/a.mkv", true);
        assert!(f.transport.sent_events().is_empty());

        connect(&mut f, "guest");
        connect(&mut f, "guest");

        assert_eq!(
            sent_sources(&f),
            vec![SyncEvent::SourceChanged("/videos/a.mkv".to_string())]
        );
    }

    #[tokio::test]
    async fn test_source_shared_when_connected() {
        let mut f = fixture();
        f.coordinator.create_room().await.unwrap();
        connect(&mut f, "guest");

        f.coordinator.set_source("/videos/b.mkv", true);
        f.coordinator.set_source("/videos/c.mkv", false);
        assert_eq!(
            sent_sources(&f),
            vec![SyncEvent::SourceChanged("/videos/b.mkv".to_string())]
        );
    }

    #[tokio::test]
    async fn test_inbound_source_loads_once() {
        let mut f = fixture();
        f.coordinator.create_room().await.unwrap();
        connect(&mut f, "guest");

        let event = WireMessage::Sync(SyncEvent::SourceChanged("/videos/a.mkv".to_string()));
        f.coordinator.handle_inbound(event.clone());
        f.coordinator.handle_inbound(event);

        let loads: Vec<String> = f
            .engine
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("load"))
            .collect();
        assert_eq!(loads, vec!["load /videos/a.mkv"]);
        // not sent back
        assert!(sent_sources(&f).is_empty());
    }

    #[tokio::test]
    async fn test_inbound_users_are_merged() {
        let mut f = fixture();
        f.coordinator.create_room().await.unwrap();

        let mut users = std::collections::BTreeMap::new();
        users.insert("guest".to_string(), "Alice".to_string());
        f.coordinator
            .handle_inbound(WireMessage::Sync(SyncEvent::UserListChanged(users)));

        let known = f.coordinator.channel().users();
        assert_eq!(known.get("guest"), Some(&"Alice".to_string()));
        assert_eq!(known.get("host"), Some(&"Host".to_string()));
        assert!(f.engine.calls().iter().all(|c| !c.starts_with("load")));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_are_ignored() {
        let mut f = fixture();
        f.coordinator.create_room().await.unwrap();
        let before = f.engine.calls();

        f.coordinator.handle_inbound(WireMessage::parse(br#"{"info":"hi"}"#));
        f.coordinator.handle_inbound(WireMessage::parse(b"{oops"));

        assert_eq!(f.engine.calls(), before);
        assert_eq!(f.coordinator.dedup().state().last_received, None);
    }

    #[tokio::test]
    async fn test_run_ends_when_player_quits() {
        let f = fixture();
        let (player_tx, player_rx) = mpsc::unbounded_channel();
        let (_network_tx, network_rx) = mpsc::unbounded_channel();
        let (_command_tx, command_rx) = mpsc::unbounded_channel();

        player_tx.send(PlayerEvent::Quit).unwrap();
        let outcome = f.coordinator.run(player_rx, network_rx, command_rx).await;
        assert_eq!(outcome, RunOutcome::PlayerQuit);
    }

    #[tokio::test]
    async fn test_player_quit_leaves_the_room() {
        let mut f = fixture();
        f.coordinator.create_room().await.unwrap();
        let room = f.coordinator.channel().session().unwrap().room_id.clone();
        f.store
            .push_signal(
                &room,
                "host",
                SignalPayload {
                    addresses: vec!["/ip4/127.0.0.1/tcp/4001".to_string()],
                },
            )
            .await
            .unwrap();
        assert_eq!(f.hub.peers(&room), vec!["host".to_string()]);

        let (player_tx, player_rx) = mpsc::unbounded_channel();
        let (_network_tx, network_rx) = mpsc::unbounded_channel();
        let (_command_tx, command_rx) = mpsc::unbounded_channel();
        player_tx.send(PlayerEvent::Quit).unwrap();

        let outcome = f.coordinator.run(player_rx, network_rx, command_rx).await;
        assert_eq!(outcome, RunOutcome::PlayerQuit);
        // The store outlives the coordinator, so this is not the drop cleanup
        assert!(f.hub.peers(&room).is_empty());
        assert_eq!(f.transport.log().last().map(String::as_str), Some("shutdown"));
    }

    #[tokio::test]
    async fn test_inbound_position_is_never_negative() {
        let mut f = fixture();
        f.coordinator.create_room().await.unwrap();

        f.coordinator.handle_inbound(WireMessage::parse(
            br#"{"videoState":{"position":-5,"paused":true}}"#,
        ));
        f.coordinator.handle_inbound(WireMessage::parse(
            br#"{"videoState":{"position":"NaN","paused":true}}"#,
        ));

        let seeks: Vec<String> = f
            .engine
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("seek"))
            .collect();
        assert_eq!(seeks, vec!["seek 0"]);
    }

    #[tokio::test]
    async fn test_run_applies_commands() {
        let f = fixture();
        let engine = f.engine.clone();
        let transport = f.transport.clone();
        let (_player_tx, player_rx) = mpsc::unbounded_channel();
        let (_network_tx, network_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        command_tx
            .send(CoordinatorCommand::SetSource {
                url: "/videos/a.mkv".to_string(),
                send_to_peer: true,
            })
            .unwrap();
        command_tx
            .send(CoordinatorCommand::SetTitle("movie night".to_string()))
            .unwrap();
        command_tx.send(CoordinatorCommand::Shutdown).unwrap();

        let outcome = f.coordinator.run(player_rx, network_rx, command_rx).await;
        assert_eq!(outcome, RunOutcome::Shutdown);
        assert_eq!(
            engine.calls(),
            vec!["load /videos/a.mkv", r#"set title="movie night""#]
        );
        assert_eq!(transport.log(), vec!["shutdown"]);
    }
}
