//! Playback Engine Adapter
//!
//! Turns raw player events into `PlaybackState` observations and exposes the
//! commands the coordinator applies for remote events.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::engine::{get_bool, get_f64, PlaybackEngine};
use super::types::{PlayerError, PlayerEvent};
use crate::display::StatusDisplay;
use crate::sync::{PlaybackState, SyncEvent};
use crate::torrent::{is_magnet, TorrentHandler};

/// Placeholder for the user's home directory in source paths
pub const HOME_PLACEHOLDER: &str = "%HOMEPATH%";

/// What a player event amounts to
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome {
    /// A state the user produced, candidate for broadcast
    Observed(PlaybackState),
    /// Nothing to broadcast
    Suppressed,
    /// Player is gone
    Quit,
}

pub struct PlaybackEngineAdapter<E: PlaybackEngine> {
    engine: Arc<E>,
    torrent: Arc<dyn TorrentHandler>,
    display: Arc<dyn StatusDisplay>,
    current_source: String,
    /// Set until the pause forced after the first load has been seen
    first_start: bool,
    home_dir: Option<String>,
}

impl<E: PlaybackEngine> PlaybackEngineAdapter<E> {
    pub fn new(
        engine: Arc<E>,
        torrent: Arc<dyn TorrentHandler>,
        display: Arc<dyn StatusDisplay>,
    ) -> Self {
        let home_dir = std::env::var("HOMEPATH")
            .or_else(|_| std::env::var("HOME"))
            .ok();

        Self {
            engine,
            torrent,
            display,
            current_source: String::new(),
            first_start: true,
            home_dir,
        }
    }

    pub fn with_home_dir(mut self, home_dir: Option<String>) -> Self {
        self.home_dir = home_dir;
        self
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Empty until a source was set
    pub fn current_source(&self) -> &str {
        &self.current_source
    }

    /// Open a source: magnet links go to the torrent handler, the rest to the player
    pub fn start(&mut self, source: &str) -> Result<(), PlayerError> {
        if is_magnet(source) {
            self.torrent.start(source);
            return Ok(());
        }

        self.engine.load(source)?;
        self.current_source = source.to_string();
        Ok(())
    }

    /// Switch to a new source.
    ///
    /// Returns the `SourceChanged` event to send when a peer is connected and
    /// `send_to_peer` is set. The source is started either way.
    pub fn set_source(
        &mut self,
        url: &str,
        send_to_peer: bool,
        peer_connected: bool,
    ) -> Option<SyncEvent> {
        let source = self.resolve(url);
        self.current_source = source.clone();
        self.display.set_source(&source);

        let outgoing = if send_to_peer && peer_connected {
            Some(SyncEvent::SourceChanged(source.clone()))
        } else {
            if send_to_peer {
                info!("No peer connected, not sharing source {}", source);
            }
            None
        };

        if let Err(e) = self.start(&source) {
            warn!("Failed to open {}: {}", source, e);
        }

        outgoing
    }

    pub fn set_pause(&self, paused: bool) -> Result<(), PlayerError> {
        if paused {
            self.engine.pause()
        } else {
            self.engine.play()
        }
    }

    pub fn set_position(&self, position: f64) -> Result<(), PlayerError> {
        self.engine.seek(position)
    }

    pub fn set_title(&self, title: &str) -> Result<(), PlayerError> {
        self.engine.set_property("title", Value::from(title))
    }

    /// Classify a player event, querying live state where needed
    pub async fn observe(&mut self, event: PlayerEvent) -> EngineOutcome {
        let observed = match event {
            PlayerEvent::Quit => return EngineOutcome::Quit,
            PlayerEvent::Started => {
                if self.first_start {
                    debug!("First load, holding playback");
                    if let Err(e) = self.engine.pause() {
                        warn!("Could not pause after load: {}", e);
                    }
                }
                return EngineOutcome::Suppressed;
            }
            PlayerEvent::Paused if self.first_start => {
                self.first_start = false;
                debug!("Ignoring pause forced by the first load");
                return EngineOutcome::Suppressed;
            }
            PlayerEvent::Paused => self.read_state(true).await,
            PlayerEvent::Resumed => self.read_state(false).await,
            PlayerEvent::Seek { end } => get_bool(self.engine.as_ref(), "pause")
                .await
                .map(|paused| PlaybackState::new(end, paused)),
        };

        match observed {
            Ok(state) => EngineOutcome::Observed(state),
            Err(e) => {
                warn!("Dropping player event, state query failed: {}", e);
                EngineOutcome::Suppressed
            }
        }
    }

    async fn read_state(&self, paused: bool) -> Result<PlaybackState, PlayerError> {
        let position = get_f64(self.engine.as_ref(), "time-pos").await?;
        Ok(PlaybackState::new(position, paused))
    }

    /// Only a leading placeholder is expanded
    fn resolve(&self, url: &str) -> String {
        let trimmed = url.trim();
        match (&self.home_dir, trimmed.strip_prefix(HOME_PLACEHOLDER)) {
            (Some(home), Some(rest)) => format!("{}{}", home, rest),
            _ => trimmed.to_string(),
        }
    }
}
