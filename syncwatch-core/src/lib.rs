//! Syncwatch - Core Library
//!
//! Keeps video playback (play, pause, seek, source) in sync between peers.
//! Each peer drives a local mpv; small JSON events travel over a libp2p
//! data channel that peers set up through a shared signaling store.

pub mod config;
pub mod display;
pub mod network;
pub mod player;
pub mod session;
pub mod sync;
pub mod torrent;

// Re-exports for convenience
pub use config::Config;
pub use network::{RoomId, RoomLink};
pub use session::{CoordinatorCommand, RunOutcome, SessionChannel, SyncCoordinator};
pub use sync::{EventDeduplicator, PlaybackState, SyncEvent};
