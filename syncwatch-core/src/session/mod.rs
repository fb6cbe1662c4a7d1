//! Peer session
//!
//! `SessionChannel` owns room identity, signaling and the data channel.
//! `SyncCoordinator` ties it to the player through the deduplicator.

mod channel;
mod coordinator;

pub use channel::{ChannelEvent, SessionChannel};
pub use coordinator::{CoordinatorCommand, RunOutcome, SyncCoordinator};

use thiserror::Error;

use crate::network::{NetworkError, SignalingError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No peer connected")]
    NotConnected,

    #[error("Session already started")]
    AlreadyStarted,

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}
