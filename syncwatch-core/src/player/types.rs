//! Player boundary types

use thiserror::Error;

/// Lifecycle events emitted by the external player
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// A file finished loading
    Started,
    Paused,
    Resumed,
    /// A seek completed at `end` seconds
    Seek { end: f64 },
    /// The player exited or closed its IPC connection
    Quit,
}

/// Errors that can occur when talking to the player
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("IPC I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid IPC message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Player rejected command: {0}")]
    Command(String),

    #[error("Player is not running or IPC connection closed")]
    Disconnected,

    #[error("Failed to start player: {0}")]
    Spawn(String),

    #[error("Property {0} has an unexpected type")]
    UnexpectedType(String),
}
