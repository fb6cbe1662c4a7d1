//! External media player
//!
//! mpv is driven over its JSON IPC interface. The rest of the crate only sees
//! the `PlaybackEngine` trait and the adapter built on top of it.

mod adapter;
mod engine;
mod mpv;
mod types;

pub use adapter::{EngineOutcome, PlaybackEngineAdapter, HOME_PLACEHOLDER};
pub use engine::{get_bool, get_f64, PlaybackEngine};
pub use mpv::{MpvClient, MpvProcess};
pub use types::{PlayerError, PlayerEvent};

#[cfg(test)]
pub(crate) use engine::FakeEngine;
