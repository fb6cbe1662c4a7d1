//! Sync Engine
//!
//! Wire messages, echo suppression and session bookkeeping.

mod dedup;
mod protocol;
mod state;

pub use dedup::*;
pub use protocol::*;
pub use state::*;
