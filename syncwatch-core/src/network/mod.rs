//! P2P Networking
//!
//! Room ids, the signaling store peers meet in, and the libp2p data channel.

mod behaviour;
mod room_code;
mod signaling;
mod transport;

pub use behaviour::{
    room_topic, NetworkCommand, NetworkError, NetworkEvent, NetworkHandle, NetworkManager,
};
pub use room_code::{RoomId, RoomLink, LINK_SCHEME};
pub use signaling::{
    MemorySignalHub, MemorySignalStore, NtfySignalStore, SignalEvent, SignalPayload, SignalStore,
    SignalingError, SignalingMessage,
};
pub use transport::Transport;

#[cfg(test)]
pub(crate) use transport::FakeTransport;
