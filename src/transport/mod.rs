//! Pub/sub transport for audio chunks and presence

pub mod channel;
pub mod local;
pub mod message;

pub use channel::{
    BroadcastMessage, Channel, ChannelState, Payload, PresenceEvent, PresenceState, Role,
};
pub use local::{ChannelOptions, LocalChannel, LocalHub};
pub use message::AudioChunkPayload;
