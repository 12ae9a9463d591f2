//! # Roomcast
//!
//! Live audio room broadcast pipeline: a host captures its microphone,
//! cuts the sample stream into fixed-size chunks and publishes them on a
//! pub/sub channel; listeners reassemble the chunks into a continuous
//! output stream.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── HOST ─────────────────────────────────┐
//! │  ┌────────────┐   ┌──────────────────────┐   ┌──────────────────────┐ │
//! │  │ Microphone │──►│ broadcast-processor  │──►│   CaptureService     │ │
//! │  │ (backend)  │   │ (render thread)      │   │   forwarder thread   │ │
//! │  └────────────┘   │ accumulate → chunk   │   │   encode + publish   │ │
//! │                   └──────────┬───────────┘   └──────────┬───────────┘ │
//! │                   crossbeam bounded SPSC                │             │
//! └─────────────────────────────────────────────────────────┼─────────────┘
//!                                                           │ "audio_chunk"
//!                              ┌────────────────────────────▼─────────────┐
//!                              │        Channel (pub/sub + presence)      │
//!                              └────────────────────────────┬─────────────┘
//! ┌─────────────────────────────── LISTENER ────────────────┼─────────────┐
//! │  ┌──────────────────────┐   ┌──────────────────────┐    │             │
//! │  │ playback-processor   │◄──│   PlaybackService    │◄───┘             │
//! │  │ (render thread)      │   │   dispatcher task    │                  │
//! │  │ FIFO → samples/0.0   │   │   decode + sequence  │                  │
//! │  └──────────┬───────────┘   └──────────────────────┘                  │
//! │             ▼           lock-free chunk port                          │
//! │         Speakers                                                      │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Presence events and the `host_left` control message travel over the
//! same channel and drive [`session::ListenerSession`]'s host-liveness
//! state machine.

pub mod audio;
pub mod config;
pub mod error;
pub mod service;
pub mod session;
pub mod transport;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Samples per transported chunk
    pub const CHUNK_SIZE: usize = 4096;

    /// Default capture sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Typical samples per render callback
    pub const RENDER_QUANTUM: usize = 128;

    /// Identifier of the capture-side chunk processor
    pub const BROADCAST_PROCESSOR: &str = "broadcast-processor";

    /// Identifier of the playback-side chunk processor
    pub const PLAYBACK_PROCESSOR: &str = "playback-processor";

    /// Broadcast event carrying one audio chunk
    pub const AUDIO_CHUNK_EVENT: &str = "audio_chunk";

    /// Broadcast event sent by a host that ends its session
    pub const HOST_LEFT_EVENT: &str = "host_left";

    /// Capacity of the render thread → main thread hand-off (in chunks)
    pub const CHUNK_CHANNEL_CAPACITY: usize = 32;

    /// Capacity of the main thread → render thread port (in chunks)
    pub const PLAYBACK_PORT_CAPACITY: usize = 64;

    /// Default bound of the playback queue (in chunks, ~3s at 44.1kHz)
    pub const DEFAULT_MAX_QUEUED_CHUNKS: usize = 32;
}
