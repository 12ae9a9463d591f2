//! Audio subsystem module

pub mod backend;
pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;

pub use backend::{AudioBackend, CpalBackend, Microphone, OfflineBackend, RenderGraph};
pub use buffer::{create_chunk_port, AudioChunk, ChunkPort, ChunkRing};
pub use capture::{CaptureProcessor, CaptureStats, CaptureStatsSnapshot};
pub use device::{list_devices, get_device_by_id, AudioDevice, AudioDeviceInfo};
pub use playback::{PlaybackProcessor, PlaybackStats, PlaybackStatsSnapshot};
