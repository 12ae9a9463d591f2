//! Platform seam for microphones and render graphs
//!
//! A backend owns the render clock: it invokes the chunk processors from
//! its own execution context. [`CpalBackend`] drives them from cpal
//! streams on dedicated threads; [`OfflineBackend`] lets the caller drive
//! them block by block.

pub mod cpal;
pub mod offline;

pub use self::cpal::CpalBackend;
pub use offline::OfflineBackend;

use crate::audio::capture::CaptureProcessor;
use crate::audio::playback::PlaybackProcessor;
use crate::config::{AudioStreamConfig, PlaybackConfig};
use crate::error::Result;

/// Source of microphones and output render graphs
pub trait AudioBackend: Send + Sync {
    /// Acquire a microphone with the given constraints
    ///
    /// Fails with [`Error::Permission`](crate::Error::Permission) when the
    /// platform denies access or no capture device exists.
    fn open_microphone(&self, config: &AudioStreamConfig) -> Result<Box<dyn Microphone>>;

    /// Start a zero-input, one-output graph rendering `processor`
    fn open_output(
        &self,
        config: &PlaybackConfig,
        processor: PlaybackProcessor,
    ) -> Result<Box<dyn RenderGraph>>;
}

/// An acquired capture device
pub trait Microphone: Send {
    /// Sample rate the device actually delivers
    fn sample_rate(&self) -> u32;

    /// Start a graph rendering the microphone through `processor`
    fn connect(&mut self, processor: CaptureProcessor) -> Result<Box<dyn RenderGraph>>;

    /// Stop every track and release the device. Idempotent.
    fn stop(&mut self);
}

/// A running audio processing graph
pub trait RenderGraph: Send {
    /// Stop render callbacks and drop the processor. Idempotent.
    fn disconnect(&mut self);
}
