//! Caller-driven backend without audio hardware
//!
//! The render clock is whoever calls [`OfflineBackend::render_input`] and
//! [`OfflineBackend::render_output`]. Used for tests and headless runs.

use parking_lot::Mutex;
use std::sync::Arc;

use super::{AudioBackend, Microphone, RenderGraph};
use crate::audio::capture::CaptureProcessor;
use crate::audio::playback::PlaybackProcessor;
use crate::config::{AudioStreamConfig, PlaybackConfig};
use crate::error::{Error, Result};

#[derive(Default)]
struct OfflineState {
    deny_microphone: bool,
    capture: Option<CaptureProcessor>,
    playback: Option<PlaybackProcessor>,
    live_tracks: usize,
    live_graphs: usize,
}

/// Backend whose render callbacks are invoked explicitly
#[derive(Clone, Default)]
pub struct OfflineBackend {
    state: Arc<Mutex<OfflineState>>,
}

impl OfflineBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `open_microphone` fail as if access was refused
    pub fn deny_microphone(&self) {
        self.state.lock().deny_microphone = true;
    }

    pub fn allow_microphone(&self) {
        self.state.lock().deny_microphone = false;
    }

    /// Run one capture render callback with a mono input block
    ///
    /// Returns `false` when no capture graph is connected.
    pub fn render_input(&self, block: &[f32]) -> bool {
        match self.state.lock().capture.as_mut() {
            Some(processor) => processor.process(&[block]),
            None => false,
        }
    }

    /// Run one playback render callback of `frames` samples
    ///
    /// Without a connected playback graph the output is silence.
    pub fn render_output(&self, frames: usize) -> Vec<f32> {
        let mut output = vec![0.0f32; frames];
        if let Some(processor) = self.state.lock().playback.as_mut() {
            processor.process(&mut output);
        }
        output
    }

    pub fn capture_connected(&self) -> bool {
        self.state.lock().capture.is_some()
    }

    pub fn playback_connected(&self) -> bool {
        self.state.lock().playback.is_some()
    }

    /// Microphones acquired and not yet stopped
    pub fn live_tracks(&self) -> usize {
        self.state.lock().live_tracks
    }

    /// Graphs started and not yet disconnected
    pub fn live_graphs(&self) -> usize {
        self.state.lock().live_graphs
    }
}

impl AudioBackend for OfflineBackend {
    fn open_microphone(&self, config: &AudioStreamConfig) -> Result<Box<dyn Microphone>> {
        let mut state = self.state.lock();
        if state.deny_microphone {
            return Err(Error::Permission("microphone access denied".into()));
        }
        state.live_tracks += 1;
        Ok(Box::new(OfflineMicrophone {
            backend: self.clone(),
            sample_rate: config.sample_rate,
            stopped: false,
        }))
    }

    fn open_output(
        &self,
        _config: &PlaybackConfig,
        processor: PlaybackProcessor,
    ) -> Result<Box<dyn RenderGraph>> {
        let mut state = self.state.lock();
        state.playback = Some(processor);
        state.live_graphs += 1;
        Ok(Box::new(OfflineGraph {
            backend: self.clone(),
            kind: GraphKind::Playback,
            connected: true,
        }))
    }
}

struct OfflineMicrophone {
    backend: OfflineBackend,
    sample_rate: u32,
    stopped: bool,
}

impl Microphone for OfflineMicrophone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn connect(&mut self, processor: CaptureProcessor) -> Result<Box<dyn RenderGraph>> {
        if self.stopped {
            return Err(Error::NotInitialized("microphone already stopped"));
        }
        let mut state = self.backend.state.lock();
        state.capture = Some(processor);
        state.live_graphs += 1;
        Ok(Box::new(OfflineGraph {
            backend: self.backend.clone(),
            kind: GraphKind::Capture,
            connected: true,
        }))
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.backend.state.lock().live_tracks -= 1;
        }
    }
}

impl Drop for OfflineMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

enum GraphKind {
    Capture,
    Playback,
}

struct OfflineGraph {
    backend: OfflineBackend,
    kind: GraphKind,
    connected: bool,
}

impl RenderGraph for OfflineGraph {
    fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        let mut state = self.backend.state.lock();
        match self.kind {
            GraphKind::Capture => state.capture = None,
            GraphKind::Playback => state.playback = None,
        }
        state.live_graphs -= 1;
    }
}

impl Drop for OfflineGraph {
    fn drop(&mut self) {
        self.disconnect();
    }
}
