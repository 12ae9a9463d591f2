//! Host broadcast orchestrator
//!
//! Owns the microphone, the capture render graph and a forwarder thread
//! that encodes each emitted chunk and publishes it on the channel. The
//! channel itself is only referenced.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::runtime::RuntimeFlavor;

use crate::audio::backend::{AudioBackend, Microphone, RenderGraph};
use crate::audio::buffer::AudioChunk;
use crate::audio::capture::{CaptureProcessor, CaptureStats, CaptureStatsSnapshot};
use crate::config::{AudioStreamConfig, PayloadEncoding};
use crate::constants::{BROADCAST_PROCESSOR, CHUNK_CHANNEL_CAPACITY};
use crate::error::{AudioError, Error, Result};
use crate::transport::{AudioChunkPayload, Channel};

/// Captures the microphone and publishes `audio_chunk` broadcasts
pub struct CaptureService {
    config: AudioStreamConfig,
    encoding: PayloadEncoding,
    backend: Arc<dyn AudioBackend>,
    microphone: Option<Box<dyn Microphone>>,
    graph: Option<Box<dyn RenderGraph>>,
    forwarder: Option<JoinHandle<()>>,
    channel: Option<Arc<dyn Channel>>,
    active: Arc<AtomicBool>,
    /// Survives restarts so listeners never see a sequence go backwards
    sequence: Arc<AtomicU64>,
    stats: Arc<CaptureStats>,
}

impl CaptureService {
    pub fn new(backend: Arc<dyn AudioBackend>, config: AudioStreamConfig) -> Self {
        Self {
            config,
            encoding: PayloadEncoding::default(),
            backend,
            microphone: None,
            graph: None,
            forwarder: None,
            channel: None,
            active: Arc::new(AtomicBool::new(false)),
            sequence: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(CaptureStats::default()),
        }
    }

    pub fn with_encoding(mut self, encoding: PayloadEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Acquire the microphone with the configured constraints
    ///
    /// A second call while a microphone is held is a no-op.
    pub fn start_capture(&mut self) -> Result<()> {
        if self.microphone.is_some() {
            return Ok(());
        }
        self.config.validate()?;

        let microphone = self.backend.open_microphone(&self.config).map_err(|e| {
            tracing::warn!("Microphone unavailable: {}", e);
            e
        })?;
        self.microphone = Some(microphone);
        Ok(())
    }

    /// Wire the microphone through the chunk processor and start publishing
    pub fn start_broadcast(&mut self, channel: Arc<dyn Channel>) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        let microphone = self
            .microphone
            .as_mut()
            .ok_or(Error::NotInitialized("start_capture must succeed before start_broadcast"))?;

        let sample_rate = microphone.sample_rate();
        let (chunk_tx, chunk_rx) = bounded::<AudioChunk>(CHUNK_CHANNEL_CAPACITY);
        let processor = CaptureProcessor::with_stats(self.config.chunk_size, chunk_tx, self.stats.clone());
        let graph = microphone.connect(processor)?;

        let forwarder = Forwarder {
            chunks: chunk_rx,
            channel: channel.clone(),
            active: self.active.clone(),
            stats: self.stats.clone(),
            encoding: self.encoding,
            sample_rate,
            sequence: self.sequence.clone(),
        };
        self.active.store(true, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name(format!("{}-forwarder", BROADCAST_PROCESSOR))
            .spawn(move || forwarder.run())
            .map_err(|e| {
                self.active.store(false, Ordering::SeqCst);
                AudioError::StreamError(e.to_string())
            })?;

        self.graph = Some(graph);
        self.forwarder = Some(handle);
        self.channel = Some(channel);

        tracing::info!(
            "Broadcast started on {} ({} Hz, {} samples/chunk, {:.1}ms)",
            self.channel.as_ref().map(|c| c.topic()).unwrap_or_default(),
            sample_rate,
            self.config.chunk_size,
            self.config.chunk_duration_ms()
        );
        Ok(())
    }

    /// Tear everything down. Safe to call at any time, any number of times.
    ///
    /// Blocks briefly while the render and forwarder threads are joined. On a
    /// multi-threaded tokio runtime the wait runs under
    /// [`block_in_place`](tokio::task::block_in_place).
    pub fn stop_broadcast(&mut self) {
        let was_active = self.active.swap(false, Ordering::SeqCst);

        let graph = self.graph.take();
        let forwarder = self.forwarder.take();
        let microphone = self.microphone.take();
        self.channel = None;
        if graph.is_some() || forwarder.is_some() || microphone.is_some() {
            join_off_runtime(move || release(graph, forwarder, microphone));
        }

        if was_active {
            let stats = self.stats.snapshot();
            tracing::info!(
                "Broadcast stopped: {} chunks published, {} dropped, {} send errors",
                stats.chunks_published,
                stats.chunks_dropped,
                stats.send_errors
            );
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether a microphone is currently held
    pub fn is_capturing(&self) -> bool {
        self.microphone.is_some()
    }

    pub fn config(&self) -> &AudioStreamConfig {
        &self.config
    }

    pub fn stats(&self) -> CaptureStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        self.stop_broadcast();
    }
}

fn release(
    graph: Option<Box<dyn RenderGraph>>,
    forwarder: Option<JoinHandle<()>>,
    microphone: Option<Box<dyn Microphone>>,
) {
    if let Some(mut graph) = graph {
        graph.disconnect();
    }
    // The forwarder exits once the processor (and its sender) is gone.
    if let Some(handle) = forwarder {
        let _ = handle.join();
    }
    if let Some(mut microphone) = microphone {
        microphone.stop();
    }
}

/// Run a blocking join without stalling a tokio worker
///
/// `block_in_place` panics on a current-thread runtime, where the join
/// simply runs inline.
fn join_off_runtime<F: FnOnce()>(join: F) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(join)
        }
        _ => join(),
    }
}

/// Main-thread side of the capture hand-off
struct Forwarder {
    chunks: Receiver<AudioChunk>,
    channel: Arc<dyn Channel>,
    active: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
    encoding: PayloadEncoding,
    sample_rate: u32,
    sequence: Arc<AtomicU64>,
}

impl Forwarder {
    fn run(self) {
        loop {
            match self.chunks.recv_timeout(Duration::from_millis(50)) {
                Ok(chunk) => self.publish(chunk),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!("Forwarder for {} finished", self.channel.topic());
    }

    fn publish(&self, chunk: AudioChunk) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        let result = AudioChunkPayload::new(sequence, self.sample_rate, chunk)
            .into_message(self.encoding)
            .and_then(|message| self.channel.send(message));

        match result {
            Ok(()) => self.stats.record_published(),
            Err(e) => {
                self.stats.record_send_error();
                tracing::warn!("Failed to publish chunk {}: {}", sequence, e);
            }
        }
    }
}
