//! Listener playback orchestrator
//!
//! Opens the output graph around a [`PlaybackProcessor`], subscribes to
//! `audio_chunk` broadcasts and runs a dispatcher task that decodes each
//! message, applies the sequencing policy and posts the chunk to the
//! processor's port.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::audio::backend::{AudioBackend, RenderGraph};
use crate::audio::buffer::{create_chunk_port, ChunkPort};
use crate::audio::playback::{PlaybackProcessor, PlaybackStats, PlaybackStatsSnapshot};
use crate::config::PlaybackConfig;
use crate::constants::AUDIO_CHUNK_EVENT;
use crate::error::Result;
use crate::transport::{AudioChunkPayload, BroadcastMessage, Channel, ChannelState};

#[derive(Default)]
struct Running {
    graph: Option<Box<dyn RenderGraph>>,
    channel: Option<Arc<dyn Channel>>,
    dispatcher: Option<JoinHandle<()>>,
}

/// Plays `audio_chunk` broadcasts received on a channel
pub struct PlaybackService {
    config: PlaybackConfig,
    backend: Arc<dyn AudioBackend>,
    active: Arc<AtomicBool>,
    stats: Arc<PlaybackStats>,
    running: Mutex<Running>,
}

impl PlaybackService {
    pub fn new(backend: Arc<dyn AudioBackend>, config: PlaybackConfig) -> Self {
        Self {
            config,
            backend,
            active: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(PlaybackStats::default()),
            running: Mutex::new(Running::default()),
        }
    }

    /// Open the output graph, then subscribe to chunk broadcasts
    ///
    /// The channel is subscribed here unless it is already joined. On a
    /// failed subscription the output graph is released again and the
    /// transport error is returned.
    pub async fn start_listening(&self, channel: Arc<dyn Channel>) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        self.config.validate()?;

        let port = create_chunk_port(self.config.port_capacity);
        let processor = PlaybackProcessor::with_stats(port.clone(), self.stats.clone())
            .with_max_queued(self.config.max_queued_chunks)
            .with_prebuffer(self.config.prebuffer_chunks);
        let mut graph = self.backend.open_output(&self.config, processor)?;

        self.active.store(true, Ordering::SeqCst);
        let messages = channel.on_broadcast(AUDIO_CHUNK_EVENT);

        if channel.state() != ChannelState::Joined {
            if let Err(e) = channel.subscribe().await {
                self.active.store(false, Ordering::SeqCst);
                graph.disconnect();
                tracing::warn!("Subscribe to {} failed: {}", channel.topic(), e);
                return Err(e.into());
            }
        }

        let dispatcher = Dispatcher::new(
            port,
            self.active.clone(),
            self.stats.clone(),
            self.config.sample_rate,
        );
        let handle = tokio::spawn(dispatcher.run(messages));

        tracing::info!(
            "Listening on {} ({} Hz, queue bound {})",
            channel.topic(),
            self.config.sample_rate,
            self.config.max_queued_chunks
        );

        let mut running = self.running.lock();
        running.graph = Some(graph);
        running.channel = Some(channel);
        running.dispatcher = Some(handle);
        Ok(())
    }

    /// Stop playback and leave the channel. Idempotent.
    pub async fn stop_listening(&self) {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        let (graph, channel, dispatcher) = {
            let mut running = self.running.lock();
            (
                running.graph.take(),
                running.channel.take(),
                running.dispatcher.take(),
            )
        };

        if let Some(dispatcher) = dispatcher {
            dispatcher.abort();
        }
        if let Some(channel) = channel {
            if let Err(e) = channel.unsubscribe().await {
                tracing::warn!("Unsubscribe from {} failed: {}", channel.topic(), e);
            }
        }
        if let Some(mut graph) = graph {
            graph.disconnect();
        }

        if was_active {
            let stats = self.stats.snapshot();
            tracing::info!(
                "Listening stopped: {} received, {} played, {} lost, {} underruns",
                stats.chunks_received,
                stats.chunks_played,
                stats.lost,
                stats.underrun_blocks
            );
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn stats(&self) -> PlaybackStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for PlaybackService {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        let running = self.running.get_mut();
        if let Some(dispatcher) = running.dispatcher.take() {
            dispatcher.abort();
        }
        if let Some(mut graph) = running.graph.take() {
            graph.disconnect();
        }
    }
}

/// Verdict on one incoming sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arrival {
    Next,
    /// Ahead of the expected sequence; this many chunks never arrived
    Gap(u64),
    /// Duplicate or older than one already played
    Stale,
}

/// Tracks the next expected chunk sequence
#[derive(Debug, Default)]
struct SequenceTracker {
    expected: Option<u64>,
}

impl SequenceTracker {
    fn observe(&mut self, sequence: u64) -> Arrival {
        let arrival = match self.expected {
            None => Arrival::Next,
            Some(expected) if sequence == expected => Arrival::Next,
            Some(expected) if sequence > expected => Arrival::Gap(sequence - expected),
            Some(_) => return Arrival::Stale,
        };
        self.expected = Some(sequence + 1);
        arrival
    }
}

/// Main-thread side of the playback hand-off
struct Dispatcher {
    port: ChunkPort,
    active: Arc<AtomicBool>,
    stats: Arc<PlaybackStats>,
    sample_rate: u32,
    sequence: SequenceTracker,
    rate_warned: bool,
}

impl Dispatcher {
    fn new(port: ChunkPort, active: Arc<AtomicBool>, stats: Arc<PlaybackStats>, sample_rate: u32) -> Self {
        Self {
            port,
            active,
            stats,
            sample_rate,
            sequence: SequenceTracker::default(),
            rate_warned: false,
        }
    }

    async fn run(mut self, mut messages: UnboundedReceiver<BroadcastMessage>) {
        while let Some(message) = messages.recv().await {
            self.dispatch(&message);
        }
        tracing::debug!("Chunk stream closed");
    }

    fn dispatch(&mut self, message: &BroadcastMessage) {
        if !self.active.load(Ordering::SeqCst) {
            self.stats.record_dropped_inactive();
            tracing::debug!("Dropped chunk while inactive");
            return;
        }

        let payload = match AudioChunkPayload::decode(&message.payload) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.record_decode_error();
                tracing::warn!("Undecodable audio chunk: {}", e);
                return;
            }
        };

        if let Some(sequence) = payload.sequence {
            match self.sequence.observe(sequence) {
                Arrival::Next => {}
                Arrival::Gap(missing) => {
                    self.stats.record_lost(missing);
                    tracing::debug!("{} chunk(s) lost before {}", missing, sequence);
                }
                Arrival::Stale => {
                    self.stats.record_stale();
                    tracing::debug!("Stale chunk {} dropped", sequence);
                    return;
                }
            }
        }

        if let Some(rate) = payload.sample_rate {
            if rate != self.sample_rate && !self.rate_warned {
                self.rate_warned = true;
                tracing::warn!(
                    "Host sample rate {} Hz differs from playback rate {} Hz",
                    rate,
                    self.sample_rate
                );
            }
        }

        if self.port.post(payload.into_chunk()).is_some() {
            self.stats.record_overflow();
            tracing::warn!("Playback port full, oldest chunk dropped");
        }
        self.stats.record_received();
    }
}
