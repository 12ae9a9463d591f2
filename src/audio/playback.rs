//! Playback-side chunk processor
//!
//! The dual of [`CaptureProcessor`](crate::audio::capture::CaptureProcessor):
//! drains chunks posted on its port into a local FIFO and reads them
//! sample by sample into every output block. An empty FIFO produces 0.0,
//! so each block is always filled completely.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::{AudioChunk, ChunkPort};

/// Counters shared between the playback render thread and the dispatcher
#[derive(Debug, Default)]
pub struct PlaybackStats {
    chunks_received: AtomicU64,
    chunks_played: AtomicU64,
    dropped_inactive: AtomicU64,
    stale: AtomicU64,
    lost: AtomicU64,
    overflow_dropped: AtomicU64,
    decode_errors: AtomicU64,
    underrun_blocks: AtomicU64,
}

impl PlaybackStats {
    pub(crate) fn record_received(&self) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_inactive(&self) {
        self.dropped_inactive.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lost(&self, count: u64) {
        self.lost.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow(&self) {
        self.overflow_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PlaybackStatsSnapshot {
        PlaybackStatsSnapshot {
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_played: self.chunks_played.load(Ordering::Relaxed),
            dropped_inactive: self.dropped_inactive.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            overflow_dropped: self.overflow_dropped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            underrun_blocks: self.underrun_blocks.load(Ordering::Relaxed),
        }
    }
}

/// Playback statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStatsSnapshot {
    /// Chunks forwarded to the render thread
    pub chunks_received: u64,
    /// Chunks read to the end
    pub chunks_played: u64,
    /// Messages discarded while the service was inactive
    pub dropped_inactive: u64,
    /// Duplicate or out-of-date sequence numbers
    pub stale: u64,
    /// Chunks missing from the sequence
    pub lost: u64,
    /// Chunks discarded to keep the queue bounded
    pub overflow_dropped: u64,
    /// Payloads that could not be decoded
    pub decode_errors: u64,
    /// Render blocks that needed silence padding
    pub underrun_blocks: u64,
}

/// Reassembles queued chunks into a continuous sample stream
pub struct PlaybackProcessor {
    port: ChunkPort,
    queue: VecDeque<AudioChunk>,
    current: Option<AudioChunk>,
    cursor: usize,
    /// 0 = unbounded
    max_queued: usize,
    prebuffer: usize,
    primed: bool,
    stats: Arc<PlaybackStats>,
}

impl PlaybackProcessor {
    pub fn new(port: ChunkPort) -> Self {
        Self::with_stats(port, Arc::new(PlaybackStats::default()))
    }

    pub fn with_stats(port: ChunkPort, stats: Arc<PlaybackStats>) -> Self {
        let capacity = port.capacity();
        Self {
            port,
            queue: VecDeque::with_capacity(capacity),
            current: None,
            cursor: 0,
            max_queued: 0,
            prebuffer: 0,
            primed: true,
            stats,
        }
    }

    /// Bound the FIFO; the oldest pending chunk is dropped on overflow
    pub fn with_max_queued(mut self, max_queued: usize) -> Self {
        self.max_queued = max_queued;
        if max_queued > self.queue.capacity() {
            self.queue.reserve(max_queued - self.queue.len());
        }
        self.prebuffer = self.prebuffer_limit(self.prebuffer);
        self
    }

    /// Hold the first sample back until this many chunks are queued
    ///
    /// Clamped to the queue bound, which is the most the FIFO can ever hold.
    pub fn with_prebuffer(mut self, chunks: usize) -> Self {
        self.prebuffer = self.prebuffer_limit(chunks);
        self.primed = self.prebuffer == 0;
        self
    }

    fn prebuffer_limit(&self, chunks: usize) -> usize {
        if self.max_queued > 0 {
            chunks.min(self.max_queued)
        } else {
            chunks
        }
    }

    /// Append a chunk to the FIFO
    pub fn enqueue(&mut self, chunk: AudioChunk) {
        if self.max_queued > 0 && self.queue.len() >= self.max_queued {
            self.queue.pop_front();
            self.stats.record_overflow();
        }
        self.queue.push_back(chunk);
    }

    /// Render callback for a mono output block
    ///
    /// Writes exactly `output.len()` samples. Always returns `true`.
    pub fn process(&mut self, output: &mut [f32]) -> bool {
        self.drain_port();

        if !self.primed {
            if self.queue.len() < self.prebuffer {
                output.fill(0.0);
                return true;
            }
            self.primed = true;
        }

        let mut written = 0;
        while written < output.len() {
            if let Some(chunk) = &self.current {
                let remaining = &chunk[self.cursor..];
                if !remaining.is_empty() {
                    let n = remaining.len().min(output.len() - written);
                    output[written..written + n].copy_from_slice(&remaining[..n]);
                    written += n;
                    self.cursor += n;
                    continue;
                }
                self.current = None;
                self.stats.chunks_played.fetch_add(1, Ordering::Relaxed);
            }

            match self.queue.pop_front() {
                Some(next) => {
                    self.current = Some(next);
                    self.cursor = 0;
                }
                None => {
                    output[written..].fill(0.0);
                    self.stats.underrun_blocks.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
        }
        true
    }

    /// Render callback for an interleaved output buffer
    ///
    /// Every channel of a frame receives the same sample.
    pub fn process_interleaved(&mut self, output: &mut [f32], channels: usize) -> bool {
        if channels <= 1 {
            return self.process(output);
        }

        let frames = output.len() / channels;
        let mut mono = [0.0f32; 256];
        let mut frame = 0;
        while frame < frames {
            let n = (frames - frame).min(mono.len());
            self.process(&mut mono[..n]);
            for (i, sample) in mono[..n].iter().enumerate() {
                let base = (frame + i) * channels;
                output[base..base + channels].fill(*sample);
            }
            frame += n;
        }
        output[frames * channels..].fill(0.0);
        true
    }

    /// Pending chunks, not counting the one being read
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> Arc<PlaybackStats> {
        self.stats.clone()
    }

    fn drain_port(&mut self) {
        while let Some(chunk) = self.port.take() {
            self.enqueue(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_chunk_port;
    use proptest::prelude::*;

    fn ramp(start: f32, len: usize) -> AudioChunk {
        AudioChunk::new((0..len).map(|i| start + i as f32).collect())
    }

    #[test]
    fn test_silence_when_empty() {
        let mut processor = PlaybackProcessor::new(create_chunk_port(4));
        let mut out = [1.0f32; 128];

        assert!(processor.process(&mut out));
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(processor.stats().snapshot().underrun_blocks, 1);
    }

    #[test]
    fn test_reads_chunks_in_order_across_blocks() {
        let port = create_chunk_port(4);
        let mut processor = PlaybackProcessor::new(port.clone());
        port.post(ramp(0.0, 100));
        port.post(ramp(100.0, 100));

        let mut out = vec![0.0f32; 128];
        processor.process(&mut out);
        let expected: Vec<f32> = (0..128).map(|i| i as f32).collect();
        assert_eq!(out, expected);

        processor.process(&mut out);
        assert_eq!(out[..72], (128..200).map(|i| i as f32).collect::<Vec<_>>()[..]);
        assert!(out[72..].iter().all(|&s| s == 0.0));
        assert_eq!(processor.stats().snapshot().chunks_played, 2);
    }

    #[test]
    fn test_resumes_at_start_of_next_chunk() {
        let port = create_chunk_port(4);
        let mut processor = PlaybackProcessor::new(port.clone());
        let mut out = [0.0f32; 64];

        processor.process(&mut out);
        processor.process(&mut out);

        port.post(ramp(7.0, 64));
        processor.process(&mut out);
        assert_eq!(out[0], 7.0);
        assert_eq!(out[63], 70.0);
    }

    #[test]
    fn test_direct_enqueue() {
        let mut processor = PlaybackProcessor::new(create_chunk_port(2));
        processor.enqueue(ramp(1.0, 2));
        processor.enqueue(ramp(3.0, 2));
        assert_eq!(processor.queued(), 2);

        let mut out = [0.0f32; 4];
        processor.process(&mut out);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_bounded_queue_drops_oldest_pending() {
        let mut processor = PlaybackProcessor::new(create_chunk_port(8)).with_max_queued(2);
        processor.enqueue(ramp(0.0, 1));
        processor.enqueue(ramp(10.0, 1));
        processor.enqueue(ramp(20.0, 1));

        assert_eq!(processor.queued(), 2);
        assert_eq!(processor.stats().snapshot().overflow_dropped, 1);

        let mut out = [0.0f32; 2];
        processor.process(&mut out);
        assert_eq!(out, [10.0, 20.0]);
    }

    #[test]
    fn test_prebuffer_holds_first_output() {
        let port = create_chunk_port(8);
        let mut processor = PlaybackProcessor::new(port.clone()).with_prebuffer(2);
        let mut out = [0.0f32; 4];

        port.post(ramp(1.0, 4));
        processor.process(&mut out);
        assert_eq!(out, [0.0; 4]);

        port.post(ramp(5.0, 4));
        processor.process(&mut out);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);

        // Later underruns recover immediately.
        processor.process(&mut out);
        processor.process(&mut out);
        assert_eq!(out, [0.0; 4]);
        port.post(ramp(9.0, 4));
        processor.process(&mut out);
        assert_eq!(out, [9.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_prebuffer_larger_than_queue_still_plays() {
        for mut processor in [
            PlaybackProcessor::new(create_chunk_port(8)).with_max_queued(2).with_prebuffer(3),
            PlaybackProcessor::new(create_chunk_port(8)).with_prebuffer(3).with_max_queued(2),
        ] {
            processor.enqueue(ramp(1.0, 2));
            processor.enqueue(ramp(3.0, 2));
            processor.enqueue(ramp(5.0, 2));

            let mut out = [0.0f32; 4];
            processor.process(&mut out);
            assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
        }
    }

    #[test]
    fn test_interleaved_duplicates_mono() {
        let port = create_chunk_port(4);
        let mut processor = PlaybackProcessor::new(port.clone());
        port.post(AudioChunk::new(vec![0.1, 0.2, 0.3]));

        let mut out = [9.0f32; 8];
        processor.process_interleaved(&mut out, 2);
        assert_eq!(out, [0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.0, 0.0]);
    }

    #[test]
    fn test_empty_chunk_is_skipped() {
        let mut processor = PlaybackProcessor::new(create_chunk_port(4));
        processor.enqueue(AudioChunk::new(Vec::new()));
        processor.enqueue(ramp(5.0, 2));

        let mut out = [0.0f32; 2];
        processor.process(&mut out);
        assert_eq!(out, [5.0, 6.0]);
    }

    proptest! {
        #[test]
        fn prop_fill_invariant_and_order(
            chunk_lens in proptest::collection::vec(0usize..300, 0..20),
            block in 1usize..512,
        ) {
            let port = create_chunk_port(32);
            let mut processor = PlaybackProcessor::new(port.clone());

            let mut expected = Vec::new();
            let mut next = 0.0f32;
            for len in &chunk_lens {
                let chunk = ramp(next, *len);
                expected.extend_from_slice(chunk.samples());
                next += *len as f32;
                port.post(chunk);
            }

            let total: usize = chunk_lens.iter().sum();
            let blocks = total / block + 2;
            let mut stream = Vec::new();
            for _ in 0..blocks {
                let mut out = vec![f32::NAN; block];
                prop_assert!(processor.process(&mut out));
                prop_assert!(out.iter().all(|s| !s.is_nan()));
                stream.extend_from_slice(&out);
            }

            prop_assert_eq!(&stream[..total], &expected[..]);
            prop_assert!(stream[total..].iter().all(|&s| s == 0.0));
        }
    }
}
