//! Capture-side chunk processor
//!
//! Runs inside the capture render callback. Accumulates channel 0 of each
//! input block and emits a chunk of exactly `chunk_size` samples every time
//! enough samples are buffered. Emission is a non-blocking `try_send` on a
//! bounded channel; a full or closed channel drops the chunk and counts it.

use crossbeam_channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::AudioChunk;

/// Counters shared between the capture render thread and the main thread
#[derive(Debug, Default)]
pub struct CaptureStats {
    chunks_emitted: AtomicU64,
    chunks_dropped: AtomicU64,
    chunks_published: AtomicU64,
    send_errors: AtomicU64,
}

impl CaptureStats {
    pub(crate) fn record_published(&self) {
        self.chunks_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            chunks_published: self.chunks_published.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Capture statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStatsSnapshot {
    /// Complete chunks cut by the processor
    pub chunks_emitted: u64,
    /// Chunks lost because the hand-off channel was full or closed
    pub chunks_dropped: u64,
    /// Chunks handed to the transport
    pub chunks_published: u64,
    /// Transport send failures
    pub send_errors: u64,
}

/// Accumulates render blocks into fixed-size chunks
pub struct CaptureProcessor {
    chunk_size: usize,
    buffer: Vec<f32>,
    outlet: Sender<AudioChunk>,
    stats: Arc<CaptureStats>,
}

impl CaptureProcessor {
    pub fn new(chunk_size: usize, outlet: Sender<AudioChunk>) -> Self {
        Self::with_stats(chunk_size, outlet, Arc::new(CaptureStats::default()))
    }

    pub fn with_stats(chunk_size: usize, outlet: Sender<AudioChunk>, stats: Arc<CaptureStats>) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            chunk_size,
            buffer: Vec::with_capacity(chunk_size * 2),
            outlet,
            stats,
        }
    }

    /// Render callback with planar input channels
    ///
    /// Only channel 0 is read. Zero channels leave the buffer untouched.
    /// Always returns `true` (keep running).
    pub fn process(&mut self, inputs: &[&[f32]]) -> bool {
        if let Some(channel) = inputs.first() {
            self.buffer.extend_from_slice(channel);
            self.flush_complete();
        }
        true
    }

    /// Render callback with interleaved input
    pub fn process_interleaved(&mut self, data: &[f32], channels: usize) -> bool {
        match channels {
            0 => {}
            1 => {
                self.buffer.extend_from_slice(data);
                self.flush_complete();
            }
            n => {
                self.buffer.extend(data.iter().step_by(n).copied());
                self.flush_complete();
            }
        }
        true
    }

    /// Samples waiting for the next chunk
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        self.stats.clone()
    }

    fn flush_complete(&mut self) {
        while self.buffer.len() >= self.chunk_size {
            // The accumulation buffer keeps its allocation across chunks.
            let mut head = Vec::with_capacity(self.chunk_size);
            head.extend(self.buffer.drain(..self.chunk_size));
            self.emit(AudioChunk::new(head));
        }
    }

    fn emit(&mut self, chunk: AudioChunk) {
        self.stats.chunks_emitted.fetch_add(1, Ordering::Relaxed);
        match self.outlet.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};
    use proptest::prelude::*;

    #[test]
    fn test_emits_exact_chunks() {
        let (tx, rx) = unbounded();
        let mut processor = CaptureProcessor::new(4096, tx);

        for i in 0..32 {
            let block = vec![i as f32; 128];
            assert!(processor.process(&[&block]));
        }

        let chunk = rx.try_recv().unwrap();
        assert_eq!(chunk.len(), 4096);
        assert_eq!(chunk[0], 0.0);
        assert_eq!(chunk[4095], 31.0);
        assert!(rx.try_recv().is_err());
        assert_eq!(processor.buffered(), 0);
    }

    #[test]
    fn test_no_chunk_before_full() {
        let (tx, rx) = unbounded();
        let mut processor = CaptureProcessor::new(4096, tx);

        for _ in 0..31 {
            processor.process(&[&[0.25; 128][..]]);
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(processor.buffered(), 31 * 128);
    }

    #[test]
    fn test_remainder_carries_over_in_order() {
        let (tx, rx) = unbounded();
        let mut processor = CaptureProcessor::new(10, tx);

        let block: Vec<f32> = (0..25).map(|i| i as f32).collect();
        processor.process(&[&block]);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.samples(), &(0..10).map(|i| i as f32).collect::<Vec<_>>()[..]);
        assert_eq!(second[0], 10.0);
        assert_eq!(processor.buffered(), 5);

        processor.process(&[&[99.0; 5][..]]);
        let third = rx.try_recv().unwrap();
        assert_eq!(third[0], 20.0);
        assert_eq!(third[9], 99.0);
    }

    #[test]
    fn test_buffer_capacity_is_stable() {
        let (tx, rx) = unbounded();
        let mut processor = CaptureProcessor::new(256, tx);
        let capacity = processor.buffer.capacity();

        for i in 0..100 {
            processor.process(&[&vec![i as f32; 100][..]]);
            assert_eq!(processor.buffer.capacity(), capacity);
        }

        let chunks: Vec<AudioChunk> = rx.try_iter().collect();
        assert_eq!(chunks.len(), 100 * 100 / 256);
        assert!(chunks.iter().all(|c| c.len() == 256));
        assert_eq!(chunks[1][0], 2.0);
    }

    #[test]
    fn test_zero_channels_is_noop() {
        let (tx, rx) = unbounded();
        let mut processor = CaptureProcessor::new(16, tx);
        processor.process(&[&[1.0; 10][..]]);

        assert!(processor.process(&[]));
        assert!(processor.process_interleaved(&[1.0; 64], 0));
        assert_eq!(processor.buffered(), 10);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_only_channel_zero_is_read() {
        let (tx, rx) = unbounded();
        let mut processor = CaptureProcessor::new(4, tx);

        processor.process(&[&[1.0, 2.0, 3.0, 4.0][..], &[9.0, 9.0, 9.0, 9.0][..]]);
        assert_eq!(rx.try_recv().unwrap().samples(), &[1.0, 2.0, 3.0, 4.0]);

        processor.process_interleaved(&[5.0, -5.0, 6.0, -6.0, 7.0, -7.0, 8.0, -8.0], 2);
        assert_eq!(rx.try_recv().unwrap().samples(), &[5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_full_outlet_drops_without_blocking() {
        let (tx, rx) = bounded(1);
        let mut processor = CaptureProcessor::new(4, tx);

        processor.process(&[&[0.0; 12][..]]);
        let stats = processor.stats().snapshot();
        assert_eq!(stats.chunks_emitted, 3);
        assert_eq!(stats.chunks_dropped, 2);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_closed_outlet_keeps_running() {
        let (tx, rx) = bounded(4);
        drop(rx);
        let mut processor = CaptureProcessor::new(4, tx);
        assert!(processor.process(&[&[0.0; 8][..]]));
        assert_eq!(processor.stats().snapshot().chunks_dropped, 2);
    }

    proptest! {
        #[test]
        fn prop_chunking_exactness(
            callbacks in 0usize..200,
            block in 1usize..512,
            chunk_size in 1usize..5000,
        ) {
            let (tx, rx) = unbounded();
            let mut processor = CaptureProcessor::new(chunk_size, tx);
            let data = vec![0.5f32; block];

            for _ in 0..callbacks {
                processor.process(&[&data]);
            }

            let total = callbacks * block;
            let chunks: Vec<AudioChunk> = rx.try_iter().collect();
            prop_assert_eq!(chunks.len(), total / chunk_size);
            prop_assert!(chunks.iter().all(|c| c.len() == chunk_size));
            prop_assert_eq!(processor.buffered(), total % chunk_size);
        }
    }
}
