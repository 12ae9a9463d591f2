//! Audio chunks and the lock-free port that hands them to a render thread
//!
//! A chunk's sample memory is moved, never copied, between the main thread
//! and a render thread. The port is a bounded single-producer
//! single-consumer queue; when it is full the oldest chunk is displaced so
//! the producer never blocks.

use crossbeam::queue::ArrayQueue;
use std::ops::Deref;
use std::sync::Arc;

/// A contiguous slice of the mono audio timeline
///
/// Identity is positional: chunks carry no sequence number of their own.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioChunk {
    samples: Vec<f32>,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Take back the backing memory
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<f32>> for AudioChunk {
    fn from(samples: Vec<f32>) -> Self {
        Self::new(samples)
    }
}

impl Deref for AudioChunk {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.samples
    }
}

/// Bounded lock-free chunk queue between the main thread and a render thread
pub struct ChunkRing {
    queue: ArrayQueue<AudioChunk>,
}

impl ChunkRing {
    /// Create a new ring with the specified capacity (in chunks)
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }

    /// Post a chunk, displacing the oldest one when full
    ///
    /// Returns the displaced chunk, if any.
    pub fn post(&self, chunk: AudioChunk) -> Option<AudioChunk> {
        self.queue.force_push(chunk)
    }

    /// Take the oldest chunk
    pub fn take(&self) -> Option<AudioChunk> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

/// Shared handle to a chunk ring
pub type ChunkPort = Arc<ChunkRing>;

/// Create a new chunk port
pub fn create_chunk_port(capacity: usize) -> ChunkPort {
    Arc::new(ChunkRing::new(capacity))
}
