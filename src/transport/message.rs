//! Audio chunk payload codec
//!
//! The JSON form is `{ "audioData": [...], "sequence": n, "sampleRate": r }`;
//! `sequence` and `sampleRate` may be absent or null. The binary form is the same
//! structure as a bincode frame. Both keep f32 samples bit-exact.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::audio::buffer::AudioChunk;
use crate::config::PayloadEncoding;
use crate::constants::AUDIO_CHUNK_EVENT;
use crate::error::TransportError;
use crate::transport::channel::{BroadcastMessage, Payload};

/// Wire form of one audio chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunkPayload {
    #[serde(default)]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    pub audio_data: Vec<f32>,
}

impl AudioChunkPayload {
    pub fn new(sequence: u64, sample_rate: u32, chunk: AudioChunk) -> Self {
        Self {
            sequence: Some(sequence),
            sample_rate: Some(sample_rate),
            audio_data: chunk.into_samples(),
        }
    }

    pub fn encode(&self, encoding: PayloadEncoding) -> Result<Payload, TransportError> {
        match encoding {
            PayloadEncoding::Binary => bincode::serialize(self)
                .map(|bytes| Payload::Binary(Bytes::from(bytes)))
                .map_err(|e| TransportError::Encode(e.to_string())),
            PayloadEncoding::Json => serde_json::to_value(self)
                .map(Payload::Json)
                .map_err(|e| TransportError::Encode(e.to_string())),
        }
    }

    pub fn decode(payload: &Payload) -> Result<Self, TransportError> {
        match payload {
            Payload::Binary(bytes) => bincode::deserialize(bytes)
                .map_err(|e| TransportError::InvalidPayload(e.to_string())),
            Payload::Json(value) => Self::deserialize(value)
                .map_err(|e| TransportError::InvalidPayload(e.to_string())),
        }
    }

    /// Wrap as an `audio_chunk` broadcast
    pub fn into_message(self, encoding: PayloadEncoding) -> Result<BroadcastMessage, TransportError> {
        let payload = self.encode(encoding)?;
        Ok(BroadcastMessage::new(AUDIO_CHUNK_EVENT, payload))
    }

    pub fn into_chunk(self) -> AudioChunk {
        AudioChunk::new(self.audio_data)
    }
}
