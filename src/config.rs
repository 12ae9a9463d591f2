//! Configuration for capture, playback and transport
//!
//! Every field has a default, so a partial (or missing) TOML file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioStreamConfig,
    pub playback: PlaybackConfig,
    pub transport: TransportConfig,
}

impl AppConfig {
    /// Default config file location (`<config_dir>/roomcast/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "roomcast")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::debug!("No config directory available, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;

        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write as TOML, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.playback.validate()
    }
}

/// Microphone capture constraints
///
/// Echo cancellation, noise suppression and auto-gain are requests to the
/// platform capture stack; they are not implemented by this crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioStreamConfig {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Samples per transported chunk
    pub chunk_size: usize,
    /// Capture device; `None` picks the default input
    pub device_id: Option<String>,
}

impl Default for AudioStreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channel_count: DEFAULT_CHANNELS,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            chunk_size: CHUNK_SIZE,
            device_id: None,
        }
    }
}

impl AudioStreamConfig {
    /// Raw capture with every platform processing step disabled
    pub fn raw() -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("sampleRate must be positive".into()));
        }
        if self.channel_count == 0 {
            return Err(Error::Config("channelCount must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunkSize must be positive".into()));
        }
        Ok(())
    }

    /// Duration of one chunk in milliseconds
    pub fn chunk_duration_ms(&self) -> f32 {
        self.chunk_size as f32 * 1000.0 / self.sample_rate as f32
    }
}

/// Listener-side output and jitter buffer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    /// Output channels; every channel receives the same mono signal
    pub channel_count: u16,
    /// Upper bound of pending chunks; 0 leaves the queue unbounded
    pub max_queued_chunks: usize,
    /// Capacity of the main thread → render thread port
    pub port_capacity: usize,
    /// Chunks to accumulate before the first sample is played
    pub prebuffer_chunks: usize,
    /// Output device; `None` picks the default output
    pub device_id: Option<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channel_count: DEFAULT_CHANNELS,
            max_queued_chunks: DEFAULT_MAX_QUEUED_CHUNKS,
            port_capacity: PLAYBACK_PORT_CAPACITY,
            prebuffer_chunks: 0,
            device_id: None,
        }
    }
}

impl PlaybackConfig {
    /// No queue bound
    pub fn unbounded() -> Self {
        Self {
            max_queued_chunks: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("playback sampleRate must be positive".into()));
        }
        if self.channel_count == 0 {
            return Err(Error::Config("playback channelCount must be at least 1".into()));
        }
        if self.port_capacity == 0 {
            return Err(Error::Config("portCapacity must be positive".into()));
        }
        // A bounded queue never holds more than max_queued_chunks, so a
        // larger prebuffer would never be reached.
        if self.max_queued_chunks != 0 && self.prebuffer_chunks > self.max_queued_chunks {
            return Err(Error::Config(format!(
                "prebufferChunks ({}) exceeds maxQueuedChunks ({})",
                self.prebuffer_chunks, self.max_queued_chunks
            )));
        }
        Ok(())
    }
}

/// How chunk payloads are put on the wire
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    /// bincode frame
    #[default]
    Binary,
    /// JSON object with an `audioData` number array
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub encoding: PayloadEncoding,
}
