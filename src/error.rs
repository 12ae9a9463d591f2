//! Error types for the broadcast pipeline

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Microphone access was denied or no capture device exists
    #[error("Permission error: {0}")]
    Permission(String),

    /// An operation was requested before its prerequisite setup step
    #[error("Not initialized: {0}")]
    NotInitialized(&'static str),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Pub/sub channel errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Channel not subscribed: {0}")]
    NotSubscribed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Channel closed")]
    Closed,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Payload encoding failed: {0}")]
    Encode(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
