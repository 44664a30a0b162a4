//! Error types for the PCM relay

use thiserror::Error;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bridge thread panicked: {0}")]
    ThreadPanicked(&'static str),

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

    #[error("Invalid ring buffer capacity: {0} (need at least 2 bytes)")]
    InvalidCapacity(usize),

    #[error("Failed to allocate {0} bytes of ring buffer storage")]
    AllocationFailed(usize),

    #[error("Ring buffer closed")]
    BufferClosed,

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Could not resolve peer address: {0}")]
    ResolveFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),
}

/// Result type alias for the relay
pub type Result<T> = std::result::Result<T, Error>;
