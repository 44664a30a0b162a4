//! # PCM Relay
//!
//! Raw PCM audio streaming between two hosts over UDP.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── SENDER ────────────────────────────┐
//! │                                                                 │
//! │  ┌──────────┐   capture    ┌────────────┐   send     ┌────────┐ │
//! │  │  Audio   │ ───bridge──▶ │ RingBuffer │ ──bridge─▶ │  UDP   │ │
//! │  │  Device  │   (thread)   │  (bytes)   │  (thread)  │ socket │ │
//! │  └──────────┘              └────────────┘            └───┬────┘ │
//! └──────────────────────────────────────────────────────────┼──────┘
//!                                                            │ raw PCM
//!                                                            │ datagrams
//! ┌─────────────────────────── RECEIVER ─────────────────────┼──────┐
//! │  ┌──────────┐   playback   ┌────────────┐   receive  ┌───▼────┐ │
//! │  │  Audio   │ ◀──bridge─── │ RingBuffer │ ◀─bridge── │  UDP   │ │
//! │  │  Device  │   (thread)   │  (bytes)   │  (thread)  │ socket │ │
//! │  └──────────┘              └────────────┘            └────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The ring buffer absorbs the drift between the device clock and network
//! timing. A full buffer blocks its producer and an empty buffer blocks its
//! consumer, so pace mismatches turn into backpressure instead of lost or
//! corrupted bytes at the buffer boundary.

pub mod audio;
pub mod config;
pub mod error;
pub mod logging;
pub mod network;
pub mod pipeline;
pub mod supervisor;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Signed 16-bit little-endian samples
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Default period length in microseconds
    pub const DEFAULT_PERIOD_US: u64 = 10_000;

    /// Default ring buffer duration in microseconds
    pub const DEFAULT_BUFFER_US: u64 = 250_000;

    /// Longest accepted ring buffer duration in microseconds
    pub const MAX_BUFFER_US: u64 = 10_000_000;

    /// Device name that selects the host default device
    pub const DEFAULT_DEVICE: &str = "default";

    /// Default UDP port for audio streaming
    pub const DEFAULT_UDP_PORT: u16 = 4320;

    /// Default socket read timeout in milliseconds
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

    /// Largest UDP payload over IPv4
    pub const MAX_DATAGRAM_SIZE: usize = 65_507;

    /// Largest payload that avoids IP fragmentation on Ethernet
    pub const LAN_MTU_PAYLOAD: usize = 1472;

    /// Chunks queued between a cpal callback and the blocking device call
    pub const DEVICE_QUEUE_CHUNKS: usize = 32;
}
