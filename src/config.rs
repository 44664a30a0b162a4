//! Application configuration
//!
//! Loaded from TOML. Missing files fall back to built-in defaults so both
//! binaries run out of the box on a loopback setup.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::AudioFormat;
use crate::constants::*;
use crate::error::{Error, Result};
use crate::logging::{DebugCategory, DebugLog};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "PCM_RELAY_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

/// Audio device and buffering settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Device name, or "default" for the host default
    pub device: String,
    pub channels: u16,
    pub sample_rate: u32,
    /// Period length in microseconds; one period is the per-call transfer unit
    pub period_us: u64,
    /// Ring buffer duration in microseconds
    pub buffer_us: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            channels: DEFAULT_CHANNELS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            period_us: DEFAULT_PERIOD_US,
            buffer_us: DEFAULT_BUFFER_US,
        }
    }
}

impl AudioConfig {
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.channels, self.sample_rate)
    }

    pub fn period_frames(&self) -> usize {
        self.format().frames_for(self.period_us)
    }

    /// One period in bytes; also the maximum datagram payload
    pub fn period_bytes(&self) -> usize {
        self.format().bytes_for(self.period_us)
    }

    /// Ring buffer allocation: the buffering duration plus the reserved slot
    pub fn ring_capacity(&self) -> usize {
        self.format().bytes_for(self.buffer_us).saturating_add(1)
    }
}

/// UDP settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Receiver address the sender transmits to ("host:port")
    pub peer: String,
    /// Port the receiver binds to
    pub bind_port: u16,
    /// Optional SO_RCVBUF override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_buffer_bytes: Option<usize>,
    /// Socket read timeout, bounds how long cancellation can go unnoticed
    pub poll_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            peer: format!("127.0.0.1:{}", DEFAULT_UDP_PORT),
            bind_port: DEFAULT_UDP_PORT,
            recv_buffer_bytes: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing-subscriber filter used when RUST_LOG is unset
    pub filter: String,
    pub debug_categories: Vec<DebugCategory>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            debug_categories: Vec::new(),
        }
    }
}

impl LoggingConfig {
    pub fn debug_log(&self) -> DebugLog {
        DebugLog::from_categories(&self.debug_categories)
    }
}

impl AppConfig {
    /// Load configuration, in order: `PCM_RELAY_CONFIG`, the platform config
    /// file, built-in defaults.
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::load_from(Path::new(&path));
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Platform config file location, e.g. `~/.config/pcm-relay/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "pcm-relay").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.channels == 0 {
            return Err(Error::Config("channels must be at least 1".into()));
        }
        if audio.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".into()));
        }
        if audio.buffer_us > MAX_BUFFER_US {
            return Err(Error::Config(format!(
                "buffer_us = {} exceeds the maximum of {}",
                audio.buffer_us, MAX_BUFFER_US
            )));
        }
        if audio.period_frames() == 0 {
            return Err(Error::Config(format!(
                "period_us = {} is shorter than one frame",
                audio.period_us
            )));
        }
        if audio.buffer_us < audio.period_us {
            return Err(Error::Config(format!(
                "buffer_us ({}) must cover at least one period ({})",
                audio.buffer_us, audio.period_us
            )));
        }
        if audio.period_bytes() > MAX_DATAGRAM_SIZE {
            return Err(Error::Config(format!(
                "period of {} bytes does not fit in one datagram (max {})",
                audio.period_bytes(),
                MAX_DATAGRAM_SIZE
            )));
        }
        if self.network.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }
}
