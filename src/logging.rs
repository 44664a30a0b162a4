//! Category-gated debug output
//!
//! Each component receives a [`DebugLog`] at construction. The log carries an
//! immutable bitmask of enabled categories; disabled categories cost one
//! branch and produce nothing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Debug output categories, least significant bit first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugCategory {
    /// Ring buffer reads and writes
    SharedBuffer = 0,
    /// Lock waits and wake-ups
    Lock = 1,
    /// Audio device transfers
    Device = 2,
    /// Datagram traffic
    Network = 3,
}

impl DebugCategory {
    pub const ALL: [DebugCategory; 4] = [
        DebugCategory::SharedBuffer,
        DebugCategory::Lock,
        DebugCategory::Device,
        DebugCategory::Network,
    ];

    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Debug log handle with a fixed category mask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugLog {
    mask: u8,
}

impl DebugLog {
    pub fn new(mask: u8) -> Self {
        Self { mask }
    }

    /// Log with every category disabled
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_categories(categories: &[DebugCategory]) -> Self {
        let mask = categories.iter().fold(0u8, |mask, c| mask | c.bit());
        Self { mask }
    }

    pub fn mask(&self) -> u8 {
        self.mask
    }

    pub fn enabled(&self, category: DebugCategory) -> bool {
        self.mask & category.bit() != 0
    }

    /// Emit a debug event if `category` is enabled.
    ///
    /// Prefer the [`debug_log!`](crate::debug_log) macro, which skips
    /// formatting entirely for disabled categories.
    pub fn emit(&self, category: DebugCategory, args: fmt::Arguments<'_>) {
        if !self.enabled(category) {
            return;
        }

        match category {
            DebugCategory::SharedBuffer => {
                tracing::debug!(target: "pcm_relay::shared_buffer", "{}", args)
            }
            DebugCategory::Lock => tracing::debug!(target: "pcm_relay::lock", "{}", args),
            DebugCategory::Device => tracing::debug!(target: "pcm_relay::device", "{}", args),
            DebugCategory::Network => tracing::debug!(target: "pcm_relay::network", "{}", args),
        }
    }
}

/// Category-gated debug event: `debug_log!(log, DebugCategory::Network, "sent {} bytes", n)`
#[macro_export]
macro_rules! debug_log {
    ($log:expr, $category:expr, $($arg:tt)+) => {{
        let log: &$crate::logging::DebugLog = &$log;
        if log.enabled($category) {
            log.emit($category, format_args!($($arg)+));
        }
    }};
}
