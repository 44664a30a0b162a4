//! PCM stream format and period/byte conversions

use crate::constants::{BYTES_PER_SAMPLE, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};

/// Interleaved signed 16-bit little-endian PCM format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bytes_per_sample: usize,
}

impl AudioFormat {
    pub fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            bytes_per_sample: BYTES_PER_SAMPLE,
        }
    }

    /// Bytes in one frame (one sample per channel)
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.bytes_per_sample
    }

    /// Frames covering `us` microseconds, rounded down. Saturates instead
    /// of overflowing on absurd durations.
    pub fn frames_for(&self, us: u64) -> usize {
        let frames = u64::from(self.sample_rate).saturating_mul(us) / 1_000_000;
        usize::try_from(frames).unwrap_or(usize::MAX)
    }

    /// Bytes covering `us` microseconds, always a whole number of frames
    pub fn bytes_for(&self, us: u64) -> usize {
        self.frames_for(us).saturating_mul(self.frame_bytes())
    }

    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.frame_bytes()
    }

    /// Whole frames contained in `bytes`; a trailing partial frame is ignored
    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / self.frame_bytes()
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_period_sizes() {
        let format = AudioFormat::default();
        assert_eq!(format.frame_bytes(), 2);
        // 10 ms at 44.1 kHz mono
        assert_eq!(format.frames_for(10_000), 441);
        assert_eq!(format.bytes_for(10_000), 882);
    }

    #[test]
    fn test_partial_frames_round_down() {
        let stereo = AudioFormat::new(2, 48_000);
        assert_eq!(stereo.frame_bytes(), 4);
        assert_eq!(stereo.bytes_to_frames(7), 1);
        assert_eq!(stereo.frames_to_bytes(3), 12);
    }

    #[test]
    fn test_huge_durations_saturate() {
        let format = AudioFormat::new(2, 192_000);
        assert_eq!(format.frames_for(u64::MAX), (u64::MAX / 1_000_000) as usize);
        assert_eq!(format.bytes_for(u64::MAX), format.frames_for(u64::MAX) * 4);
    }
}
