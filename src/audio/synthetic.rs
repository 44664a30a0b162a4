//! Synthetic audio devices
//!
//! A paced, deterministic byte source and a collecting sink. They implement
//! the same blocking device traits as the cpal handles, so whole pipelines
//! can run without audio hardware.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::device::{CaptureDevice, PlaybackDevice};
use crate::audio::AudioFormat;
use crate::error::AudioError;

/// Sleep per call once a limited source is exhausted
const IDLE_PACE: Duration = Duration::from_millis(1);

/// Byte at position `index` of the pattern stream
pub fn pattern_byte(index: usize) -> u8 {
    // 251 is prime, so the pattern never lines up with power-of-two capacities
    (index % 251) as u8
}

/// The first `len` bytes of the pattern stream
pub fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(pattern_byte).collect()
}

/// Capture device yielding the pattern stream at a fixed pace
pub struct PatternSource {
    format: AudioFormat,
    pace: Duration,
    produced: usize,
    limit: Option<usize>,
}

impl PatternSource {
    /// `pace` is slept once per capture call
    pub fn new(format: AudioFormat, pace: Duration) -> Self {
        Self {
            format,
            pace,
            produced: 0,
            limit: None,
        }
    }

    /// Stop producing after `bytes` bytes; later calls idle and return 0
    pub fn with_limit(mut self, bytes: usize) -> Self {
        self.limit = Some(bytes);
        self
    }

    pub fn produced(&self) -> usize {
        self.produced
    }
}

impl CaptureDevice for PatternSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn capture(&mut self, buf: &mut [u8], frames: usize) -> Result<usize, AudioError> {
        let exhausted = self
            .limit
            .is_some_and(|limit| limit - self.produced < self.format.frame_bytes());
        if exhausted {
            thread::sleep(self.pace.max(IDLE_PACE));
            return Ok(0);
        }
        thread::sleep(self.pace);

        let mut n = self.format.frames_to_bytes(frames).min(buf.len());
        if let Some(limit) = self.limit {
            n = n.min(limit - self.produced);
        }
        n = self.format.frames_to_bytes(self.format.bytes_to_frames(n));

        for (offset, byte) in buf[..n].iter_mut().enumerate() {
            *byte = pattern_byte(self.produced + offset);
        }
        self.produced += n;
        Ok(n)
    }
}

/// Playback device that records everything it is asked to play
pub struct CollectingSink {
    format: AudioFormat,
    pace: Duration,
    collected: Arc<Mutex<Vec<u8>>>,
}

impl CollectingSink {
    /// `pace` is slept once per playback call
    pub fn new(format: AudioFormat, pace: Duration) -> Self {
        Self {
            format,
            pace,
            collected: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared view of the played bytes, usable after the sink moves into a thread
    pub fn collected(&self) -> Arc<Mutex<Vec<u8>>> {
        self.collected.clone()
    }
}

impl PlaybackDevice for CollectingSink {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn playback(&mut self, buf: &[u8], frames: usize) -> Result<usize, AudioError> {
        thread::sleep(self.pace);

        let n = self.format.frames_to_bytes(frames).min(buf.len());
        self.collected.lock().extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_respects_limit_and_frames() {
        let format = AudioFormat::new(2, 8000);
        let mut source = PatternSource::new(format, Duration::ZERO).with_limit(10);
        let mut buf = [0u8; 64];

        assert_eq!(source.capture(&mut buf, 2).unwrap(), 8);
        assert_eq!(&buf[..8], &pattern_bytes(8)[..]);

        // Two bytes left, less than one 4-byte frame
        assert_eq!(source.capture(&mut buf, 2).unwrap(), 0);
        assert_eq!(source.produced(), 8);
    }

    #[test]
    fn test_sink_collects_in_order() {
        let format = AudioFormat::default();
        let mut sink = CollectingSink::new(format, Duration::ZERO);
        let collected = sink.collected();

        assert_eq!(sink.playback(&[1, 2, 3, 4], 2).unwrap(), 4);
        assert_eq!(sink.playback(&[5, 6], 1).unwrap(), 2);
        assert_eq!(*collected.lock(), vec![1, 2, 3, 4, 5, 6]);
    }
}
