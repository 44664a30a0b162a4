//! Playback bridge: ring buffer → audio device
//!
//! Reads at most one period per iteration. Reads may end mid-frame because
//! the ring buffer is a plain byte stream; the partial frame is held back
//! and completed by the next read so samples stay aligned. Frames the device
//! did not accept are held the same way and offered again before anything
//! new is read.

use crate::audio::device::PlaybackDevice;
use crate::debug_log;
use crate::error::{AudioError, Result};
use crate::logging::DebugCategory;
use crate::pipeline::PipelineJob;

/// Drain the ring buffer into the device until cancelled or the device fails
pub fn run_playback_bridge<D: PlaybackDevice>(job: PipelineJob, mut device: D) -> Result<()> {
    let frame_bytes = job.format.frame_bytes();
    let mut buf = vec![0u8; job.transfer_bytes];
    // Unplayed bytes waiting at the front of `buf`
    let mut held = 0;

    tracing::info!(
        "Playback bridge started: up to {} frames per period",
        job.transfer_frames()
    );

    while job.is_running() {
        let n = if held >= frame_bytes {
            // The device still owes us whole frames
            0
        } else {
            match job.ring.read(&mut buf[held..]) {
                Ok(n) => n,
                Err(AudioError::BufferClosed) => break,
                Err(e) => return Err(e.into()),
            }
        };

        let available = held + n;
        let frames = available / frame_bytes;
        let whole = frames * frame_bytes;

        let mut played = 0;
        if frames > 0 {
            played = device.playback(&buf[..whole], frames)?.min(whole) / frame_bytes * frame_bytes;
            if played > 0 {
                debug_log!(job.log, DebugCategory::Device, "played {} of {} bytes", played, whole);
                job.stats.record(played);
            }
        }

        buf.copy_within(played..available, 0);
        held = available - played;
    }

    if held > 0 {
        tracing::debug!("Dropping {} unplayed bytes", held);
    }
    tracing::info!("Playback bridge stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_shared_buffer;
    use crate::audio::synthetic::CollectingSink;
    use crate::audio::AudioFormat;
    use crate::logging::DebugLog;
    use crate::pipeline::BridgeStats;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::audio::device::PlaybackDevice;
    use crate::error::AudioError;

    /// Accepts nothing on every other call and a single frame otherwise
    struct SluggishDevice {
        format: AudioFormat,
        calls: usize,
        played: Arc<parking_lot::Mutex<Vec<u8>>>,
    }

    impl PlaybackDevice for SluggishDevice {
        fn format(&self) -> AudioFormat {
            self.format
        }

        fn playback(&mut self, buf: &[u8], _frames: usize) -> std::result::Result<usize, AudioError> {
            self.calls += 1;
            if self.calls % 2 == 1 {
                return Ok(0);
            }
            let frame = self.format.frame_bytes();
            self.played.lock().extend_from_slice(&buf[..frame]);
            Ok(frame)
        }
    }

    fn job(format: AudioFormat, transfer_bytes: usize) -> PipelineJob {
        PipelineJob {
            ring: create_shared_buffer(64, DebugLog::disabled()).unwrap(),
            format,
            transfer_bytes,
            running: Arc::new(AtomicBool::new(true)),
            stats: Arc::new(BridgeStats::default()),
            log: DebugLog::disabled(),
        }
    }

    #[test]
    fn test_unaccepted_frames_are_offered_again() {
        let format = AudioFormat::new(2, 8000);
        let job = job(format, 12);
        let ring = job.ring.clone();
        let stats = job.stats.clone();

        let played = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let device = SluggishDevice {
            format,
            calls: 0,
            played: played.clone(),
        };
        let bridge = thread::spawn(move || run_playback_bridge(job, device));

        let data: Vec<u8> = (0..40).collect();
        ring.write_all(&data).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while played.lock().len() < data.len() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        ring.close();
        bridge.join().unwrap().unwrap();
        assert_eq!(*played.lock(), data);
        assert_eq!(stats.bytes(), 40);
        assert_eq!(stats.transfers(), 10);
    }

    #[test]
    fn test_odd_reads_keep_frames_aligned() {
        // Stereo: four bytes per frame
        let format = AudioFormat::new(2, 8000);
        let job = job(format, 8);
        let ring = job.ring.clone();

        let sink = CollectingSink::new(format, Duration::ZERO);
        let collected = sink.collected();
        let bridge = thread::spawn(move || run_playback_bridge(job, sink));

        let data: Vec<u8> = (0..24).collect();
        // Writes deliberately split frames
        for chunk in [&data[..3], &data[3..10], &data[10..11], &data[11..24]] {
            ring.write_all(chunk).unwrap();
            thread::sleep(Duration::from_millis(10));
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while collected.lock().len() < data.len() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        ring.close();
        bridge.join().unwrap().unwrap();
        assert_eq!(*collected.lock(), data);
    }
}
