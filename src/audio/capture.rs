//! Capture bridge: audio device → ring buffer
//!
//! Runs on its own thread. Each iteration blocks on the device for one
//! period and pushes every captured byte into the ring buffer, so a slow
//! network side slows the device reads down instead of losing data here.

use crate::audio::device::CaptureDevice;
use crate::debug_log;
use crate::error::{AudioError, Result};
use crate::logging::DebugCategory;
use crate::pipeline::PipelineJob;

/// Move captured periods into the ring buffer until cancelled or the device fails
pub fn run_capture_bridge<D: CaptureDevice>(job: PipelineJob, mut device: D) -> Result<()> {
    let frames = job.transfer_frames();
    let mut buf = vec![0u8; job.transfer_bytes];

    tracing::info!(
        "Capture bridge started: {} frames ({} bytes) per period",
        frames,
        job.transfer_bytes
    );

    while job.is_running() {
        let n = device.capture(&mut buf, frames)?;
        if n == 0 {
            continue;
        }
        debug_log!(job.log, DebugCategory::Device, "captured {} bytes", n);

        match job.ring.write_all(&buf[..n]) {
            Ok(()) => job.stats.record(n),
            Err(AudioError::BufferClosed) => break,
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!("Capture bridge stopped");
    Ok(())
}
