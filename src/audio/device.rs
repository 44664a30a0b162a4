//! Audio device access
//!
//! The bridges talk to devices through the blocking [`CaptureDevice`] and
//! [`PlaybackDevice`] traits. The cpal-backed implementations keep the cpal
//! stream alive on a dedicated thread and move samples between the stream
//! callback and the blocking call through a bounded channel. Overruns and
//! underruns are absorbed here and never reach the bridges; any error the
//! stream itself reports is fatal and surfaces on the next blocking call.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig, SupportedBufferSize};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::AudioFormat;
use crate::config::AudioConfig;
use crate::constants::{DEFAULT_DEVICE, DEVICE_QUEUE_CHUNKS};
use crate::debug_log;
use crate::error::AudioError;
use crate::logging::{DebugCategory, DebugLog};

/// How long a blocking device call waits before handing control back
const DEVICE_POLL: Duration = Duration::from_millis(100);

/// Blocking source of interleaved S16LE frames
pub trait CaptureDevice: Send {
    fn format(&self) -> AudioFormat;

    /// Capture up to `frames` frames into `buf`, returning the byte count.
    ///
    /// Blocks until the frames are available. May return 0 when nothing
    /// arrived within the device's poll interval.
    fn capture(&mut self, buf: &mut [u8], frames: usize) -> Result<usize, AudioError>;
}

/// Blocking sink for interleaved S16LE frames
pub trait PlaybackDevice: Send {
    fn format(&self) -> AudioFormat;

    /// Render `frames` frames from `buf`, returning the byte count accepted.
    ///
    /// Blocks while the device is busy. May return fewer bytes than offered,
    /// or 0 when the device accepted nothing within its poll interval; the
    /// caller offers the rest again.
    fn playback(&mut self, buf: &[u8], frames: usize) -> Result<usize, AudioError>;
}

impl<D: CaptureDevice + ?Sized> CaptureDevice for Box<D> {
    fn format(&self) -> AudioFormat {
        (**self).format()
    }

    fn capture(&mut self, buf: &mut [u8], frames: usize) -> Result<usize, AudioError> {
        (**self).capture(buf, frames)
    }
}

impl<D: PlaybackDevice + ?Sized> PlaybackDevice for Box<D> {
    fn format(&self) -> AudioFormat {
        (**self).format()
    }

    fn playback(&mut self, buf: &[u8], frames: usize) -> Result<usize, AudioError> {
        (**self).playback(buf, frames)
    }
}

/// Description of an audio device
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device, true);
                devices.push(AudioDeviceInfo {
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);

                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                    continue;
                }

                let (sample_rates, channels) = get_device_capabilities(&device, false);
                devices.push(AudioDeviceInfo {
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

fn get_device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device.supported_input_configs().map(|c| c.collect()).unwrap_or_default()
    } else {
        device.supported_output_configs().map(|c| c.collect()).unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in configs {
        for rate_val in [44100u32, 48000, 88200, 96000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Find a device by name; "default" selects the host default
fn find_device(name: &str, is_input: bool) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    if name == DEFAULT_DEVICE {
        let device = if is_input {
            host.default_input_device()
        } else {
            host.default_output_device()
        };
        return device.ok_or_else(|| {
            AudioError::DeviceNotFound(format!(
                "no default {} device",
                if is_input { "input" } else { "output" }
            ))
        });
    }

    let devices = if is_input {
        host.input_devices()
    } else {
        host.output_devices()
    };
    let mut devices = devices.map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    devices
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
}

/// Stream config for the requested format, with a fixed period when the
/// device allows it
fn stream_config(
    supported: &cpal::SupportedStreamConfig,
    format: AudioFormat,
    period_frames: usize,
) -> StreamConfig {
    let buffer_size = match supported.buffer_size() {
        SupportedBufferSize::Range { min, max }
            if (*min as usize..=*max as usize).contains(&period_frames) =>
        {
            cpal::BufferSize::Fixed(period_frames as u32)
        }
        _ => cpal::BufferSize::Default,
    };

    StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size,
    }
}

fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn f32_to_le_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|s| ((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).to_le_bytes())
        .collect()
}

fn le_bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// First error reported by a stream's error callback
#[derive(Clone, Default)]
struct StreamFault(Arc<Mutex<Option<String>>>);

impl StreamFault {
    fn record(&self, reason: String) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(reason);
        }
    }

    fn check(&self) -> Result<(), AudioError> {
        match self.0.lock().as_ref() {
            Some(reason) => Err(AudioError::StreamError(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Run `build` on a dedicated thread and keep the resulting stream playing
/// until `running` is cleared. Setup errors are reported synchronously.
fn spawn_stream_keeper<F>(
    name: &str,
    running: Arc<AtomicBool>,
    build: F,
) -> Result<JoinHandle<()>, AudioError>
where
    F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
{
    let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build().and_then(|stream| {
                stream
                    .play()
                    .map(|_| stream)
                    .map_err(|e| AudioError::StreamError(e.to_string()))
            }) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            // Keep thread alive while running
            while running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(10));
            }

            // Stream is dropped here, stopping the device
            drop(stream);
        })
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(AudioError::StreamError("stream thread exited during setup".into()))
        }
    }
}

/// Capture handle on a cpal input device
pub struct CpalCapture {
    format: AudioFormat,
    chunks: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pending_pos: usize,
    overruns: Arc<AtomicU64>,
    overruns_reported: u64,
    fault: StreamFault,
    running: Arc<AtomicBool>,
    keeper: Option<JoinHandle<()>>,
    log: DebugLog,
}

/// Open the configured capture device
pub fn open_capture(config: &AudioConfig, log: DebugLog) -> Result<CpalCapture, AudioError> {
    let device = find_device(&config.device, true)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    let format = config.format();
    let stream_config = stream_config(&supported, format, config.period_frames());
    let sample_format = supported.sample_format();

    let (chunk_tx, chunk_rx) = bounded::<Vec<u8>>(DEVICE_QUEUE_CHUNKS);
    let overruns = Arc::new(AtomicU64::new(0));
    let fault = StreamFault::default();
    let running = Arc::new(AtomicBool::new(true));

    let build = {
        let overruns = overruns.clone();
        let fault = fault.clone();
        move || -> Result<cpal::Stream, AudioError> {
            let err_fn = move |err: cpal::StreamError| {
                tracing::error!("Capture stream error: {}", err);
                fault.record(err.to_string());
            };
            let push = move |bytes: Vec<u8>| {
                // Consumer fell behind: drop the chunk, the stream keeps going
                if chunk_tx.try_send(bytes).is_err() {
                    overruns.fetch_add(1, Ordering::Relaxed);
                }
            };

            let stream = match sample_format {
                SampleFormat::I16 => device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| push(i16_to_le_bytes(data)),
                    err_fn,
                    None,
                ),
                SampleFormat::F32 => device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| push(f32_to_le_bytes(data)),
                    err_fn,
                    None,
                ),
                other => {
                    return Err(AudioError::UnsupportedFormat(format!("{:?}", other)));
                }
            };
            stream.map_err(|e| AudioError::CpalError(e.to_string()))
        }
    };

    let keeper = spawn_stream_keeper("capture-stream", running.clone(), build)?;
    tracing::info!(
        "Capture setup successful: {} ({} Hz, {} ch, {:?})",
        device_name,
        format.sample_rate,
        format.channels,
        sample_format
    );

    Ok(CpalCapture {
        format,
        chunks: chunk_rx,
        pending: Vec::new(),
        pending_pos: 0,
        overruns,
        overruns_reported: 0,
        fault,
        running,
        keeper: Some(keeper),
        log,
    })
}

impl CpalCapture {
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    fn report_overruns(&mut self) {
        let overruns = self.overruns();
        if overruns > self.overruns_reported {
            tracing::warn!(
                "Capture overrun: {} chunks dropped, stream recovered",
                overruns - self.overruns_reported
            );
            self.overruns_reported = overruns;
        }
    }
}

impl CaptureDevice for CpalCapture {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn capture(&mut self, buf: &mut [u8], frames: usize) -> Result<usize, AudioError> {
        self.fault.check()?;
        let frame_bytes = self.format.frame_bytes();
        let want = self.format.frames_to_bytes(frames).min(buf.len() / frame_bytes * frame_bytes);
        let mut filled = 0;

        while filled < want {
            if self.pending_pos < self.pending.len() {
                let n = (want - filled).min(self.pending.len() - self.pending_pos);
                buf[filled..filled + n]
                    .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
                self.pending_pos += n;
                filled += n;
                continue;
            }

            match self.chunks.recv_timeout(DEVICE_POLL) {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pending_pos = 0;
                }
                // Only whole frames leave the device; the remainder waits for the next call
                Err(RecvTimeoutError::Timeout) => {
                    self.fault.check()?;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AudioError::StreamError("capture stream stopped".into()));
                }
            }
        }

        let whole = filled / frame_bytes * frame_bytes;
        if whole < filled {
            // Put the partial frame back in front of the pending data
            let mut rest = buf[whole..filled].to_vec();
            rest.extend_from_slice(&self.pending[self.pending_pos..]);
            self.pending = rest;
            self.pending_pos = 0;
        }

        self.report_overruns();
        debug_log!(self.log, DebugCategory::Device, "captured {} bytes", whole);
        Ok(whole)
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.keeper.take() {
            let _ = handle.join();
        }
    }
}

/// Playback handle on a cpal output device
pub struct CpalPlayback {
    format: AudioFormat,
    chunks: Sender<Vec<i16>>,
    underruns: Arc<AtomicU64>,
    underruns_reported: u64,
    fault: StreamFault,
    running: Arc<AtomicBool>,
    keeper: Option<JoinHandle<()>>,
    log: DebugLog,
}

/// Samples handed to the output callback, refilled from the channel
struct PlaybackFeed {
    chunks: Receiver<Vec<i16>>,
    current: Vec<i16>,
    pos: usize,
    primed: bool,
    underruns: Arc<AtomicU64>,
}

impl PlaybackFeed {
    fn next_sample(&mut self) -> Option<i16> {
        if self.pos >= self.current.len() {
            self.current = self.chunks.try_recv().ok()?;
            self.pos = 0;
            self.primed = true;
        }
        let sample = self.current.get(self.pos).copied();
        self.pos += 1;
        sample
    }

    /// Fill `out`, rendering silence once the feed runs dry
    fn fill<T: Copy>(&mut self, out: &mut [T], silence: T, convert: impl Fn(i16) -> T) {
        let mut starved = false;
        for slot in out.iter_mut() {
            *slot = match self.next_sample() {
                Some(sample) => convert(sample),
                None => {
                    starved = true;
                    silence
                }
            };
        }
        if starved && self.primed {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Open the configured playback device
pub fn open_playback(config: &AudioConfig, log: DebugLog) -> Result<CpalPlayback, AudioError> {
    let device = find_device(&config.device, false)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    let format = config.format();
    let stream_config = stream_config(&supported, format, config.period_frames());
    let sample_format = supported.sample_format();

    let (chunk_tx, chunk_rx) = bounded::<Vec<i16>>(DEVICE_QUEUE_CHUNKS);
    let underruns = Arc::new(AtomicU64::new(0));
    let fault = StreamFault::default();
    let running = Arc::new(AtomicBool::new(true));

    let build = {
        let mut feed = PlaybackFeed {
            chunks: chunk_rx,
            current: Vec::new(),
            pos: 0,
            primed: false,
            underruns: underruns.clone(),
        };
        let fault = fault.clone();
        move || -> Result<cpal::Stream, AudioError> {
            let err_fn = move |err: cpal::StreamError| {
                tracing::error!("Playback stream error: {}", err);
                fault.record(err.to_string());
            };

            let stream = match sample_format {
                SampleFormat::I16 => device.build_output_stream(
                    &stream_config,
                    move |out: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        feed.fill(out, 0, |s| s)
                    },
                    err_fn,
                    None,
                ),
                SampleFormat::F32 => device.build_output_stream(
                    &stream_config,
                    move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        feed.fill(out, 0.0, |s| s as f32 / 32768.0)
                    },
                    err_fn,
                    None,
                ),
                other => {
                    return Err(AudioError::UnsupportedFormat(format!("{:?}", other)));
                }
            };
            stream.map_err(|e| AudioError::CpalError(e.to_string()))
        }
    };

    let keeper = spawn_stream_keeper("playback-stream", running.clone(), build)?;
    tracing::info!(
        "Playback setup successful: {} ({} Hz, {} ch, {:?})",
        device_name,
        format.sample_rate,
        format.channels,
        sample_format
    );

    Ok(CpalPlayback {
        format,
        chunks: chunk_tx,
        underruns,
        underruns_reported: 0,
        fault,
        running,
        keeper: Some(keeper),
        log,
    })
}

impl CpalPlayback {
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    fn report_underruns(&mut self) {
        let underruns = self.underruns();
        if underruns > self.underruns_reported {
            tracing::warn!(
                "Playback underrun: {} callbacks padded with silence",
                underruns - self.underruns_reported
            );
            self.underruns_reported = underruns;
        }
    }
}

impl PlaybackDevice for CpalPlayback {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn playback(&mut self, buf: &[u8], frames: usize) -> Result<usize, AudioError> {
        self.fault.check()?;
        let bytes = self.format.frames_to_bytes(frames).min(buf.len());
        let bytes = self.format.frames_to_bytes(self.format.bytes_to_frames(bytes));
        if bytes == 0 {
            return Ok(0);
        }

        match self.chunks.send_timeout(le_bytes_to_i16(&buf[..bytes]), DEVICE_POLL) {
            Ok(()) => {}
            // Output is not draining; hand control back so the caller can
            // notice cancellation and offer these frames again
            Err(SendTimeoutError::Timeout(_)) => {
                self.fault.check()?;
                debug_log!(self.log, DebugCategory::Device, "playback queue full, nothing accepted");
                return Ok(0);
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                return Err(AudioError::StreamError("playback stream stopped".into()));
            }
        }

        self.report_underruns();
        debug_log!(self.log, DebugCategory::Device, "played {} bytes", bytes);
        Ok(bytes)
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.keeper.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    // Handles without a cpal stream behind them; the test owns the other
    // end of the channel
    fn detached_capture(chunks: Receiver<Vec<u8>>) -> CpalCapture {
        CpalCapture {
            format: AudioFormat::default(),
            chunks,
            pending: Vec::new(),
            pending_pos: 0,
            overruns: Arc::new(AtomicU64::new(0)),
            overruns_reported: 0,
            fault: StreamFault::default(),
            running: Arc::new(AtomicBool::new(true)),
            keeper: None,
            log: DebugLog::disabled(),
        }
    }

    fn detached_playback(chunks: Sender<Vec<i16>>) -> CpalPlayback {
        CpalPlayback {
            format: AudioFormat::default(),
            chunks,
            underruns: Arc::new(AtomicU64::new(0)),
            underruns_reported: 0,
            fault: StreamFault::default(),
            running: Arc::new(AtomicBool::new(true)),
            keeper: None,
            log: DebugLog::disabled(),
        }
    }

    #[test]
    fn test_stalled_output_returns_control() {
        let (tx, rx) = bounded(1);
        let mut playback = detached_playback(tx.clone());
        // The callback never drains, so the queue stays full
        tx.send(vec![0]).unwrap();

        let started = Instant::now();
        assert_eq!(playback.playback(&[1, 2, 3, 4], 2).unwrap(), 0);
        assert!(started.elapsed() < Duration::from_secs(2));

        // Once the callback catches up the same frames are accepted
        assert_eq!(rx.recv().unwrap(), vec![0]);
        assert_eq!(playback.playback(&[1, 2, 3, 4], 2).unwrap(), 4);
        assert_eq!(rx.recv().unwrap(), vec![0x0201, 0x0403]);
    }

    #[test]
    fn test_stream_error_fails_capture() {
        let (_tx, rx) = bounded(1);
        let mut capture = detached_capture(rx);
        let mut buf = [0u8; 8];

        // Nothing arrived: a quiet poll, not an error
        assert_eq!(capture.capture(&mut buf, 4).unwrap(), 0);

        capture.fault.record("device unplugged".into());
        assert!(matches!(
            capture.capture(&mut buf, 4),
            Err(AudioError::StreamError(reason)) if reason == "device unplugged"
        ));
    }

    #[test]
    fn test_stream_error_fails_playback() {
        let (tx, _rx) = bounded(1);
        let mut playback = detached_playback(tx);

        playback.fault.record("backend died".into());
        assert!(matches!(
            playback.playback(&[1, 2], 1),
            Err(AudioError::StreamError(_))
        ));
    }

    #[test]
    fn test_stream_fault_keeps_first_error() {
        let fault = StreamFault::default();
        assert!(fault.check().is_ok());

        fault.record("first".into());
        fault.record("second".into());
        assert!(matches!(fault.check(), Err(AudioError::StreamError(reason)) if reason == "first"));
    }

    #[test]
    fn test_sample_conversions() {
        assert_eq!(i16_to_le_bytes(&[1, -2]), vec![0x01, 0x00, 0xFE, 0xFF]);
        assert_eq!(le_bytes_to_i16(&[0x01, 0x00, 0xFE, 0xFF, 0x07]), vec![1, -2]);
        assert_eq!(f32_to_le_bytes(&[0.0, 2.0]), vec![0, 0, 0xFF, 0x7F]);
    }

    #[test]
    fn test_playback_feed_pads_with_silence() {
        let (tx, rx) = bounded(4);
        let underruns = Arc::new(AtomicU64::new(0));
        let mut feed = PlaybackFeed {
            chunks: rx,
            current: Vec::new(),
            pos: 0,
            primed: false,
            underruns: underruns.clone(),
        };

        // Silence before the first chunk is not an underrun
        let mut out = [9i16; 3];
        feed.fill(&mut out, 0, |s| s);
        assert_eq!(out, [0, 0, 0]);
        assert_eq!(underruns.load(Ordering::Relaxed), 0);

        tx.send(vec![1, 2]).unwrap();
        tx.send(vec![3]).unwrap();
        let mut out = [9i16; 5];
        feed.fill(&mut out, 0, |s| s);
        assert_eq!(out, [1, 2, 3, 0, 0]);
        assert_eq!(underruns.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_device_listing_does_not_panic() {
        // May be empty on CI machines without audio hardware
        let devices = list_devices();
        for device in &devices {
            assert!(device.is_input || device.is_output);
        }
    }
}
