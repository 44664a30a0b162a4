//! Pipeline composition
//!
//! Each process owns one ring buffer with a device bridge on one end and a
//! network bridge on the other:
//!
//! ```text
//! sender:    capture-bridge ──▶ RingBuffer ──▶ send-bridge
//! receiver:  receive-bridge ──▶ RingBuffer ──▶ playback-bridge
//! ```
//!
//! [`Pipeline::wait`] blocks until the first bridge exits, then stops and
//! joins the other one.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{RingSnapshot, SharedRingBuffer};
use crate::audio::capture::run_capture_bridge;
use crate::audio::device::{CaptureDevice, PlaybackDevice};
use crate::audio::playback::run_playback_bridge;
use crate::audio::{AudioFormat, RingBuffer};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::logging::DebugLog;
use crate::network::receiver::run_receive_bridge;
use crate::network::sender::run_send_bridge;

/// Which end of the ring buffer a bridge thread serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeRole {
    Capture,
    Playback,
    Send,
    Receive,
}

impl BridgeRole {
    pub fn thread_name(self) -> &'static str {
        match self {
            BridgeRole::Capture => "capture-bridge",
            BridgeRole::Playback => "playback-bridge",
            BridgeRole::Send => "send-bridge",
            BridgeRole::Receive => "receive-bridge",
        }
    }
}

/// Transfer counters for one bridge
#[derive(Debug, Default)]
pub struct BridgeStats {
    transfers: AtomicU64,
    bytes: AtomicU64,
}

impl BridgeStats {
    pub fn record(&self, bytes: usize) {
        self.transfers.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn transfers(&self) -> u64 {
        self.transfers.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Immutable per-bridge configuration
#[derive(Clone)]
pub struct PipelineJob {
    pub ring: SharedRingBuffer,
    pub format: AudioFormat,
    /// Bytes moved per call, one audio period
    pub transfer_bytes: usize,
    pub running: Arc<AtomicBool>,
    pub stats: Arc<BridgeStats>,
    pub log: DebugLog,
}

impl PipelineJob {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Frames in one transfer
    pub fn transfer_frames(&self) -> usize {
        self.format.bytes_to_frames(self.transfer_bytes)
    }
}

/// Sizes shared by both bridges of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub format: AudioFormat,
    pub period_bytes: usize,
    pub ring_capacity: usize,
    pub poll_interval: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            format: config.audio.format(),
            period_bytes: config.audio.period_bytes(),
            ring_capacity: config.audio.ring_capacity(),
            poll_interval: Duration::from_millis(config.network.poll_interval_ms),
        }
    }
}

/// Counter snapshot for status logging
#[derive(Debug, Clone, Copy)]
pub struct PipelineStats {
    pub device_transfers: u64,
    pub device_bytes: u64,
    pub network_transfers: u64,
    pub network_bytes: u64,
    pub ring: RingSnapshot,
}

/// Cloneable control handle: stop the pipeline or read its counters
#[derive(Clone)]
pub struct PipelineHandle {
    ring: SharedRingBuffer,
    running: Arc<AtomicBool>,
    device_stats: Arc<BridgeStats>,
    network_stats: Arc<BridgeStats>,
}

impl PipelineHandle {
    /// Ask both bridges to exit. Threads blocked in the ring buffer wake
    /// immediately; socket and device calls return within their poll interval.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            tracing::info!("Stopping pipeline");
        }
        self.ring.close();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn ring(&self) -> &SharedRingBuffer {
        &self.ring
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            device_transfers: self.device_stats.transfers(),
            device_bytes: self.device_stats.bytes(),
            network_transfers: self.network_stats.transfers(),
            network_bytes: self.network_stats.bytes(),
            ring: self.ring.snapshot(),
        }
    }
}

/// Reports a bridge's exit, including exit by panic
struct ExitNotifier {
    role: BridgeRole,
    done: Sender<(BridgeRole, Result<()>)>,
    reported: bool,
}

impl ExitNotifier {
    fn report(mut self, result: Result<()>) {
        self.reported = true;
        let _ = self.done.send((self.role, result));
    }
}

impl Drop for ExitNotifier {
    fn drop(&mut self) {
        if !self.reported {
            let _ = self
                .done
                .send((self.role, Err(Error::ThreadPanicked(self.role.thread_name()))));
        }
    }
}

/// Two bridge threads around one ring buffer
pub struct Pipeline {
    handle: PipelineHandle,
    exit_tx: Sender<(BridgeRole, Result<()>)>,
    exit_rx: Receiver<(BridgeRole, Result<()>)>,
    threads: Vec<(BridgeRole, JoinHandle<()>)>,
}

impl Pipeline {
    /// Capture device → ring buffer → datagrams to `peer`
    pub fn sender<D>(
        settings: &PipelineSettings,
        device: D,
        socket: UdpSocket,
        peer: SocketAddr,
        log: DebugLog,
    ) -> Result<Self>
    where
        D: CaptureDevice + 'static,
    {
        check_format(settings, device.format())?;
        let mut pipeline = Self::new(settings, log)?;

        let job = pipeline.job(settings, BridgeRole::Capture, log);
        pipeline.spawn(BridgeRole::Capture, move || run_capture_bridge(job, device))?;

        let job = pipeline.job(settings, BridgeRole::Send, log);
        pipeline.spawn(BridgeRole::Send, move || run_send_bridge(job, socket, peer))?;

        tracing::info!("Sender pipeline running, streaming to {}", peer);
        Ok(pipeline)
    }

    /// Datagrams from any sender → ring buffer → playback device
    pub fn receiver<D>(
        settings: &PipelineSettings,
        socket: UdpSocket,
        device: D,
        log: DebugLog,
    ) -> Result<Self>
    where
        D: PlaybackDevice + 'static,
    {
        check_format(settings, device.format())?;
        let mut pipeline = Self::new(settings, log)?;

        let job = pipeline.job(settings, BridgeRole::Receive, log);
        let poll = settings.poll_interval;
        pipeline.spawn(BridgeRole::Receive, move || run_receive_bridge(job, socket, poll))?;

        let job = pipeline.job(settings, BridgeRole::Playback, log);
        pipeline.spawn(BridgeRole::Playback, move || run_playback_bridge(job, device))?;

        tracing::info!("Receiver pipeline running");
        Ok(pipeline)
    }

    /// Capture device → ring buffer → playback device, no network.
    ///
    /// Useful for checking a device pair and buffering settings locally.
    pub fn local<C, P>(
        settings: &PipelineSettings,
        capture: C,
        playback: P,
        log: DebugLog,
    ) -> Result<Self>
    where
        C: CaptureDevice + 'static,
        P: PlaybackDevice + 'static,
    {
        check_format(settings, capture.format())?;
        check_format(settings, playback.format())?;
        let mut pipeline = Self::new(settings, log)?;

        let job = pipeline.job(settings, BridgeRole::Capture, log);
        pipeline.spawn(BridgeRole::Capture, move || run_capture_bridge(job, capture))?;

        let job = pipeline.job(settings, BridgeRole::Playback, log);
        pipeline.spawn(BridgeRole::Playback, move || run_playback_bridge(job, playback))?;

        Ok(pipeline)
    }

    fn new(settings: &PipelineSettings, log: DebugLog) -> Result<Self> {
        if settings.period_bytes < settings.format.frame_bytes() {
            return Err(Error::Config(format!(
                "period of {} bytes is shorter than one frame",
                settings.period_bytes
            )));
        }

        let ring = Arc::new(RingBuffer::new(settings.ring_capacity, log)?);
        let (exit_tx, exit_rx) = bounded(2);

        tracing::debug!(
            "Ring buffer: {} bytes ({} usable), period {} bytes",
            settings.ring_capacity,
            settings.ring_capacity - 1,
            settings.period_bytes
        );

        Ok(Self {
            handle: PipelineHandle {
                ring,
                running: Arc::new(AtomicBool::new(true)),
                device_stats: Arc::new(BridgeStats::default()),
                network_stats: Arc::new(BridgeStats::default()),
            },
            exit_tx,
            exit_rx,
            threads: Vec::with_capacity(2),
        })
    }

    fn job(&self, settings: &PipelineSettings, role: BridgeRole, log: DebugLog) -> PipelineJob {
        let stats = match role {
            BridgeRole::Capture | BridgeRole::Playback => self.handle.device_stats.clone(),
            BridgeRole::Send | BridgeRole::Receive => self.handle.network_stats.clone(),
        };

        PipelineJob {
            ring: self.handle.ring.clone(),
            format: settings.format,
            transfer_bytes: settings.period_bytes,
            running: self.handle.running.clone(),
            stats,
            log,
        }
    }

    fn spawn<F>(&mut self, role: BridgeRole, body: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let notifier = ExitNotifier {
            role,
            done: self.exit_tx.clone(),
            reported: false,
        };

        let spawned = thread::Builder::new()
            .name(role.thread_name().to_string())
            .spawn(move || notifier.report(body()));

        match spawned {
            Ok(thread) => {
                self.threads.push((role, thread));
                Ok(())
            }
            Err(e) => {
                // Do not leave the first bridge running on its own
                self.handle.stop();
                self.join_all();
                Err(e.into())
            }
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Block until a bridge exits, then stop and join the other.
    ///
    /// Returns the first error reported by either bridge.
    pub fn wait(mut self) -> Result<()> {
        let mut first_error = None;

        if let Ok((role, result)) = self.exit_rx.recv() {
            match &result {
                Ok(()) => tracing::info!("{} exited", role.thread_name()),
                Err(e) => tracing::error!("{} failed: {}", role.thread_name(), e),
            }
            first_error = result.err();
        }

        self.handle.stop();
        self.join_all();

        while let Ok((role, result)) = self.exit_rx.try_recv() {
            if let Err(e) = result {
                tracing::debug!("{} also failed: {}", role.thread_name(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn join_all(&mut self) {
        for (role, thread) in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::error!("{} panicked", role.thread_name());
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.handle.stop();
            self.join_all();
        }
    }
}

fn check_format(settings: &PipelineSettings, device: AudioFormat) -> Result<()> {
    if device != settings.format {
        return Err(Error::Config(format!(
            "device format {:?} does not match configured {:?}",
            device, settings.format
        )));
    }
    Ok(())
}
