//! Receive bridge: UDP → ring buffer
//!
//! Accepts datagrams from any sender. While the bridge is blocked writing
//! into a full ring buffer it does not read the socket; further datagrams
//! queue in the kernel or are dropped there.

use std::io;
use std::net::UdpSocket;
use std::time::Duration;

use crate::debug_log;
use crate::error::{AudioError, NetworkError, Result};
use crate::logging::DebugCategory;
use crate::pipeline::PipelineJob;

/// Push received datagrams into the ring buffer until cancelled or a
/// receive fails. `poll` bounds each blocking receive so cancellation is
/// noticed.
pub fn run_receive_bridge(job: PipelineJob, socket: UdpSocket, poll: Duration) -> Result<()> {
    socket.set_read_timeout(Some(poll))?;
    // Datagrams larger than one period are truncated by the kernel
    let mut buf = vec![0u8; job.transfer_bytes];

    tracing::info!(
        "Receive bridge started on {}, up to {} bytes per datagram",
        socket.local_addr()?,
        job.transfer_bytes
    );

    while job.is_running() {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string()).into()),
        };
        debug_log!(job.log, DebugCategory::Network, "received {} bytes from {}", n, from);

        match job.ring.write_all(&buf[..n]) {
            Ok(()) => job.stats.record(n),
            Err(AudioError::BufferClosed) => break,
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!("Receive bridge stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_shared_buffer;
    use crate::audio::AudioFormat;
    use crate::logging::DebugLog;
    use crate::network::udp::create_socket;
    use crate::pipeline::BridgeStats;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_datagrams_land_in_ring_and_flag_stops_bridge() {
        let job = PipelineJob {
            ring: create_shared_buffer(256, DebugLog::disabled()).unwrap(),
            format: AudioFormat::default(),
            transfer_bytes: 64,
            running: Arc::new(AtomicBool::new(true)),
            stats: Arc::new(BridgeStats::default()),
            log: DebugLog::disabled(),
        };
        let ring = job.ring.clone();
        let running = job.running.clone();
        let stats = job.stats.clone();

        let socket = create_socket("127.0.0.1:0".parse().unwrap(), None).unwrap();
        let addr = socket.local_addr().unwrap();
        let bridge = thread::spawn(move || run_receive_bridge(job, socket, Duration::from_millis(20)));

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(&[1, 2, 3, 4], addr).unwrap();
        client.send_to(&[5, 6], addr).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ring.len() < 6 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        // No ring close: the read timeout alone must let the bridge see the flag
        running.store(false, Ordering::Release);
        bridge.join().unwrap().unwrap();

        let mut out = [0u8; 16];
        assert_eq!(ring.read(&mut out).unwrap(), 6);
        assert_eq!(&out[..6], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(stats.transfers(), 2);
    }
}
