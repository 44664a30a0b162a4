//! Send bridge: ring buffer → UDP
//!
//! Every read from the ring buffer becomes exactly one datagram to the peer
//! recorded at startup. Payloads carry raw PCM bytes with no header.

use std::net::{SocketAddr, UdpSocket};

use crate::debug_log;
use crate::error::{AudioError, NetworkError, Result};
use crate::logging::DebugCategory;
use crate::network::udp::check_payload_size;
use crate::pipeline::PipelineJob;

/// Forward buffered audio to `peer` until cancelled or a send fails
pub fn run_send_bridge(job: PipelineJob, socket: UdpSocket, peer: SocketAddr) -> Result<()> {
    check_payload_size(job.transfer_bytes)?;
    let mut buf = vec![0u8; job.transfer_bytes];

    tracing::info!(
        "Send bridge started: {} -> {}, up to {} bytes per datagram",
        socket.local_addr()?,
        peer,
        job.transfer_bytes
    );

    while job.is_running() {
        let n = match job.ring.read(&mut buf) {
            Ok(n) => n,
            Err(AudioError::BufferClosed) => break,
            Err(e) => return Err(e.into()),
        };

        let sent = socket
            .send_to(&buf[..n], peer)
            .map_err(|e| NetworkError::SendFailed(format!("{}: {}", peer, e)))?;
        debug_log!(job.log, DebugCategory::Network, "sent {} bytes to {}", sent, peer);
        job.stats.record(sent);
    }

    tracing::info!("Send bridge stopped");
    Ok(())
}
