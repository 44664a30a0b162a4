//! UDP socket setup

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use crate::constants::{LAN_MTU_PAYLOAD, MAX_DATAGRAM_SIZE};
use crate::error::NetworkError;

/// Create a datagram socket bound to `bind_addr`.
///
/// `SO_REUSEADDR` is set so a restarted receiver can rebind its port
/// immediately; `recv_buffer` overrides `SO_RCVBUF` when given.
pub fn create_socket(bind_addr: SocketAddr, recv_buffer: Option<usize>) -> Result<UdpSocket, NetworkError> {
    let bind_failed = |e: std::io::Error| NetworkError::BindFailed(format!("{}: {}", bind_addr, e));

    let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(bind_failed)?;
    socket.set_reuse_address(true).map_err(bind_failed)?;

    if let Some(size) = recv_buffer {
        socket.set_recv_buffer_size(size).map_err(bind_failed)?;
        tracing::debug!(
            "Receive buffer: requested {} bytes, got {:?}",
            size,
            socket.recv_buffer_size().ok()
        );
    }

    socket.bind(&bind_addr.into()).map_err(bind_failed)?;
    Ok(socket.into())
}

/// Resolve `host:port` to a single peer, preferring IPv4
pub fn resolve_peer(peer: &str) -> Result<SocketAddr, NetworkError> {
    let addrs: Vec<SocketAddr> = peer
        .to_socket_addrs()
        .map_err(|e| NetworkError::ResolveFailed(format!("{}: {}", peer, e)))?
        .collect();

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| NetworkError::ResolveFailed(format!("{}: no addresses", peer)))
}

/// Wildcard address with an ephemeral port, in the same family as `peer`
pub fn sender_bind_addr(peer: SocketAddr) -> SocketAddr {
    let ip = match peer.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

/// Wildcard IPv4 address on `port`; the receiver accepts any sender
pub fn receiver_bind_addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

/// Reject payloads that cannot travel as one datagram
pub fn check_payload_size(bytes: usize) -> Result<(), NetworkError> {
    if bytes > MAX_DATAGRAM_SIZE {
        return Err(NetworkError::PacketTooLarge(bytes));
    }
    if bytes > LAN_MTU_PAYLOAD {
        tracing::warn!(
            "Datagrams of {} bytes exceed the {}-byte Ethernet payload and will be fragmented",
            bytes,
            LAN_MTU_PAYLOAD
        );
    }
    Ok(())
}
