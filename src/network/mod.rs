//! Network subsystem for UDP audio transport

pub mod receiver;
pub mod sender;
pub mod udp;

pub use receiver::run_receive_bridge;
pub use sender::run_send_bridge;
pub use udp::{create_socket, resolve_peer};
