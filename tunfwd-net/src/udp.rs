//! UDP socket setup for the encapsulation side.
//!
//! Connectionless: each datagram carries exactly one inner IP packet and
//! every send names its destination, so one bound socket serves all peers.

use std::io;
use std::net::{SocketAddrV4, UdpSocket};

/// Kernel buffer size requested for both directions.
pub const DEFAULT_SOCKET_BUFFER: usize = 1 << 20;

/// Configuration for the forwarding socket.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    pub listen: SocketAddrV4,
    pub reuse_address: bool,
    /// `SO_RCVBUF`/`SO_SNDBUF`; `None` keeps the kernel defaults.
    pub buffer_size: Option<usize>,
}

impl Default for UdpConfig {
    fn default() -> Self {
        UdpConfig {
            listen: SocketAddrV4::new(
                std::net::Ipv4Addr::UNSPECIFIED,
                tunfwd_core::constants::DEFAULT_PORT,
            ),
            reuse_address: true,
            buffer_size: Some(DEFAULT_SOCKET_BUFFER),
        }
    }
}

/// Create and bind the forwarding socket, already in non-blocking mode.
pub fn bind(config: &UdpConfig) -> io::Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    socket.set_reuse_address(config.reuse_address)?;

    if let Some(size) = config.buffer_size {
        // The kernel may clamp these; a smaller buffer only costs drops.
        if let Err(e) = socket.set_recv_buffer_size(size) {
            log::warn!("could not set UDP receive buffer to {}: {}", size, e);
        }
        if let Err(e) = socket.set_send_buffer_size(size) {
            log::warn!("could not set UDP send buffer to {}: {}", size, e);
        }
    }

    socket.bind(&config.listen.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: UdpSocket = socket.into();
    log::info!("UDP listening on {}", std_socket.local_addr()?);
    Ok(std_socket)
}
