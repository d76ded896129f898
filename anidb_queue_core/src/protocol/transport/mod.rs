//! Datagram transport
//!
//! The protocol actor talks to AniDB through [`Transport`] so tests can swap
//! the UDP socket for a scripted double.

use crate::protocol::error::{ProtocolError, Result};
use async_trait::async_trait;
use log::{debug, trace, warn};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::{UdpSocket, lookup_host};

/// A connected datagram channel to the AniDB server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Receive one datagram, waiting as long as it takes
    ///
    /// Callers bound the wait with their own timeout.
    async fn recv(&self, buffer: &mut [u8]) -> Result<usize>;
}

/// Real UDP transport
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    server_addr: SocketAddr,
}

impl UdpTransport {
    /// Resolve `server` (`host:port`), bind `local_port` and connect
    pub async fn connect(server: &str, local_port: u16) -> Result<Self> {
        debug!("Resolving server address: {server}");
        let server_addr = lookup_host(server)
            .await
            .map_err(|e| {
                warn!("Failed to resolve server address '{server}': {e}");
                ProtocolError::invalid_packet(format!(
                    "Failed to resolve server address '{server}': {e}"
                ))
            })?
            .next()
            .ok_or_else(|| {
                ProtocolError::invalid_packet(format!("No addresses found for '{server}'"))
            })?;

        Self::connect_addr(server_addr, local_port).await
    }

    /// Bind `local_port` on the matching address family and connect to `server_addr`
    pub async fn connect_addr(server_addr: SocketAddr, local_port: u16) -> Result<Self> {
        let bind_ip = if server_addr.is_ipv4() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        };

        let socket = UdpSocket::bind(SocketAddr::new(bind_ip, local_port)).await?;
        socket.connect(server_addr).await?;
        debug!(
            "UDP socket {} connected to {server_addr}",
            socket.local_addr()?
        );

        Ok(Self {
            socket,
            server_addr,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        if data.len() > crate::protocol::MAX_PACKET_SIZE {
            warn!(
                "Packet too large: {} bytes (max: {})",
                data.len(),
                crate::protocol::MAX_PACKET_SIZE
            );
            return Err(ProtocolError::packet_too_large(
                data.len(),
                crate::protocol::MAX_PACKET_SIZE,
            ));
        }

        trace!("Sending {} bytes to {}", data.len(), self.server_addr);
        self.socket.send(data).await?;
        Ok(())
    }

    async fn recv(&self, buffer: &mut [u8]) -> Result<usize> {
        let size = self.socket.recv(buffer).await?;
        trace!("Received {size} bytes from {}", self.server_addr);
        Ok(size)
    }
}
