// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use super::{Endpoint, InputPacket, OutputPacket, Transport, TransportError};

// Largest datagram we accept; anything longer is truncated by the kernel.
const RECV_BUFFER_SIZE: usize = 65535;

/// UDP transport, one socket shared by the receiver and sender threads.
pub struct UdpTransport {
    socket: UdpSocket,
    local: SocketAddr,
    name: String,
}

impl UdpTransport {
    /// Bind to `0.0.0.0:<port>`.
    pub fn bind(port: u16) -> Result<Self, TransportError> {
        Self::bind_addr(([0, 0, 0, 0], port).into())
    }

    /// Bind to `[::]:<port>`.
    pub fn bind_v6(port: u16) -> Result<Self, TransportError> {
        Self::bind_addr((std::net::Ipv6Addr::UNSPECIFIED, port).into())
    }

    pub fn bind_addr(addr: SocketAddr) -> Result<Self, TransportError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(server_err)?;
        socket.set_reuse_address(true).map_err(server_err)?;
        socket.bind(&addr.into()).map_err(server_err)?;

        let socket: UdpSocket = socket.into();
        let local = socket.local_addr().map_err(server_err)?;
        log::info!("[XRCE-UDP] listening on {}", local);
        Ok(Self {
            socket,
            local,
            name: format!("udp:{}", local.port()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

fn server_err(e: std::io::Error) -> TransportError {
    TransportError::Server(e.to_string())
}

impl Transport for UdpTransport {
    fn recv_message(&self, timeout: Duration) -> Result<InputPacket, TransportError> {
        // A zero read timeout means "block forever".
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket.set_read_timeout(Some(timeout)).map_err(server_err)?;

        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let (n, peer) = self.socket.recv_from(&mut buf)?;
        buf.truncate(n);
        Ok(InputPacket {
            source: Endpoint::from(peer),
            message: buf,
        })
    }

    fn send_message(&self, packet: &OutputPacket) -> Result<(), TransportError> {
        let dest = packet.destination.socket_addr().ok_or_else(|| {
            TransportError::Connection(format!("not an IP endpoint: {}", packet.destination))
        })?;
        let n = self.socket.send_to(&packet.message, dest)?;
        if n != packet.message.len() {
            return Err(TransportError::Connection(format!(
                "short datagram to {}: {}/{}",
                dest,
                n,
                packet.message.len()
            )));
        }
        Ok(())
    }

    fn recover(&self) -> bool {
        // The socket stays bound; it only needs to still report its address.
        self.socket.local_addr().is_ok()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
