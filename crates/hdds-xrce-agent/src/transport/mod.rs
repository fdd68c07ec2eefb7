// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Transport abstraction for UDP, TCP and serial links.
//
// A transport turns bytes on the wire into endpoint-tagged packets and back.
// The receiver and sender threads of the server share one transport, so
// every method takes `&self`.

pub mod framing;
#[cfg(unix)]
pub mod serial;
pub mod tcp;
pub mod udp;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

#[cfg(unix)]
pub use serial::SerialTransport;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Address identifying a remote XRCE client over any transport.
///
/// Endpoints are totally ordered so the session manager can key on them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    Ipv4 { addr: [u8; 4], port: u16 },
    Ipv6 { addr: [u8; 16], port: u16 },
    /// Framing address on a serial line.
    Serial { address: u8 },
    /// CAN identifier.
    Can { id: u32 },
    /// Transport-defined members, compared member by member.
    Custom { members: Vec<(String, Vec<u8>)> },
}

impl Endpoint {
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Ipv4 { addr, port } => Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(*addr)), *port)),
            Self::Ipv6 { addr, port } => Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(*addr)), *port)),
            _ => None,
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(sa: SocketAddr) -> Self {
        match sa {
            SocketAddr::V4(v4) => Self::Ipv4 {
                addr: v4.ip().octets(),
                port: v4.port(),
            },
            SocketAddr::V6(v6) => Self::Ipv6 {
                addr: v6.ip().octets(),
                port: v6.port(),
            },
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4 { .. } | Self::Ipv6 { .. } => match self.socket_addr() {
                Some(sa) => write!(f, "{}", sa),
                None => write!(f, "?"),
            },
            Self::Serial { address } => write!(f, "serial:{}", address),
            Self::Can { id } => write!(f, "can:0x{:X}", id),
            Self::Custom { members } => {
                write!(f, "custom:")?;
                for (i, (name, _)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", name)?;
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Packets
// ---------------------------------------------------------------------------

/// A raw XRCE message received from `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPacket {
    pub source: Endpoint,
    pub message: Vec<u8>,
}

/// A raw XRCE message to deliver to `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPacket {
    pub destination: Endpoint,
    pub message: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Outcome of a failed transport call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Nothing arrived in time; not a failure.
    #[error("timeout")]
    Timeout,

    /// A peer or the link misbehaved; the transport keeps working.
    #[error("connection error: {0}")]
    Connection(String),

    /// The transport itself is broken and must be recovered.
    #[error("server error: {0}")]
    Server(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Connection(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Abstraction over the physical transport used between the XRCE agent
/// and its clients.
pub trait Transport: Send + Sync {
    /// Wait up to `timeout` for one complete message.
    fn recv_message(&self, timeout: Duration) -> Result<InputPacket, TransportError>;

    /// Send one complete message.
    fn send_message(&self, packet: &OutputPacket) -> Result<(), TransportError>;

    /// Bring the transport back after a server error. Returns success.
    fn recover(&self) -> bool {
        false
    }

    /// Short name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_from_socket_addr() {
        let sa: SocketAddr = "192.168.1.7:2019".parse().unwrap();
        let ep = Endpoint::from(sa);
        assert_eq!(
            ep,
            Endpoint::Ipv4 {
                addr: [192, 168, 1, 7],
                port: 2019
            }
        );
        assert_eq!(ep.socket_addr(), Some(sa));
        assert_eq!(ep.to_string(), "192.168.1.7:2019");
    }

    #[test]
    fn test_endpoint_ordering() {
        let a = Endpoint::Ipv4 {
            addr: [10, 0, 0, 1],
            port: 1,
        };
        let b = Endpoint::Ipv4 {
            addr: [10, 0, 0, 1],
            port: 2,
        };
        assert!(a < b);
        assert!(Endpoint::Serial { address: 1 } < Endpoint::Serial { address: 2 });
        assert_ne!(Endpoint::Can { id: 1 }, Endpoint::Serial { address: 1 });
    }

    #[test]
    fn test_io_error_mapping() {
        let e = std::io::Error::from(std::io::ErrorKind::WouldBlock);
        assert_eq!(TransportError::from(e), TransportError::Timeout);
        let e = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert!(matches!(TransportError::from(e), TransportError::Connection(_)));
    }
}
