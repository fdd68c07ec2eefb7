// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// TCP transport.
//
// Each XRCE message travels behind a 2-byte little-endian length prefix. The
// listener and all connections are non-blocking; `recv_message` polls them
// round-robin until a full message is buffered or the timeout expires.

use std::collections::{BTreeMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{Endpoint, InputPacket, OutputPacket, Transport, TransportError};

const LENGTH_PREFIX_SIZE: usize = 2;
const POLL_INTERVAL: Duration = Duration::from_millis(1);
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

struct Connection {
    stream: TcpStream,
    rx: Vec<u8>,
}

impl Connection {
    /// Pull everything readable. Returns false once the peer is gone.
    fn fill(&mut self) -> bool {
        let mut chunk = [0u8; 2048];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return false,
                Ok(n) => self.rx.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return false,
            }
        }
    }

    fn take_message(&mut self) -> Option<Vec<u8>> {
        if self.rx.len() < LENGTH_PREFIX_SIZE {
            return None;
        }
        let len = usize::from(u16::from_le_bytes([self.rx[0], self.rx[1]]));
        if self.rx.len() < LENGTH_PREFIX_SIZE + len {
            return None;
        }
        let msg = self.rx[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + len].to_vec();
        self.rx.drain(..LENGTH_PREFIX_SIZE + len);
        Some(msg)
    }
}

struct TcpState {
    connections: BTreeMap<SocketAddr, Connection>,
    ready: VecDeque<InputPacket>,
}

/// TCP transport that accepts connections and multiplexes them.
pub struct TcpTransport {
    listener: TcpListener,
    local: SocketAddr,
    state: Mutex<TcpState>,
    name: String,
}

impl TcpTransport {
    /// Bind a TCP listener on `0.0.0.0:<port>`.
    pub fn bind(port: u16) -> Result<Self, TransportError> {
        Self::bind_addr(([0, 0, 0, 0], port).into())
    }

    pub fn bind_addr(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Server(e.to_string()))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| TransportError::Server(e.to_string()))?;
        let local = listener
            .local_addr()
            .map_err(|e| TransportError::Server(e.to_string()))?;
        log::info!("[XRCE-TCP] listening on {}", local);
        Ok(Self {
            listener,
            local,
            state: Mutex::new(TcpState {
                connections: BTreeMap::new(),
                ready: VecDeque::new(),
            }),
            name: format!("tcp:{}", local.port()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    fn accept_new(&self, state: &mut TcpState) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        log::warn!("[XRCE-TCP] dropping {}: {}", addr, e);
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    log::debug!("[XRCE-TCP] connection from {}", addr);
                    state.connections.insert(
                        addr,
                        Connection {
                            stream,
                            rx: Vec::new(),
                        },
                    );
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("[XRCE-TCP] accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn poll_connections(&self, state: &mut TcpState) {
        let mut closed = Vec::new();
        for (addr, conn) in state.connections.iter_mut() {
            if !conn.fill() {
                closed.push(*addr);
            }
            while let Some(message) = conn.take_message() {
                state.ready.push_back(InputPacket {
                    source: Endpoint::from(*addr),
                    message,
                });
            }
        }
        for addr in closed {
            log::debug!("[XRCE-TCP] {} closed", addr);
            state.connections.remove(&addr);
        }
    }
}

fn write_all_nonblocking(stream: &mut TcpStream, mut data: &[u8]) -> std::io::Result<()> {
    let deadline = Instant::now() + WRITE_TIMEOUT;
    while !data.is_empty() {
        match stream.write(data) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(ErrorKind::TimedOut.into());
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl Transport for TcpTransport {
    fn recv_message(&self, timeout: Duration) -> Result<InputPacket, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock();
                self.accept_new(&mut state);
                self.poll_connections(&mut state);
                if let Some(pkt) = state.ready.pop_front() {
                    return Ok(pkt);
                }
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn send_message(&self, packet: &OutputPacket) -> Result<(), TransportError> {
        let addr = packet.destination.socket_addr().ok_or_else(|| {
            TransportError::Connection(format!("not an IP endpoint: {}", packet.destination))
        })?;
        let len = u16::try_from(packet.message.len())
            .map_err(|_| TransportError::Connection("message too long".into()))?;

        let mut framed = Vec::with_capacity(LENGTH_PREFIX_SIZE + packet.message.len());
        framed.extend_from_slice(&len.to_le_bytes());
        framed.extend_from_slice(&packet.message);

        let mut state = self.state.lock();
        let conn = state
            .connections
            .get_mut(&addr)
            .ok_or_else(|| TransportError::Connection(format!("{} not connected", addr)))?;
        if let Err(e) = write_all_nonblocking(&mut conn.stream, &framed) {
            state.connections.remove(&addr);
            return Err(TransportError::Connection(format!("{}: {}", addr, e)));
        }
        Ok(())
    }

    fn recover(&self) -> bool {
        let mut state = self.state.lock();
        state.connections.clear();
        state.ready.clear();
        true
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(msg: &[u8]) -> Vec<u8> {
        let mut v = (msg.len() as u16).to_le_bytes().to_vec();
        v.extend_from_slice(msg);
        v
    }

    #[test]
    fn test_tcp_length_prefixed_exchange() {
        let agent = TcpTransport::bind_addr("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut client = TcpStream::connect(agent.local_addr()).unwrap();

        // Two messages in one write, the second split across writes.
        let mut bytes = framed(&[1, 2, 3]);
        let second = framed(&[4, 5]);
        bytes.extend_from_slice(&second[..3]);
        client.write_all(&bytes).unwrap();

        let first = agent.recv_message(Duration::from_secs(2)).unwrap();
        assert_eq!(first.message, vec![1, 2, 3]);
        assert_eq!(first.source, Endpoint::from(client.local_addr().unwrap()));

        client.write_all(&second[3..]).unwrap();
        let next = agent.recv_message(Duration::from_secs(2)).unwrap();
        assert_eq!(next.message, vec![4, 5]);

        agent
            .send_message(&OutputPacket {
                destination: first.source,
                message: vec![7, 7, 7],
            })
            .unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply, [3, 0, 7, 7, 7]);
    }

    #[test]
    fn test_tcp_timeout_without_peers() {
        let agent = TcpTransport::bind_addr("127.0.0.1:0".parse().unwrap()).unwrap();
        let err = agent.recv_message(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err, TransportError::Timeout);
    }

    #[test]
    fn test_tcp_send_to_unknown_peer() {
        let agent = TcpTransport::bind_addr("127.0.0.1:0".parse().unwrap()).unwrap();
        let err = agent
            .send_message(&OutputPacket {
                destination: Endpoint::from("127.0.0.1:9".parse::<SocketAddr>().unwrap()),
                message: vec![0],
            })
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }
}
