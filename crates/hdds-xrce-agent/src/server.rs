// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Threaded XRCE server.
//!
//! Four named threads share one transport and one [`Processor`]:
//!
//! | thread | loop |
//! |--------|------|
//! | receiver | `Transport::recv_message` → input queue |
//! | processing | input queue → `Processor::process_input_packet` |
//! | sender | output queue → `Transport::send_message` |
//! | heartbeat | every heartbeat period → `Processor::check_heartbeats` |
//!
//! Both queues are bounded and drop their oldest packet when full.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::XrceAgentConfig;
use crate::error::XrceError;
use crate::middleware::Middleware;
use crate::processor::{PacketSink, Processor};
use crate::registry::ClientRegistry;
use crate::transport::{InputPacket, OutputPacket, Transport, TransportError};

/// Poll interval of the queue consumers, bounding stop latency.
const QUEUE_POLL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Packet queue
// ---------------------------------------------------------------------------

/// Bounded FIFO shared between two threads.
pub struct PacketQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> PacketQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
        }
    }

    /// Append `item`. Returns `false` when the oldest entry had to go.
    pub fn push(&self, item: T) -> bool {
        let mut items = self.items.lock();
        let evicted = if items.len() >= self.capacity {
            items.pop_front();
            true
        } else {
            false
        };
        items.push_back(item);
        drop(items);
        self.ready.notify_one();
        !evicted
    }

    /// Take the oldest entry, waiting up to `timeout` for one.
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            if self.ready.wait_until(&mut items, deadline).timed_out() {
                return items.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn wake_all(&self) {
        self.ready.notify_all();
    }
}

impl PacketSink for PacketQueue<OutputPacket> {
    fn send(&self, packet: OutputPacket) {
        if !self.push(packet) {
            log::warn!("[XRCE] output queue full, oldest packet dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Stop signal
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StopSignal {
    stopped: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl StopSignal {
    fn is_set(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn set(&self) {
        self.stopped.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.cv.notify_all();
    }

    /// Sleep for `timeout` unless stopped first. Returns the stop state.
    fn wait(&self, timeout: Duration) -> bool {
        let mut guard = self.lock.lock();
        if self.is_set() {
            return true;
        }
        self.cv.wait_for(&mut guard, timeout);
        self.is_set()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// XRCE agent bound to one transport.
pub struct Server {
    config: XrceAgentConfig,
    transport: Arc<dyn Transport>,
    processor: Arc<Processor>,
    input: Arc<PacketQueue<InputPacket>>,
    output: Arc<PacketQueue<OutputPacket>>,
    stop_signal: Arc<StopSignal>,
    threads: Vec<JoinHandle<()>>,
}

impl Server {
    /// Build a server. Nothing runs until [`Server::start`].
    pub fn new(
        config: XrceAgentConfig,
        transport: Arc<dyn Transport>,
        middleware: Arc<dyn Middleware>,
    ) -> Result<Self, XrceError> {
        config.validate()?;
        let input = Arc::new(PacketQueue::new(config.queue_capacity));
        let output = Arc::new(PacketQueue::new(config.queue_capacity));
        let registry = Arc::new(ClientRegistry::new(config.max_clients));
        let sink: Arc<dyn PacketSink> = output.clone();
        let processor = Arc::new(Processor::new(config.clone(), registry, middleware, sink));
        Ok(Self {
            config,
            transport,
            processor,
            input,
            output,
            stop_signal: Arc::new(StopSignal::default()),
            threads: Vec::new(),
        })
    }

    pub fn processor(&self) -> &Arc<Processor> {
        &self.processor
    }

    pub fn is_running(&self) -> bool {
        !self.threads.is_empty()
    }

    /// Spawn the four server threads. A running server is left untouched.
    pub fn start(&mut self) -> Result<(), XrceError> {
        if self.is_running() {
            return Ok(());
        }
        if self.stop_signal.is_set() {
            self.stop_signal = Arc::new(StopSignal::default());
        }
        let name = self.transport.name().to_string();

        let receiver = {
            let transport = self.transport.clone();
            let input = self.input.clone();
            let stop = self.stop_signal.clone();
            let timeout = self.config.receive_timeout();
            move || receiver_loop(transport.as_ref(), &input, &stop, timeout)
        };
        let processing = {
            let processor = self.processor.clone();
            let input = self.input.clone();
            let stop = self.stop_signal.clone();
            move || {
                while !stop.is_set() {
                    if let Some(packet) = input.pop(QUEUE_POLL) {
                        processor.process_input_packet(packet);
                    }
                }
            }
        };
        let sender = {
            let transport = self.transport.clone();
            let output = self.output.clone();
            let stop = self.stop_signal.clone();
            move || sender_loop(transport.as_ref(), &output, &stop)
        };
        let heartbeat = {
            let processor = self.processor.clone();
            let stop = self.stop_signal.clone();
            let period = self.config.heartbeat_period();
            move || {
                while !stop.wait(period) {
                    processor.check_heartbeats();
                }
            }
        };

        let spawned = [
            spawn_named(format!("xrce-recv-{}", name), receiver),
            spawn_named(format!("xrce-proc-{}", name), processing),
            spawn_named(format!("xrce-send-{}", name), sender),
            spawn_named(format!("xrce-hb-{}", name), heartbeat),
        ];
        let mut failure = None;
        for result in spawned {
            match result {
                Ok(handle) => self.threads.push(handle),
                Err(e) => failure = Some(e),
            }
        }
        if let Some(e) = failure {
            self.stop();
            return Err(e.into());
        }

        log::info!("[XRCE] server started on {}", name);
        Ok(())
    }

    /// Stop every thread, wait for them, then release all clients.
    pub fn stop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.stop_signal.set();
        self.input.wake_all();
        self.output.wake_all();
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("xrce").to_string();
            if handle.join().is_err() {
                log::error!("[XRCE] thread {} panicked", name);
            }
        }
        self.processor.shutdown();
        log::info!("[XRCE] server on {} stopped", self.transport.name());
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_named<F>(name: String, f: F) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new().name(name).spawn(f)
}

fn receiver_loop(
    transport: &dyn Transport,
    input: &PacketQueue<InputPacket>,
    stop: &StopSignal,
    timeout: Duration,
) {
    while !stop.is_set() {
        match transport.recv_message(timeout) {
            Ok(packet) => {
                if !input.push(packet) {
                    log::warn!("[XRCE] input queue full, oldest packet dropped");
                }
            }
            Err(TransportError::Timeout) => {}
            Err(TransportError::Connection(e)) => {
                log::warn!("[XRCE] {}: receive failed: {}", transport.name(), e);
            }
            Err(TransportError::Server(e)) => {
                log::warn!("[XRCE] {}: server error: {}", transport.name(), e);
                if !transport.recover() {
                    log::error!("[XRCE] {}: transport recovery failed", transport.name());
                    // Don't spin on a dead transport.
                    stop.wait(timeout);
                }
            }
        }
    }
}

fn sender_loop(transport: &dyn Transport, output: &PacketQueue<OutputPacket>, stop: &StopSignal) {
    while !stop.is_set() {
        let Some(packet) = output.pop(QUEUE_POLL) else {
            continue;
        };
        if let Err(e) = transport.send_message(&packet) {
            log::warn!(
                "[XRCE] {}: send to {} failed: {}",
                transport.name(),
                packet.destination,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::InMemoryMiddleware;
    use crate::protocol::{
        ClientKey, ClientRepresentation, MessageHeader, StatusCode, Submessage, SubmessageIter,
        XRCE_COOKIE, XRCE_VENDOR_ID, XRCE_VERSION,
    };
    use crate::seq::SeqNum;
    use crate::transport::UdpTransport;
    use std::net::UdpSocket;

    #[test]
    fn test_queue_is_fifo() {
        let q = PacketQueue::new(4);
        for i in 0..3 {
            assert!(q.push(i));
        }
        assert_eq!(q.pop(Duration::ZERO), Some(0));
        assert_eq!(q.pop(Duration::ZERO), Some(1));
        assert_eq!(q.pop(Duration::ZERO), Some(2));
        assert_eq!(q.pop(Duration::from_millis(5)), None);
    }

    #[test]
    fn test_queue_evicts_oldest() {
        let q = PacketQueue::new(2);
        assert!(q.push(1));
        assert!(q.push(2));
        assert!(!q.push(3));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(Duration::ZERO), Some(2));
        assert_eq!(q.pop(Duration::ZERO), Some(3));
        assert!(q.is_empty());
    }

    #[test]
    fn test_queue_wakes_waiting_consumer() {
        let q = Arc::new(PacketQueue::new(8));
        let producer = {
            let q = q.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                q.push(42u32);
            })
        };
        assert_eq!(q.pop(Duration::from_secs(2)), Some(42));
        producer.join().unwrap();
    }

    #[test]
    fn test_server_answers_create_client_over_udp() {
        let config = XrceAgentConfig {
            receive_timeout_ms: 10,
            ..Default::default()
        };
        let transport = Arc::new(UdpTransport::bind_addr("127.0.0.1:0".parse().unwrap()).unwrap());
        let agent_addr = transport.local_addr();
        let mut server = Server::new(config, transport, Arc::new(InMemoryMiddleware::new())).unwrap();
        server.start().unwrap();
        assert!(server.is_running());

        let key = ClientKey(0x0A0B0C0D);
        let mut message = MessageHeader::new(0x81, 0, SeqNum::new(0), key).to_bytes();
        message.extend(
            Submessage::CreateClient(ClientRepresentation {
                xrce_cookie: XRCE_COOKIE,
                xrce_version: XRCE_VERSION,
                xrce_vendor_id: XRCE_VENDOR_ID,
                client_key: key,
                session_id: 0x81,
                properties: None,
                mtu: 512,
            })
            .encode()
            .unwrap(),
        );

        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        peer.send_to(&message, agent_addr).unwrap();

        let mut buf = [0u8; 1024];
        let (n, _) = peer.recv_from(&mut buf).unwrap();
        let (header, offset) = MessageHeader::parse(&buf[..n]).unwrap();
        assert_eq!(header.session_id, 0x81);
        let (sub_hdr, payload) = SubmessageIter::new(&buf[..n], offset).next().unwrap().unwrap();
        match Submessage::decode(&sub_hdr, payload).unwrap() {
            Submessage::StatusAgent(p) => assert_eq!(p.result.status, StatusCode::Ok),
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(server.processor().registry().len(), 1);

        server.stop();
        assert!(!server.is_running());
        assert!(server.processor().registry().is_empty());
    }
}
