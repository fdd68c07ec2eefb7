// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DDS-XRCE v1.0 agent.
//!
//! Implements the agent side of the OMG DDS-XRCE (eXtremely Resource
//! Constrained Environments) protocol: resource-constrained clients create
//! participants, topics, writers and readers on the agent, which realises
//! them on a pub/sub middleware and relays samples both ways.
//!
//! # Architecture
//!
//! ```text
//! XRCE Client (MCU)                XRCE Agent (this crate)            Middleware
//!        |                                |                            |
//!        |--- CREATE_CLIENT ------------>| ClientRegistry             |
//!        |<-- STATUS_AGENT --------------|                            |
//!        |--- CREATE(topic/reader) ----->| ProxyClient --- create --->|
//!        |<-- STATUS --------------------|                            |
//!        |--- WRITE_DATA(payload) ------>|------------- write_data -->|
//!        |--- READ_DATA ---------------->| Reader <----- read_data ---|
//!        |<-- DATA(payload) -------------|                            |
//!        |--- DELETE ------------------->|------------- delete ------>|
//! ```
//!
//! A [`Server`] runs the receiver, processing, sender and heartbeat threads
//! around one [`Transport`]; the [`Processor`] is transport-agnostic and can
//! be driven directly with any [`PacketSink`].
//!
//! # Key Features
//!
//! - **Transport-agnostic**: UDP, TCP and serial (UART) transports
//! - **Middleware-agnostic**: any pub/sub backend behind [`Middleware`]
//! - **Reliable streams**: ordering, ACKNACK / HEARTBEAT, retransmission
//! - **Fragmentation**: large messages are split and reassembled
//! - **Bounded delivery**: READ_DATA honours sample, time and rate limits
//!
//! # Transports
//!
//! | Transport | Use Case | Framing |
//! |-----------|----------|---------|
//! | [`UdpTransport`] | WiFi / Ethernet MCUs | one datagram per message |
//! | [`TcpTransport`] | Cloud / NAT traversal | 2-byte length prefix |
//! | `SerialTransport` | UART / RS-485 | HDLC-like frames with CRC-16 |

pub mod client;
pub mod config;
pub mod error;
pub mod middleware;
pub mod object;
pub mod processor;
pub mod protocol;
pub mod reader;
pub mod registry;
pub mod seq;
pub mod server;
pub mod session;
pub mod stream;
pub mod token_bucket;
pub mod transport;

// Re-exports for convenience.
pub use client::{CreationMode, ObjectInfo, ProxyClient};
pub use config::XrceAgentConfig;
pub use error::XrceError;
pub use middleware::{EntityId, InMemoryMiddleware, Middleware};
pub use object::{ObjectVariant, Representation, XrceObject};
pub use processor::{PacketSink, Processor, SendOutcome};
pub use protocol::{
    ClientKey, MessageHeader, ObjectId, ObjectKind, StatusCode, Submessage, SubmessageHeader,
};
pub use reader::{DeliveryControl, Reader};
pub use registry::ClientRegistry;
pub use seq::SeqNum;
pub use server::{PacketQueue, Server};
pub use session::{Session, StreamId, StreamKind};
pub use token_bucket::TokenBucket;
#[cfg(unix)]
pub use transport::SerialTransport;
pub use transport::{
    Endpoint, InputPacket, OutputPacket, TcpTransport, Transport, TransportError, UdpTransport,
};
