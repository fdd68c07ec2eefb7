// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors produced by the XRCE agent.
//!
//! Decode errors stay inside the agent: the processor logs them and drops
//! the offending unit. Clients only ever see protocol status codes.

use thiserror::Error;

/// Errors produced by the XRCE subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XrceError {
    /// Not enough bytes to parse a header / payload.
    #[error("buffer too short")]
    BufferTooShort,

    /// Unknown submessage id.
    #[error("unknown submessage id: 0x{0:02x}")]
    UnknownSubmessageId(u8),

    /// Unknown object kind nibble.
    #[error("unknown object kind: 0x{0:02x}")]
    UnknownObjectKind(u8),

    /// Unknown status code.
    #[error("unknown status code: 0x{0:02x}")]
    UnknownStatusCode(u8),

    /// Unknown representation format.
    #[error("unknown representation format: 0x{0:02x}")]
    UnknownRepresentation(u8),

    /// Declared submessage length runs past the end of the message.
    #[error("payload length mismatch")]
    PayloadLengthMismatch,

    /// Structurally valid bytes carrying an invalid value.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Submessage payload longer than its 16-bit length field allows.
    #[error("payload of {0} bytes does not fit a submessage")]
    PayloadTooLarge(usize),

    /// Fragmentation / reassembly error.
    #[error("fragment error: {0}")]
    Fragment(String),

    /// A transport-level I/O error (message only, not the original error).
    #[error("I/O error: {0}")]
    Io(String),

    /// Configuration validation or loading error.
    #[error("config error: {0}")]
    Config(String),
}

impl From<std::io::Error> for XrceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<toml::de::Error> for XrceError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}
