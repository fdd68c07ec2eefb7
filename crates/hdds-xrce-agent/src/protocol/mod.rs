// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// DDS-XRCE v1.0 wire format parser/builder.
//
// All parsing is safe: malformed input returns Err, never panics.
//
// Message layout:
//
//   [session_id:1][stream_id:1][sequence_nr:2 LE][client_key:4 iff session_id < 0x80]
//   { pad to 4 } [id:1][flags:1][length:2 LE][payload:length]   (repeated)

pub mod cdr;
pub mod payload;

use std::fmt;

use crate::error::XrceError;
use crate::seq::SeqNum;
use cdr::{CdrReader, CdrWriter};
pub use payload::*;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Message header size without client key.
pub const MESSAGE_HEADER_SIZE: usize = 4;

/// Size of the client key carried by keyed sessions.
pub const CLIENT_KEY_SIZE: usize = 4;

/// XRCE submessage header size in bytes.
pub const SUBMESSAGE_HEADER_SIZE: usize = 4;

/// Session ids at or above this value carry no client key.
pub const SESSION_ID_WITHOUT_CLIENT_KEY: u8 = 0x80;

/// Session id used by clients that do not open a session (GET_INFO).
pub const SESSION_ID_NONE_WITH_CLIENT_KEY: u8 = 0x00;
pub const SESSION_ID_NONE_WITHOUT_CLIENT_KEY: u8 = 0x80;

// Submessage IDs
pub const SUBMSG_CREATE_CLIENT: u8 = 0x00;
pub const SUBMSG_CREATE: u8 = 0x01;
pub const SUBMSG_GET_INFO: u8 = 0x02;
pub const SUBMSG_DELETE: u8 = 0x03;
pub const SUBMSG_STATUS_AGENT: u8 = 0x04;
pub const SUBMSG_STATUS: u8 = 0x05;
pub const SUBMSG_INFO: u8 = 0x06;
pub const SUBMSG_WRITE_DATA: u8 = 0x07;
pub const SUBMSG_READ_DATA: u8 = 0x08;
pub const SUBMSG_DATA: u8 = 0x09;
pub const SUBMSG_ACKNACK: u8 = 0x0A;
pub const SUBMSG_HEARTBEAT: u8 = 0x0B;
pub const SUBMSG_RESET: u8 = 0x0C;
pub const SUBMSG_FRAGMENT: u8 = 0x0D;
pub const SUBMSG_TIMESTAMP: u8 = 0x0E;
pub const SUBMSG_TIMESTAMP_REPLY: u8 = 0x0F;

// Flags
pub const FLAG_LITTLE_ENDIAN: u8 = 0x01;
pub const FLAG_REUSE: u8 = 0x02;
pub const FLAG_REPLACE: u8 = 0x04;
pub const FLAG_LAST_FRAGMENT: u8 = 0x02;
pub const FORMAT_MASK: u8 = 0x0E;
pub const FORMAT_DATA: u8 = 0x00;

// Object kinds
pub const OBJ_INVALID: u8 = 0x00;
pub const OBJ_PARTICIPANT: u8 = 0x01;
pub const OBJ_TOPIC: u8 = 0x02;
pub const OBJ_PUBLISHER: u8 = 0x03;
pub const OBJ_SUBSCRIBER: u8 = 0x04;
pub const OBJ_DATAWRITER: u8 = 0x05;
pub const OBJ_DATAREADER: u8 = 0x06;
pub const OBJ_REQUESTER: u8 = 0x07;
pub const OBJ_REPLIER: u8 = 0x08;
pub const OBJ_AGENT: u8 = 0x0D;
pub const OBJ_CLIENT: u8 = 0x0E;

// Status codes
pub const STATUS_OK: u8 = 0x00;
pub const STATUS_OK_MATCHED: u8 = 0x01;
pub const STATUS_ERR_DDS_ERROR: u8 = 0x80;
pub const STATUS_ERR_MISMATCH: u8 = 0x81;
pub const STATUS_ERR_ALREADY_EXISTS: u8 = 0x82;
pub const STATUS_ERR_DENIED: u8 = 0x83;
pub const STATUS_ERR_UNKNOWN_REFERENCE: u8 = 0x84;
pub const STATUS_ERR_INVALID_DATA: u8 = 0x85;
pub const STATUS_ERR_INCOMPATIBLE: u8 = 0x86;
pub const STATUS_ERR_RESOURCES: u8 = 0x87;

// ---------------------------------------------------------------------------
// Client key
// ---------------------------------------------------------------------------

/// 32-bit client identity, carried big-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ClientKey(pub u32);

impl ClientKey {
    pub fn from_bytes(b: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(b))
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Object kind enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectKind {
    Participant = OBJ_PARTICIPANT,
    Topic = OBJ_TOPIC,
    Publisher = OBJ_PUBLISHER,
    Subscriber = OBJ_SUBSCRIBER,
    DataWriter = OBJ_DATAWRITER,
    DataReader = OBJ_DATAREADER,
    Requester = OBJ_REQUESTER,
    Replier = OBJ_REPLIER,
    Agent = OBJ_AGENT,
    Client = OBJ_CLIENT,
}

impl ObjectKind {
    /// Decode the kind nibble (the upper four bits are ignored).
    pub fn from_nibble(v: u8) -> Result<Self, XrceError> {
        match v & 0x0F {
            OBJ_PARTICIPANT => Ok(Self::Participant),
            OBJ_TOPIC => Ok(Self::Topic),
            OBJ_PUBLISHER => Ok(Self::Publisher),
            OBJ_SUBSCRIBER => Ok(Self::Subscriber),
            OBJ_DATAWRITER => Ok(Self::DataWriter),
            OBJ_DATAREADER => Ok(Self::DataReader),
            OBJ_REQUESTER => Ok(Self::Requester),
            OBJ_REPLIER => Ok(Self::Replier),
            OBJ_AGENT => Ok(Self::Agent),
            OBJ_CLIENT => Ok(Self::Client),
            _ => Err(XrceError::UnknownObjectKind(v)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// Object id
// ---------------------------------------------------------------------------

/// Two-octet object id: 12-bit prefix chosen by the client + 4-bit kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u16);

impl ObjectId {
    /// Id the client uses to address itself (DELETE of the session).
    pub const CLIENT: ObjectId = ObjectId(0xFFFE);
    /// Id of the agent (GET_INFO).
    pub const AGENT: ObjectId = ObjectId(0xFFFD);

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn new(prefix: u16, kind: ObjectKind) -> Self {
        Self((prefix << 4) | u16::from(kind.as_u8()))
    }

    pub fn from_bytes(b: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(b))
    }

    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn prefix(self) -> u16 {
        self.0 >> 4
    }

    /// Kind encoded in the low nibble.
    pub fn kind(self) -> Result<ObjectKind, XrceError> {
        ObjectKind::from_nibble((self.0 & 0x0F) as u8)
    }

    pub fn is_kind(self, kind: ObjectKind) -> bool {
        (self.0 & 0x0F) as u8 == kind.as_u8()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Status code enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusCode {
    Ok = STATUS_OK,
    OkMatched = STATUS_OK_MATCHED,
    ErrDdsError = STATUS_ERR_DDS_ERROR,
    ErrMismatch = STATUS_ERR_MISMATCH,
    ErrAlreadyExists = STATUS_ERR_ALREADY_EXISTS,
    ErrDenied = STATUS_ERR_DENIED,
    ErrUnknownReference = STATUS_ERR_UNKNOWN_REFERENCE,
    ErrInvalidData = STATUS_ERR_INVALID_DATA,
    ErrIncompatible = STATUS_ERR_INCOMPATIBLE,
    ErrResources = STATUS_ERR_RESOURCES,
}

impl StatusCode {
    pub fn from_u8(v: u8) -> Result<Self, XrceError> {
        match v {
            STATUS_OK => Ok(Self::Ok),
            STATUS_OK_MATCHED => Ok(Self::OkMatched),
            STATUS_ERR_DDS_ERROR => Ok(Self::ErrDdsError),
            STATUS_ERR_MISMATCH => Ok(Self::ErrMismatch),
            STATUS_ERR_ALREADY_EXISTS => Ok(Self::ErrAlreadyExists),
            STATUS_ERR_DENIED => Ok(Self::ErrDenied),
            STATUS_ERR_UNKNOWN_REFERENCE => Ok(Self::ErrUnknownReference),
            STATUS_ERR_INVALID_DATA => Ok(Self::ErrInvalidData),
            STATUS_ERR_INCOMPATIBLE => Ok(Self::ErrIncompatible),
            STATUS_ERR_RESOURCES => Ok(Self::ErrResources),
            _ => Err(XrceError::UnknownStatusCode(v)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// OK and OK_MATCHED both count as success.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::OkMatched)
    }
}

// ---------------------------------------------------------------------------
// Message header
// ---------------------------------------------------------------------------

/// Top-level XRCE message header (4 bytes, 8 with client key).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub session_id: u8,
    pub stream_id: u8,
    pub sequence_nr: SeqNum,
    /// Present iff `session_id < 0x80`.
    pub client_key: Option<ClientKey>,
}

impl MessageHeader {
    /// Build a header, attaching `key` only when the session id calls for it.
    pub fn new(session_id: u8, stream_id: u8, sequence_nr: SeqNum, key: ClientKey) -> Self {
        Self {
            session_id,
            stream_id,
            sequence_nr,
            client_key: (session_id < SESSION_ID_WITHOUT_CLIENT_KEY).then_some(key),
        }
    }

    /// Parse a header. Returns the header and its encoded size.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), XrceError> {
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(XrceError::BufferTooShort);
        }
        let session_id = buf[0];
        let stream_id = buf[1];
        let sequence_nr = SeqNum::new(u16::from_le_bytes([buf[2], buf[3]]));
        if session_id >= SESSION_ID_WITHOUT_CLIENT_KEY {
            return Ok((
                Self {
                    session_id,
                    stream_id,
                    sequence_nr,
                    client_key: None,
                },
                MESSAGE_HEADER_SIZE,
            ));
        }
        let end = MESSAGE_HEADER_SIZE + CLIENT_KEY_SIZE;
        if buf.len() < end {
            return Err(XrceError::BufferTooShort);
        }
        let key = ClientKey::from_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Ok((
            Self {
                session_id,
                stream_id,
                sequence_nr,
                client_key: Some(key),
            },
            end,
        ))
    }

    pub fn size(&self) -> usize {
        if self.session_id < SESSION_ID_WITHOUT_CLIENT_KEY {
            MESSAGE_HEADER_SIZE + CLIENT_KEY_SIZE
        } else {
            MESSAGE_HEADER_SIZE
        }
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.session_id);
        buf.push(self.stream_id);
        buf.extend_from_slice(&self.sequence_nr.get().to_le_bytes());
        if self.session_id < SESSION_ID_WITHOUT_CLIENT_KEY {
            let key = self.client_key.unwrap_or_default();
            buf.extend_from_slice(&key.to_bytes());
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        self.write_to(&mut buf);
        buf
    }
}

// ---------------------------------------------------------------------------
// Submessage header
// ---------------------------------------------------------------------------

/// Submessage header (4 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmessageHeader {
    pub submessage_id: u8,
    pub flags: u8,
    pub length: u16,
}

impl SubmessageHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, XrceError> {
        if buf.len() < SUBMESSAGE_HEADER_SIZE {
            return Err(XrceError::BufferTooShort);
        }
        Ok(Self {
            submessage_id: buf[0],
            flags: buf[1],
            length: u16::from_le_bytes([buf[2], buf[3]]),
        })
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.submessage_id);
        buf.push(self.flags);
        buf.extend_from_slice(&self.length.to_le_bytes());
    }

    pub fn is_little_endian(&self) -> bool {
        self.flags & FLAG_LITTLE_ENDIAN != 0
    }
}

// ---------------------------------------------------------------------------
// Submessage iteration
// ---------------------------------------------------------------------------

/// Walks the submessages of a message body.
///
/// Offsets are relative to the start of the whole message so that the
/// 4-byte alignment of every subheader is computed correctly. The iterator
/// yields an error once and then stops; the rest of the packet is discarded.
pub struct SubmessageIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SubmessageIter<'a> {
    /// `buf` is the whole message, `start` the first byte after the header.
    pub fn new(buf: &'a [u8], start: usize) -> Self {
        Self { buf, pos: start }
    }
}

impl<'a> Iterator for SubmessageIter<'a> {
    type Item = Result<(SubmessageHeader, &'a [u8]), XrceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pos = align4(self.pos);
        if self.pos >= self.buf.len() {
            return None;
        }
        let hdr = match SubmessageHeader::parse(&self.buf[self.pos..]) {
            Ok(h) => h,
            Err(e) => {
                self.pos = self.buf.len();
                return Some(Err(e));
            }
        };
        let start = self.pos + SUBMESSAGE_HEADER_SIZE;
        let end = start + hdr.length as usize;
        if end > self.buf.len() {
            self.pos = self.buf.len();
            return Some(Err(XrceError::PayloadLengthMismatch));
        }
        self.pos = end;
        Some(Ok((hdr, &self.buf[start..end])))
    }
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Append a serialized submessage, padding `buf` to a 4-byte boundary first.
pub fn append_submessage(buf: &mut Vec<u8>, submessage: &[u8]) {
    buf.resize(align4(buf.len()), 0);
    buf.extend_from_slice(submessage);
}

// ---------------------------------------------------------------------------
// Unified submessage enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submessage {
    CreateClient(ClientRepresentation),
    Create {
        payload: CreatePayload,
        mode: CreationMode,
    },
    GetInfo(GetInfoPayload),
    Delete(DeletePayload),
    StatusAgent(StatusAgentPayload),
    Status(StatusPayload),
    Info(InfoPayload),
    WriteData(WriteDataPayload),
    ReadData(ReadDataPayload),
    Data(DataPayload),
    Acknack(AcknackPayload),
    Heartbeat(HeartbeatPayload),
    Reset,
    Fragment { data: Vec<u8>, last: bool },
    Timestamp(Time),
    TimestampReply(TimestampReplyPayload),
}

impl Submessage {
    pub fn id(&self) -> u8 {
        match self {
            Self::CreateClient(_) => SUBMSG_CREATE_CLIENT,
            Self::Create { .. } => SUBMSG_CREATE,
            Self::GetInfo(_) => SUBMSG_GET_INFO,
            Self::Delete(_) => SUBMSG_DELETE,
            Self::StatusAgent(_) => SUBMSG_STATUS_AGENT,
            Self::Status(_) => SUBMSG_STATUS,
            Self::Info(_) => SUBMSG_INFO,
            Self::WriteData(_) => SUBMSG_WRITE_DATA,
            Self::ReadData(_) => SUBMSG_READ_DATA,
            Self::Data(_) => SUBMSG_DATA,
            Self::Acknack(_) => SUBMSG_ACKNACK,
            Self::Heartbeat(_) => SUBMSG_HEARTBEAT,
            Self::Reset => SUBMSG_RESET,
            Self::Fragment { .. } => SUBMSG_FRAGMENT,
            Self::Timestamp(_) => SUBMSG_TIMESTAMP,
            Self::TimestampReply(_) => SUBMSG_TIMESTAMP_REPLY,
        }
    }

    /// Decode the payload described by `hdr`.
    pub fn decode(hdr: &SubmessageHeader, payload: &[u8]) -> Result<Self, XrceError> {
        let mut r = CdrReader::new(payload, hdr.is_little_endian());
        let submsg = match hdr.submessage_id {
            SUBMSG_CREATE_CLIENT => Self::CreateClient(ClientRepresentation::decode(&mut r)?),
            SUBMSG_CREATE => Self::Create {
                payload: CreatePayload::decode(&mut r)?,
                mode: CreationMode {
                    reuse: hdr.flags & FLAG_REUSE != 0,
                    replace: hdr.flags & FLAG_REPLACE != 0,
                },
            },
            SUBMSG_GET_INFO => Self::GetInfo(GetInfoPayload::decode(&mut r)?),
            SUBMSG_DELETE => Self::Delete(DeletePayload {
                request: BaseObjectRequest::decode(&mut r)?,
            }),
            SUBMSG_STATUS_AGENT => Self::StatusAgent(StatusAgentPayload::decode(&mut r)?),
            SUBMSG_STATUS => Self::Status(StatusPayload::decode(&mut r)?),
            SUBMSG_INFO => Self::Info(InfoPayload::decode(&mut r)?),
            SUBMSG_WRITE_DATA => {
                check_data_format(hdr.flags)?;
                let request = BaseObjectRequest::decode(&mut r)?;
                Self::WriteData(WriteDataPayload {
                    request,
                    data: r.read_rest().to_vec(),
                })
            }
            SUBMSG_READ_DATA => Self::ReadData(ReadDataPayload::decode(&mut r)?),
            SUBMSG_DATA => {
                check_data_format(hdr.flags)?;
                let request = BaseObjectRequest::decode(&mut r)?;
                Self::Data(DataPayload {
                    request,
                    data: r.read_rest().to_vec(),
                })
            }
            SUBMSG_ACKNACK => Self::Acknack(AcknackPayload::decode(&mut r)?),
            SUBMSG_HEARTBEAT => Self::Heartbeat(HeartbeatPayload::decode(&mut r)?),
            SUBMSG_RESET => Self::Reset,
            SUBMSG_FRAGMENT => Self::Fragment {
                data: payload.to_vec(),
                last: hdr.flags & FLAG_LAST_FRAGMENT != 0,
            },
            SUBMSG_TIMESTAMP => Self::Timestamp(Time::decode(&mut r)?),
            SUBMSG_TIMESTAMP_REPLY => Self::TimestampReply(TimestampReplyPayload::decode(&mut r)?),
            other => return Err(XrceError::UnknownSubmessageId(other)),
        };
        Ok(submsg)
    }

    /// Serialize (header + payload). Payloads are always little-endian.
    ///
    /// Fails when the payload exceeds the 16-bit submessage length.
    pub fn encode(&self) -> Result<Vec<u8>, XrceError> {
        let mut flags = FLAG_LITTLE_ENDIAN;
        let mut w = CdrWriter::new();
        match self {
            Self::CreateClient(p) => p.encode(&mut w),
            Self::Create { payload, mode } => {
                if mode.reuse {
                    flags |= FLAG_REUSE;
                }
                if mode.replace {
                    flags |= FLAG_REPLACE;
                }
                payload.encode(&mut w);
            }
            Self::GetInfo(p) => p.encode(&mut w),
            Self::Delete(p) => p.request.encode(&mut w),
            Self::StatusAgent(p) => p.encode(&mut w),
            Self::Status(p) => p.encode(&mut w),
            Self::Info(p) => p.encode(&mut w),
            Self::WriteData(p) => {
                p.request.encode(&mut w);
                w.write_array(&p.data);
            }
            Self::ReadData(p) => p.encode(&mut w),
            Self::Data(p) => {
                p.request.encode(&mut w);
                w.write_array(&p.data);
            }
            Self::Acknack(p) => p.encode(&mut w),
            Self::Heartbeat(p) => p.encode(&mut w),
            Self::Reset => {}
            Self::Fragment { data, last } => {
                if *last {
                    flags |= FLAG_LAST_FRAGMENT;
                }
                w.write_array(data);
            }
            Self::Timestamp(t) => t.encode(&mut w),
            Self::TimestampReply(p) => p.encode(&mut w),
        }
        let payload = w.into_bytes();
        let length =
            u16::try_from(payload.len()).map_err(|_| XrceError::PayloadTooLarge(payload.len()))?;
        let hdr = SubmessageHeader {
            submessage_id: self.id(),
            flags,
            length,
        };
        let mut out = Vec::with_capacity(SUBMESSAGE_HEADER_SIZE + payload.len());
        hdr.write_to(&mut out);
        out.extend_from_slice(&payload);
        Ok(out)
    }
}

fn check_data_format(flags: u8) -> Result<(), XrceError> {
    match flags & FORMAT_MASK {
        FORMAT_DATA => Ok(()),
        other => Err(XrceError::InvalidData(format!(
            "unsupported data format 0x{:02x}",
            other
        ))),
    }
}

// ---------------------------------------------------------------------------
// Fragmentation helpers
// ---------------------------------------------------------------------------

/// Split a serialized submessage into FRAGMENT submessages whose payloads are
/// at most `max_chunk` bytes. The last one carries the last-fragment flag.
pub fn fragment_submessage(submessage: &[u8], max_chunk: usize) -> Result<Vec<Vec<u8>>, XrceError> {
    if max_chunk == 0 {
        return Err(XrceError::Fragment("max_chunk must be > 0".into()));
    }
    if submessage.is_empty() {
        return Err(XrceError::Fragment("empty submessage".into()));
    }
    let chunks: Vec<&[u8]> = submessage.chunks(max_chunk).collect();
    let count = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            Submessage::Fragment {
                data: chunk.to_vec(),
                last: i + 1 == count,
            }
            .encode()
        })
        .collect()
}
