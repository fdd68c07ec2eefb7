// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Submessage payload types and their XCDR encoding.

use super::cdr::{CdrReader, CdrWriter};
use super::{ClientKey, ObjectId, ObjectKind, StatusCode};
use crate::error::XrceError;
use crate::seq::SeqNum;

/// "XRCE" magic carried by client and agent representations.
pub const XRCE_COOKIE: [u8; 4] = *b"XRCE";
/// Protocol version 1.0.
pub const XRCE_VERSION: [u8; 2] = [0x01, 0x00];
/// Major version byte that must match for a client to be accepted.
pub const XRCE_VERSION_MAJOR: u8 = 0x01;
/// Vendor id the agent reports about itself.
pub const XRCE_VENDOR_ID: [u8; 2] = [0x0F, 0x0D];

// Representation formats
pub const REPRESENTATION_BY_REFERENCE: u8 = 0x01;
pub const REPRESENTATION_AS_XML_STRING: u8 = 0x02;
pub const REPRESENTATION_IN_BINARY: u8 = 0x03;

/// Read specification value meaning "unlimited samples".
pub const MAX_SAMPLES_UNLIMITED: u16 = 0xFFFF;
/// Read specification value meaning "no time limit".
pub const MAX_ELAPSED_TIME_UNLIMITED: u16 = 0;
/// Read specification value meaning "no rate limit".
pub const MAX_BYTES_PER_SECOND_UNLIMITED: u16 = 0;

// ---------------------------------------------------------------------------
// Common building blocks
// ---------------------------------------------------------------------------

/// Request id + object id prefixing most object operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BaseObjectRequest {
    pub request_id: u16,
    pub object_id: ObjectId,
}

impl BaseObjectRequest {
    pub(crate) fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        let request_id = u16::from_be_bytes(r.read_array::<2>()?);
        let object_id = ObjectId::from_bytes(r.read_array::<2>()?);
        Ok(Self {
            request_id,
            object_id,
        })
    }

    pub(crate) fn encode(&self, w: &mut CdrWriter) {
        w.write_array(&self.request_id.to_be_bytes());
        w.write_array(&self.object_id.to_bytes());
    }
}

/// Outcome of an operation as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultStatus {
    pub status: StatusCode,
    pub implementation_status: u8,
}

impl ResultStatus {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            implementation_status: 0,
        }
    }

    fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        Ok(Self {
            status: StatusCode::from_u8(r.read_u8()?)?,
            implementation_status: r.read_u8()?,
        })
    }

    fn encode(&self, w: &mut CdrWriter) {
        w.write_u8(self.status.as_u8());
        w.write_u8(self.implementation_status);
    }
}

/// Reply header: which request this answers and how it went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseObjectReply {
    pub related_request: BaseObjectRequest,
    pub result: ResultStatus,
}

impl BaseObjectReply {
    fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        Ok(Self {
            related_request: BaseObjectRequest::decode(r)?,
            result: ResultStatus::decode(r)?,
        })
    }

    fn encode(&self, w: &mut CdrWriter) {
        self.related_request.encode(w);
        self.result.encode(w);
    }
}

/// Name/value pair attached to client or agent representations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub value: String,
}

fn decode_properties(r: &mut CdrReader<'_>) -> Result<Option<Vec<Property>>, XrceError> {
    if !r.read_bool()? {
        return Ok(None);
    }
    let count = r.read_u32()? as usize;
    // Each property needs at least two length words.
    if count > r.remaining() / 8 {
        return Err(XrceError::BufferTooShort);
    }
    let mut props = Vec::with_capacity(count);
    for _ in 0..count {
        let name = r.read_string()?;
        let value = r.read_string()?;
        props.push(Property { name, value });
    }
    Ok(Some(props))
}

fn encode_properties(w: &mut CdrWriter, props: &Option<Vec<Property>>) {
    match props {
        Some(list) => {
            w.write_bool(true);
            w.write_u32(list.len() as u32);
            for p in list {
                w.write_string(&p.name);
                w.write_string(&p.value);
            }
        }
        None => w.write_bool(false),
    }
}

// ---------------------------------------------------------------------------
// CREATE_CLIENT / STATUS_AGENT
// ---------------------------------------------------------------------------

/// CREATE_CLIENT payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRepresentation {
    pub xrce_cookie: [u8; 4],
    pub xrce_version: [u8; 2],
    pub xrce_vendor_id: [u8; 2],
    pub client_key: ClientKey,
    pub session_id: u8,
    pub properties: Option<Vec<Property>>,
    pub mtu: u16,
}

impl ClientRepresentation {
    pub(crate) fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        let xrce_cookie = r.read_array::<4>()?;
        let xrce_version = r.read_array::<2>()?;
        let xrce_vendor_id = r.read_array::<2>()?;
        let client_key = ClientKey::from_bytes(r.read_array::<4>()?);
        let session_id = r.read_u8()?;
        let properties = decode_properties(r)?;
        let mtu = r.read_u16()?;
        Ok(Self {
            xrce_cookie,
            xrce_version,
            xrce_vendor_id,
            client_key,
            session_id,
            properties,
            mtu,
        })
    }

    pub(crate) fn encode(&self, w: &mut CdrWriter) {
        w.write_array(&self.xrce_cookie);
        w.write_array(&self.xrce_version);
        w.write_array(&self.xrce_vendor_id);
        w.write_array(&self.client_key.to_bytes());
        w.write_u8(self.session_id);
        encode_properties(w, &self.properties);
        w.write_u16(self.mtu);
    }
}

/// What the agent reports about itself (STATUS_AGENT, INFO).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRepresentation {
    pub xrce_cookie: [u8; 4],
    pub xrce_version: [u8; 2],
    pub xrce_vendor_id: [u8; 2],
    pub properties: Option<Vec<Property>>,
}

impl Default for AgentRepresentation {
    fn default() -> Self {
        Self {
            xrce_cookie: XRCE_COOKIE,
            xrce_version: XRCE_VERSION,
            xrce_vendor_id: XRCE_VENDOR_ID,
            properties: None,
        }
    }
}

impl AgentRepresentation {
    fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        Ok(Self {
            xrce_cookie: r.read_array::<4>()?,
            xrce_version: r.read_array::<2>()?,
            xrce_vendor_id: r.read_array::<2>()?,
            properties: decode_properties(r)?,
        })
    }

    fn encode(&self, w: &mut CdrWriter) {
        w.write_array(&self.xrce_cookie);
        w.write_array(&self.xrce_version);
        w.write_array(&self.xrce_vendor_id);
        encode_properties(w, &self.properties);
    }
}

/// STATUS_AGENT payload (reply to CREATE_CLIENT).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusAgentPayload {
    pub result: ResultStatus,
    pub agent: AgentRepresentation,
}

impl StatusAgentPayload {
    pub(crate) fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        Ok(Self {
            result: ResultStatus::decode(r)?,
            agent: AgentRepresentation::decode(r)?,
        })
    }

    pub(crate) fn encode(&self, w: &mut CdrWriter) {
        self.result.encode(w);
        self.agent.encode(w);
    }
}

// ---------------------------------------------------------------------------
// CREATE
// ---------------------------------------------------------------------------

/// How an object is described to the middleware.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Representation {
    /// Name of a profile known to the middleware.
    ByReference(String),
    /// Full XML description.
    AsXml(String),
    /// Binary (XCDR) description.
    InBinary(Vec<u8>),
}

impl Representation {
    fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        match r.read_u8()? {
            REPRESENTATION_BY_REFERENCE => Ok(Self::ByReference(r.read_string()?)),
            REPRESENTATION_AS_XML_STRING => Ok(Self::AsXml(r.read_string()?)),
            REPRESENTATION_IN_BINARY => Ok(Self::InBinary(r.read_sequence()?)),
            other => Err(XrceError::UnknownRepresentation(other)),
        }
    }

    fn encode(&self, w: &mut CdrWriter) {
        match self {
            Self::ByReference(s) => {
                w.write_u8(REPRESENTATION_BY_REFERENCE);
                w.write_string(s);
            }
            Self::AsXml(s) => {
                w.write_u8(REPRESENTATION_AS_XML_STRING);
                w.write_string(s);
            }
            Self::InBinary(b) => {
                w.write_u8(REPRESENTATION_IN_BINARY);
                w.write_sequence(b);
            }
        }
    }

    /// Name of the topic (or service) this representation refers to.
    ///
    /// References are names themselves. XML carries it in the `<name>` of the
    /// `<topic>` element; binary descriptions start with it as a CDR string.
    pub fn topic_name(&self) -> Option<String> {
        match self {
            Self::ByReference(name) => Some(name.clone()),
            Self::AsXml(xml) => xml_element(xml, "name"),
            Self::InBinary(bin) => CdrReader::new(bin, true).read_string().ok(),
        }
    }

    /// Second name carried by topic descriptions (the type name).
    pub fn type_name(&self) -> Option<String> {
        match self {
            Self::ByReference(_) => None,
            Self::AsXml(xml) => xml_element(xml, "dataType"),
            Self::InBinary(bin) => {
                let mut r = CdrReader::new(bin, true);
                r.read_string().ok()?;
                r.read_string().ok()
            }
        }
    }
}

/// Text of the `tag` child of the first `<topic>` element, or of the first
/// `tag` element anywhere when the description has no topic element.
fn xml_element(xml: &str, tag: &str) -> Option<String> {
    let doc = roxmltree::Document::parse(xml).ok()?;
    let scope = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "topic");
    let node = match scope {
        Some(topic) => topic
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == tag)?,
        None => doc
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == tag)?,
    };
    let text: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Per-kind object description carried by CREATE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectVariant {
    Participant {
        domain_id: i16,
        representation: Representation,
    },
    Topic {
        participant_id: ObjectId,
        representation: Representation,
    },
    Publisher {
        participant_id: ObjectId,
        representation: Representation,
    },
    Subscriber {
        participant_id: ObjectId,
        representation: Representation,
    },
    DataWriter {
        publisher_id: ObjectId,
        representation: Representation,
    },
    DataReader {
        subscriber_id: ObjectId,
        representation: Representation,
    },
    Requester {
        participant_id: ObjectId,
        representation: Representation,
    },
    Replier {
        participant_id: ObjectId,
        representation: Representation,
    },
}

impl ObjectVariant {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Participant { .. } => ObjectKind::Participant,
            Self::Topic { .. } => ObjectKind::Topic,
            Self::Publisher { .. } => ObjectKind::Publisher,
            Self::Subscriber { .. } => ObjectKind::Subscriber,
            Self::DataWriter { .. } => ObjectKind::DataWriter,
            Self::DataReader { .. } => ObjectKind::DataReader,
            Self::Requester { .. } => ObjectKind::Requester,
            Self::Replier { .. } => ObjectKind::Replier,
        }
    }

    pub fn representation(&self) -> &Representation {
        match self {
            Self::Participant { representation, .. }
            | Self::Topic { representation, .. }
            | Self::Publisher { representation, .. }
            | Self::Subscriber { representation, .. }
            | Self::DataWriter { representation, .. }
            | Self::DataReader { representation, .. }
            | Self::Requester { representation, .. }
            | Self::Replier { representation, .. } => representation,
        }
    }

    /// Object this one is created under, if any.
    pub fn parent_id(&self) -> Option<ObjectId> {
        match self {
            Self::Participant { .. } => None,
            Self::Topic { participant_id, .. }
            | Self::Publisher { participant_id, .. }
            | Self::Subscriber { participant_id, .. }
            | Self::Requester { participant_id, .. }
            | Self::Replier { participant_id, .. } => Some(*participant_id),
            Self::DataWriter { publisher_id, .. } => Some(*publisher_id),
            Self::DataReader { subscriber_id, .. } => Some(*subscriber_id),
        }
    }

    pub(crate) fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        let kind = ObjectKind::from_nibble(r.read_u8()?)?;
        let representation = Representation::decode(r)?;
        let variant = match kind {
            ObjectKind::Participant => Self::Participant {
                representation,
                domain_id: r.read_i16()?,
            },
            ObjectKind::Topic => Self::Topic {
                representation,
                participant_id: ObjectId::from_bytes(r.read_array::<2>()?),
            },
            ObjectKind::Publisher => Self::Publisher {
                representation,
                participant_id: ObjectId::from_bytes(r.read_array::<2>()?),
            },
            ObjectKind::Subscriber => Self::Subscriber {
                representation,
                participant_id: ObjectId::from_bytes(r.read_array::<2>()?),
            },
            ObjectKind::DataWriter => Self::DataWriter {
                representation,
                publisher_id: ObjectId::from_bytes(r.read_array::<2>()?),
            },
            ObjectKind::DataReader => Self::DataReader {
                representation,
                subscriber_id: ObjectId::from_bytes(r.read_array::<2>()?),
            },
            ObjectKind::Requester => Self::Requester {
                representation,
                participant_id: ObjectId::from_bytes(r.read_array::<2>()?),
            },
            ObjectKind::Replier => Self::Replier {
                representation,
                participant_id: ObjectId::from_bytes(r.read_array::<2>()?),
            },
            other => {
                return Err(XrceError::InvalidData(format!(
                    "objects of kind {:?} cannot be created",
                    other
                )))
            }
        };
        Ok(variant)
    }

    pub(crate) fn encode(&self, w: &mut CdrWriter) {
        w.write_u8(self.kind().as_u8());
        self.representation().encode(w);
        match self {
            Self::Participant { domain_id, .. } => w.write_i16(*domain_id),
            _ => {
                if let Some(parent) = self.parent_id() {
                    w.write_array(&parent.to_bytes());
                }
            }
        }
    }
}

/// Reuse / replace flags of a CREATE submessage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreationMode {
    pub reuse: bool,
    pub replace: bool,
}

/// CREATE payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePayload {
    pub request: BaseObjectRequest,
    pub variant: ObjectVariant,
}

impl CreatePayload {
    pub(crate) fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        Ok(Self {
            request: BaseObjectRequest::decode(r)?,
            variant: ObjectVariant::decode(r)?,
        })
    }

    pub(crate) fn encode(&self, w: &mut CdrWriter) {
        self.request.encode(w);
        self.variant.encode(w);
    }
}

// ---------------------------------------------------------------------------
// GET_INFO / INFO
// ---------------------------------------------------------------------------

/// GET_INFO payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetInfoPayload {
    pub request: BaseObjectRequest,
    pub info_mask: u32,
}

impl GetInfoPayload {
    pub(crate) fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        Ok(Self {
            request: BaseObjectRequest::decode(r)?,
            info_mask: r.read_u32()?,
        })
    }

    pub(crate) fn encode(&self, w: &mut CdrWriter) {
        self.request.encode(w);
        w.write_u32(self.info_mask);
    }
}

/// INFO payload. Activity information is never reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoPayload {
    pub reply: BaseObjectReply,
    pub config: Option<AgentRepresentation>,
}

impl InfoPayload {
    pub(crate) fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        let reply = BaseObjectReply::decode(r)?;
        let config = if r.read_bool()? {
            Some(AgentRepresentation::decode(r)?)
        } else {
            None
        };
        // Optional activity; present activity info is not interpreted.
        let _has_activity = r.read_bool().unwrap_or(false);
        Ok(Self { reply, config })
    }

    pub(crate) fn encode(&self, w: &mut CdrWriter) {
        self.reply.encode(w);
        match &self.config {
            Some(agent) => {
                w.write_bool(true);
                agent.encode(w);
            }
            None => w.write_bool(false),
        }
        w.write_bool(false);
    }
}

// ---------------------------------------------------------------------------
// DELETE / STATUS
// ---------------------------------------------------------------------------

/// DELETE payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletePayload {
    pub request: BaseObjectRequest,
}

/// STATUS payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPayload {
    pub reply: BaseObjectReply,
}

impl StatusPayload {
    pub(crate) fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        Ok(Self {
            reply: BaseObjectReply::decode(r)?,
        })
    }

    pub(crate) fn encode(&self, w: &mut CdrWriter) {
        self.reply.encode(w);
    }
}

// ---------------------------------------------------------------------------
// WRITE_DATA / READ_DATA / DATA
// ---------------------------------------------------------------------------

/// WRITE_DATA payload (FORMAT_DATA: one raw serialized sample).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteDataPayload {
    pub request: BaseObjectRequest,
    pub data: Vec<u8>,
}

/// Limits on an asynchronous read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryControl {
    /// Samples to deliver; [`MAX_SAMPLES_UNLIMITED`] for no limit.
    pub max_samples: u16,
    /// Milliseconds before the read ends; 0 for no limit.
    pub max_elapsed_time: u16,
    /// Delivery rate cap; 0 for no limit.
    pub max_bytes_per_second: u16,
    /// Minimum milliseconds between two deliveries.
    pub min_pace_period: u16,
}

impl Default for DeliveryControl {
    /// A read without delivery control returns a single sample.
    fn default() -> Self {
        Self {
            max_samples: 1,
            max_elapsed_time: MAX_ELAPSED_TIME_UNLIMITED,
            max_bytes_per_second: MAX_BYTES_PER_SECOND_UNLIMITED,
            min_pace_period: 0,
        }
    }
}

impl DeliveryControl {
    fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        Ok(Self {
            max_samples: r.read_u16()?,
            max_elapsed_time: r.read_u16()?,
            max_bytes_per_second: r.read_u16()?,
            min_pace_period: r.read_u16()?,
        })
    }

    fn encode(&self, w: &mut CdrWriter) {
        w.write_u16(self.max_samples);
        w.write_u16(self.max_elapsed_time);
        w.write_u16(self.max_bytes_per_second);
        w.write_u16(self.min_pace_period);
    }
}

/// What to read and where to deliver it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSpecification {
    pub preferred_stream_id: u8,
    pub data_format: u8,
    pub content_filter_expression: Option<String>,
    pub delivery_control: Option<DeliveryControl>,
}

impl ReadSpecification {
    fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        let preferred_stream_id = r.read_u8()?;
        let data_format = r.read_u8()?;
        let content_filter_expression = if r.read_bool()? {
            Some(r.read_string()?)
        } else {
            None
        };
        let delivery_control = if r.read_bool()? {
            Some(DeliveryControl::decode(r)?)
        } else {
            None
        };
        Ok(Self {
            preferred_stream_id,
            data_format,
            content_filter_expression,
            delivery_control,
        })
    }

    fn encode(&self, w: &mut CdrWriter) {
        w.write_u8(self.preferred_stream_id);
        w.write_u8(self.data_format);
        match &self.content_filter_expression {
            Some(expr) => {
                w.write_bool(true);
                w.write_string(expr);
            }
            None => w.write_bool(false),
        }
        match &self.delivery_control {
            Some(dc) => {
                w.write_bool(true);
                dc.encode(w);
            }
            None => w.write_bool(false),
        }
    }
}

/// READ_DATA payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadDataPayload {
    pub request: BaseObjectRequest,
    pub read_spec: ReadSpecification,
}

impl ReadDataPayload {
    pub(crate) fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        Ok(Self {
            request: BaseObjectRequest::decode(r)?,
            read_spec: ReadSpecification::decode(r)?,
        })
    }

    pub(crate) fn encode(&self, w: &mut CdrWriter) {
        self.request.encode(w);
        self.read_spec.encode(w);
    }
}

/// DATA payload (agent -> client, FORMAT_DATA).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPayload {
    pub request: BaseObjectRequest,
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Reliability control
// ---------------------------------------------------------------------------

/// HEARTBEAT payload: range of messages the sender still holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPayload {
    pub first_unacked: SeqNum,
    pub last_unacked: SeqNum,
    pub stream_id: u8,
}

impl HeartbeatPayload {
    pub(crate) fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        Ok(Self {
            first_unacked: SeqNum::new(r.read_u16()?),
            last_unacked: SeqNum::new(r.read_u16()?),
            stream_id: r.read_u8()?,
        })
    }

    pub(crate) fn encode(&self, w: &mut CdrWriter) {
        w.write_u16(self.first_unacked.get());
        w.write_u16(self.last_unacked.get());
        w.write_u8(self.stream_id);
    }
}

/// ACKNACK payload. Bit `i` of `nack_bitmap` requests `first_unacked + i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcknackPayload {
    pub first_unacked: SeqNum,
    pub nack_bitmap: u16,
    pub stream_id: u8,
}

impl AcknackPayload {
    pub(crate) fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        let first_unacked = SeqNum::new(r.read_u16()?);
        // Bitmap travels as two octets, most significant first.
        let nack_bitmap = u16::from_be_bytes(r.read_array::<2>()?);
        Ok(Self {
            first_unacked,
            nack_bitmap,
            stream_id: r.read_u8()?,
        })
    }

    pub(crate) fn encode(&self, w: &mut CdrWriter) {
        w.write_u16(self.first_unacked.get());
        w.write_array(&self.nack_bitmap.to_be_bytes());
        w.write_u8(self.stream_id);
    }
}

// ---------------------------------------------------------------------------
// Time synchronisation
// ---------------------------------------------------------------------------

/// XRCE time value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Time {
    pub seconds: i32,
    pub nanoseconds: u32,
}

impl Time {
    /// Current wall-clock time since the Unix epoch.
    pub fn now() -> Self {
        let since = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: since.as_secs() as i32,
            nanoseconds: since.subsec_nanos(),
        }
    }

    pub(crate) fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        Ok(Self {
            seconds: r.read_i32()?,
            nanoseconds: r.read_u32()?,
        })
    }

    pub(crate) fn encode(&self, w: &mut CdrWriter) {
        w.write_i32(self.seconds);
        w.write_u32(self.nanoseconds);
    }
}

/// TIMESTAMP_REPLY payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampReplyPayload {
    pub transmit: Time,
    pub receive: Time,
    pub originate: Time,
}

impl TimestampReplyPayload {
    pub(crate) fn decode(r: &mut CdrReader<'_>) -> Result<Self, XrceError> {
        Ok(Self {
            transmit: Time::decode(r)?,
            receive: Time::decode(r)?,
            originate: Time::decode(r)?,
        })
    }

    pub(crate) fn encode(&self, w: &mut CdrWriter) {
        self.transmit.encode(w);
        self.receive.encode(w);
        self.originate.encode(w);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_name_from_each_representation() {
        let by_ref = Representation::ByReference("Square".into());
        assert_eq!(by_ref.topic_name().as_deref(), Some("Square"));

        let xml = Representation::AsXml(
            "<dds><topic><name>HelloWorldTopic</name><dataType>HelloWorld</dataType></topic></dds>"
                .into(),
        );
        assert_eq!(xml.topic_name().as_deref(), Some("HelloWorldTopic"));
        assert_eq!(xml.type_name().as_deref(), Some("HelloWorld"));

        let mut w = CdrWriter::new();
        w.write_string("Temperature");
        w.write_string("SensorReading");
        let bin = Representation::InBinary(w.into_bytes());
        assert_eq!(bin.topic_name().as_deref(), Some("Temperature"));
        assert_eq!(bin.type_name().as_deref(), Some("SensorReading"));
    }

    #[test]
    fn test_xml_names_ignore_comments_and_decode_entities() {
        let xml = Representation::AsXml(
            "<dds><!-- was <name>Old</name> --><topic><name>Temp &amp; Humidity</name>\
             <dataType><![CDATA[Env<T>]]></dataType></topic></dds>"
                .into(),
        );
        assert_eq!(xml.topic_name().as_deref(), Some("Temp & Humidity"));
        assert_eq!(xml.type_name().as_deref(), Some("Env<T>"));

        // A <name> outside the topic element does not count.
        let nested = Representation::AsXml(
            "<dds><participant><name>P</name></participant>\
             <topic name=\"x\"><name>Temperature</name></topic></dds>"
                .into(),
        );
        assert_eq!(nested.topic_name().as_deref(), Some("Temperature"));
        assert_eq!(nested.type_name(), None);

        let broken = Representation::AsXml("<dds><topic><name>T</topic>".into());
        assert_eq!(broken.topic_name(), None);
    }

    #[test]
    fn test_client_representation_layout() {
        let client = ClientRepresentation {
            xrce_cookie: XRCE_COOKIE,
            xrce_version: XRCE_VERSION,
            xrce_vendor_id: [0x01, 0x0F],
            client_key: ClientKey(0xAABBCCDD),
            session_id: 0x81,
            properties: None,
            mtu: 512,
        };
        let mut w = CdrWriter::new();
        client.encode(&mut w);
        let bytes = w.into_bytes();
        // cookie(4) version(2) vendor(2) key(4) session(1) bool(1) mtu(2)
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..4], b"XRCE");
        assert_eq!(&bytes[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(&bytes[14..16], &512u16.to_le_bytes());
    }

    #[test]
    fn test_acknack_bitmap_byte_order() {
        let ack = AcknackPayload {
            first_unacked: SeqNum::new(7),
            nack_bitmap: 0x0102,
            stream_id: 0x80,
        };
        let mut w = CdrWriter::new();
        ack.encode(&mut w);
        assert_eq!(w.into_bytes(), vec![7, 0, 0x01, 0x02, 0x80]);
    }

    #[test]
    fn test_default_delivery_control_is_single_sample() {
        let dc = DeliveryControl::default();
        assert_eq!(dc.max_samples, 1);
        assert_eq!(dc.max_elapsed_time, MAX_ELAPSED_TIME_UNLIMITED);
    }
}
