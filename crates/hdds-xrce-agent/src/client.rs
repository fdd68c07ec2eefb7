// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Per-client state: the session streams and the object graph.
//
// All object graph mutation happens under the `objects` mutex. Creation
// resolves every parent before touching the map, so a rejected request
// leaves the graph as it was.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::middleware::{EntityId, Middleware};
use crate::object::{ObjectReader, ObjectVariant, Representation, XrceObject};
use crate::protocol::{ClientKey, MessageHeader, ObjectId, ObjectKind, StatusCode};
use crate::seq::SeqNum;
use crate::session::{Session, StreamId};
use crate::transport::Endpoint;

pub use crate::protocol::CreationMode;

/// Snapshot of one object, detached from the client lock.
#[derive(Clone)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub entity_id: EntityId,
    pub reader: Option<Arc<ObjectReader>>,
}

impl fmt::Debug for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectInfo")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("entity_id", &self.entity_id)
            .field("has_reader", &self.reader.is_some())
            .finish()
    }
}

/// Agent-side proxy of one connected XRCE client.
pub struct ProxyClient {
    key: ClientKey,
    session_id: u8,
    mtu: u16,
    session: Session,
    objects: Mutex<BTreeMap<ObjectId, XrceObject>>,
    middleware: Arc<dyn Middleware>,
    endpoint: Mutex<Option<Endpoint>>,
    poll_ceiling: Duration,
}

impl fmt::Debug for ProxyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyClient")
            .field("key", &self.key)
            .field("session_id", &self.session_id)
            .field("objects", &self.objects.lock().len())
            .finish_non_exhaustive()
    }
}

impl ProxyClient {
    pub fn new(
        key: ClientKey,
        session_id: u8,
        mtu: u16,
        middleware: Arc<dyn Middleware>,
        poll_ceiling: Duration,
    ) -> Self {
        Self {
            key,
            session_id,
            mtu,
            session: Session::new(),
            objects: Mutex::new(BTreeMap::new()),
            middleware,
            endpoint: Mutex::new(None),
            poll_ceiling,
        }
    }

    pub fn key(&self) -> ClientKey {
        self.key
    }

    pub fn session_id(&self) -> u8 {
        self.session_id
    }

    /// MTU announced in CREATE_CLIENT (0 if unknown).
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn middleware(&self) -> &Arc<dyn Middleware> {
        &self.middleware
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint.lock().clone()
    }

    pub fn set_endpoint(&self, endpoint: Endpoint) {
        *self.endpoint.lock() = Some(endpoint);
    }

    /// Header for a message this agent sends on `stream_id`.
    pub fn output_header(&self, stream_id: StreamId, seq: SeqNum) -> MessageHeader {
        MessageHeader::new(self.session_id, stream_id.0, seq, self.key)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    // -- object graph -------------------------------------------------------

    /// Create `object_id` from `variant` following the reuse / replace flags.
    pub fn create(&self, mode: CreationMode, object_id: ObjectId, variant: &ObjectVariant) -> StatusCode {
        if !object_id.is_kind(variant.kind()) {
            log::debug!(
                "[XRCE] client {}: object id {} does not encode a {:?}",
                self.key,
                object_id,
                variant.kind()
            );
            return StatusCode::ErrInvalidData;
        }

        let mut objects = self.objects.lock();
        let parents = match resolve_parents(&objects, variant) {
            Ok(p) => p,
            Err(status) => return status,
        };

        let exists = objects.contains_key(&object_id);
        if exists {
            match (mode.reuse, mode.replace) {
                (false, false) => return StatusCode::ErrAlreadyExists,
                (true, replace) => {
                    let matched = objects
                        .get(&object_id)
                        .is_some_and(|o| o.matches(self.middleware.as_ref(), variant));
                    if matched {
                        return StatusCode::OkMatched;
                    }
                    if !replace {
                        return StatusCode::ErrMismatch;
                    }
                }
                (false, true) => {}
            }
            self.erase(&mut objects, object_id);
        }

        self.insert_new(&mut objects, object_id, variant, parents)
    }

    /// Delete `object_id` and everything tied to it.
    pub fn delete(&self, object_id: ObjectId) -> StatusCode {
        let mut objects = self.objects.lock();
        if !objects.contains_key(&object_id) {
            return StatusCode::ErrUnknownReference;
        }
        self.erase(&mut objects, object_id);
        StatusCode::Ok
    }

    pub fn get_object(&self, object_id: ObjectId) -> Option<ObjectInfo> {
        self.objects.lock().get(&object_id).map(|o| ObjectInfo {
            id: o.id(),
            kind: o.kind(),
            entity_id: o.entity_id(),
            reader: o.reader().cloned(),
        })
    }

    /// Forward a sample written by the client.
    pub fn write(&self, object_id: ObjectId, data: &[u8]) -> StatusCode {
        let Some(info) = self.get_object(object_id) else {
            return StatusCode::ErrUnknownReference;
        };
        let written = match info.kind {
            ObjectKind::DataWriter => self.middleware.write_data(info.entity_id, data),
            ObjectKind::Requester => self.middleware.write_request(info.entity_id, data),
            ObjectKind::Replier => self.middleware.write_reply(info.entity_id, data),
            _ => return StatusCode::ErrInvalidData,
        };
        if written {
            StatusCode::Ok
        } else {
            StatusCode::ErrDdsError
        }
    }

    /// Release every object. Used on client deletion and shutdown.
    pub fn release_all(&self) {
        let mut objects = self.objects.lock();
        loop {
            let Some(id) = objects.keys().next().copied() else {
                break;
            };
            self.erase(&mut objects, id);
        }
    }

    fn insert_new(
        &self,
        objects: &mut BTreeMap<ObjectId, XrceObject>,
        object_id: ObjectId,
        variant: &ObjectVariant,
        parents: Vec<ObjectId>,
    ) -> StatusCode {
        let created = XrceObject::create(
            self.middleware.as_ref(),
            self.key,
            object_id,
            variant.clone(),
            parents,
            self.poll_ceiling,
        );
        let Some(object) = created else {
            log::debug!("[XRCE] client {}: middleware refused {}", self.key, object_id);
            return StatusCode::ErrUnknownReference;
        };
        for parent in object.parents() {
            if let Some(p) = objects.get_mut(parent) {
                p.tie(object_id);
            }
        }
        objects.insert(object_id, object);
        StatusCode::Ok
    }

    /// Remove `root` and its tied descendants, children first.
    fn erase(&self, objects: &mut BTreeMap<ObjectId, XrceObject>, root: ObjectId) {
        let mut order = Vec::new();
        collect_post_order(objects, root, &mut order);
        for id in order {
            let Some(object) = objects.remove(&id) else {
                continue;
            };
            object.release(self.middleware.as_ref());
            for parent in object.parents() {
                if let Some(p) = objects.get_mut(parent) {
                    p.untie(id);
                }
            }
        }
    }
}

fn collect_post_order(objects: &BTreeMap<ObjectId, XrceObject>, id: ObjectId, out: &mut Vec<ObjectId>) {
    if out.contains(&id) {
        return;
    }
    if let Some(object) = objects.get(&id) {
        for child in object.tied() {
            collect_post_order(objects, *child, out);
        }
        out.push(id);
    }
}

fn require(
    objects: &BTreeMap<ObjectId, XrceObject>,
    id: ObjectId,
    kind: ObjectKind,
) -> Result<&XrceObject, StatusCode> {
    match objects.get(&id) {
        Some(o) if o.kind() == kind => Ok(o),
        _ => Err(StatusCode::ErrUnknownReference),
    }
}

/// Topic named by a writer/reader description, under `participant`.
///
/// References are resolved by the middleware, so they need no local topic.
fn find_topic(
    objects: &BTreeMap<ObjectId, XrceObject>,
    participant: Option<ObjectId>,
    representation: &Representation,
) -> Result<Option<ObjectId>, StatusCode> {
    if matches!(representation, Representation::ByReference(_)) {
        return Ok(None);
    }
    let name = representation.topic_name().ok_or(StatusCode::ErrInvalidData)?;
    objects
        .values()
        .find(|o| {
            o.kind() == ObjectKind::Topic
                && o.variant().parent_id() == participant
                && o.variant().representation().topic_name().as_deref() == Some(name.as_str())
        })
        .map(|o| Some(o.id()))
        .ok_or(StatusCode::ErrUnknownReference)
}

/// Objects `variant` will be tied to, direct parent first.
fn resolve_parents(
    objects: &BTreeMap<ObjectId, XrceObject>,
    variant: &ObjectVariant,
) -> Result<Vec<ObjectId>, StatusCode> {
    match variant {
        ObjectVariant::Participant { .. } => Ok(Vec::new()),
        ObjectVariant::Topic { participant_id, .. }
        | ObjectVariant::Publisher { participant_id, .. }
        | ObjectVariant::Subscriber { participant_id, .. }
        | ObjectVariant::Requester { participant_id, .. }
        | ObjectVariant::Replier { participant_id, .. } => {
            require(objects, *participant_id, ObjectKind::Participant)?;
            Ok(vec![*participant_id])
        }
        ObjectVariant::DataWriter {
            publisher_id: group_id,
            representation,
        } => {
            let group = require(objects, *group_id, ObjectKind::Publisher)?;
            let topic = find_topic(objects, group.variant().parent_id(), representation)?;
            Ok(std::iter::once(*group_id).chain(topic).collect())
        }
        ObjectVariant::DataReader {
            subscriber_id: group_id,
            representation,
        } => {
            let group = require(objects, *group_id, ObjectKind::Subscriber)?;
            let topic = find_topic(objects, group.variant().parent_id(), representation)?;
            Ok(std::iter::once(*group_id).chain(topic).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{entity_id, InMemoryMiddleware};

    const PARTICIPANT: ObjectId = ObjectId::from_raw(0x0011);
    const TOPIC: ObjectId = ObjectId::from_raw(0x0012);
    const PUBLISHER: ObjectId = ObjectId::from_raw(0x0013);
    const SUBSCRIBER: ObjectId = ObjectId::from_raw(0x0014);
    const WRITER: ObjectId = ObjectId::from_raw(0x0015);
    const READER: ObjectId = ObjectId::from_raw(0x0016);

    fn client() -> (ProxyClient, Arc<InMemoryMiddleware>) {
        let mw = Arc::new(InMemoryMiddleware::new());
        let c = ProxyClient::new(
            ClientKey(0xAABBCCDD),
            0x01,
            512,
            mw.clone(),
            Duration::from_millis(10),
        );
        (c, mw)
    }

    fn participant(domain_id: i16) -> ObjectVariant {
        ObjectVariant::Participant {
            domain_id,
            representation: Representation::ByReference("default_participant".into()),
        }
    }

    fn xml_topic(name: &str) -> Representation {
        Representation::AsXml(format!(
            "<dds><topic><name>{}</name><dataType>T</dataType></topic></dds>",
            name
        ))
    }

    fn mode(reuse: bool, replace: bool) -> CreationMode {
        CreationMode { reuse, replace }
    }

    /// Participant + topic "Square" + publisher + subscriber.
    fn build_tree(c: &ProxyClient) {
        assert_eq!(c.create(mode(false, false), PARTICIPANT, &participant(0)), StatusCode::Ok);
        let topic = ObjectVariant::Topic {
            participant_id: PARTICIPANT,
            representation: xml_topic("Square"),
        };
        assert_eq!(c.create(mode(false, false), TOPIC, &topic), StatusCode::Ok);
        let publisher = ObjectVariant::Publisher {
            participant_id: PARTICIPANT,
            representation: Representation::AsXml(String::new()),
        };
        assert_eq!(c.create(mode(false, false), PUBLISHER, &publisher), StatusCode::Ok);
        let subscriber = ObjectVariant::Subscriber {
            participant_id: PARTICIPANT,
            representation: Representation::AsXml(String::new()),
        };
        assert_eq!(c.create(mode(false, false), SUBSCRIBER, &subscriber), StatusCode::Ok);
    }

    #[test]
    fn test_creation_matrix() {
        let (c, _mw) = client();
        let p0 = participant(0);
        let p7 = participant(7);

        assert_eq!(c.create(mode(false, false), PARTICIPANT, &p0), StatusCode::Ok);
        assert_eq!(c.create(mode(false, false), PARTICIPANT, &p0), StatusCode::ErrAlreadyExists);
        assert_eq!(c.create(mode(true, false), PARTICIPANT, &p0), StatusCode::OkMatched);
        assert_eq!(c.create(mode(true, false), PARTICIPANT, &p7), StatusCode::ErrMismatch);
        assert_eq!(c.create(mode(true, true), PARTICIPANT, &p0), StatusCode::OkMatched);
        assert_eq!(c.create(mode(true, true), PARTICIPANT, &p7), StatusCode::Ok);
        // Now domain 7 matches and domain 0 does not.
        assert_eq!(c.create(mode(true, false), PARTICIPANT, &p7), StatusCode::OkMatched);
        assert_eq!(c.create(mode(false, true), PARTICIPANT, &p0), StatusCode::Ok);
        assert_eq!(c.create(mode(true, false), PARTICIPANT, &p0), StatusCode::OkMatched);
        assert_eq!(c.object_count(), 1);
    }

    #[test]
    fn test_reuse_without_replace_never_mutates() {
        let (c, mw) = client();
        build_tree(&c);
        let before = mw.entity_count();
        assert_eq!(c.create(mode(true, false), PARTICIPANT, &participant(3)), StatusCode::ErrMismatch);
        assert_eq!(c.object_count(), 4);
        assert_eq!(mw.entity_count(), before);
        assert_eq!(c.get_object(TOPIC).map(|o| o.kind), Some(ObjectKind::Topic));
    }

    #[test]
    fn test_kind_and_parent_checks() {
        let (c, mw) = client();
        // Id nibble says topic, variant says participant.
        assert_eq!(c.create(mode(false, false), TOPIC, &participant(0)), StatusCode::ErrInvalidData);

        let orphan = ObjectVariant::Topic {
            participant_id: PARTICIPANT,
            representation: xml_topic("Square"),
        };
        assert_eq!(c.create(mode(false, false), TOPIC, &orphan), StatusCode::ErrUnknownReference);

        build_tree(&c);
        // Writer under a subscriber id.
        let bad_parent = ObjectVariant::DataWriter {
            publisher_id: SUBSCRIBER,
            representation: xml_topic("Square"),
        };
        assert_eq!(c.create(mode(false, false), WRITER, &bad_parent), StatusCode::ErrUnknownReference);
        // Writer for a topic nobody created.
        let no_topic = ObjectVariant::DataWriter {
            publisher_id: PUBLISHER,
            representation: xml_topic("Circle"),
        };
        assert_eq!(c.create(mode(false, false), WRITER, &no_topic), StatusCode::ErrUnknownReference);
        assert_eq!(c.object_count(), 4);
        assert_eq!(mw.entity_count(), 4);
    }

    #[test]
    fn test_delete_cascades_through_tied_objects() {
        let (c, mw) = client();
        build_tree(&c);
        let writer = ObjectVariant::DataWriter {
            publisher_id: PUBLISHER,
            representation: xml_topic("Square"),
        };
        let reader = ObjectVariant::DataReader {
            subscriber_id: SUBSCRIBER,
            representation: xml_topic("Square"),
        };
        assert_eq!(c.create(mode(false, false), WRITER, &writer), StatusCode::Ok);
        assert_eq!(c.create(mode(false, false), READER, &reader), StatusCode::Ok);
        assert_eq!(mw.entity_count(), 6);

        // Deleting the topic takes both endpoints with it.
        assert_eq!(c.delete(TOPIC), StatusCode::Ok);
        assert!(c.get_object(WRITER).is_none());
        assert!(c.get_object(READER).is_none());
        assert_eq!(c.object_count(), 3);
        assert_eq!(mw.entity_count(), 3);

        assert_eq!(c.delete(TOPIC), StatusCode::ErrUnknownReference);
        assert_eq!(c.delete(PARTICIPANT), StatusCode::Ok);
        assert_eq!(c.object_count(), 0);
        assert_eq!(mw.entity_count(), 0);
    }

    #[test]
    fn test_write_routes_by_kind() {
        let (c, mw) = client();
        build_tree(&c);
        let writer = ObjectVariant::DataWriter {
            publisher_id: PUBLISHER,
            representation: xml_topic("Square"),
        };
        let reader = ObjectVariant::DataReader {
            subscriber_id: SUBSCRIBER,
            representation: xml_topic("Square"),
        };
        c.create(mode(false, false), WRITER, &writer);
        c.create(mode(false, false), READER, &reader);

        assert_eq!(c.write(WRITER, &[1, 2, 3]), StatusCode::Ok);
        assert_eq!(mw.backlog(entity_id(c.key(), READER)), 1);
        assert_eq!(c.write(TOPIC, &[1]), StatusCode::ErrInvalidData);
        assert_eq!(c.write(ObjectId::from_raw(0x0FF5), &[1]), StatusCode::ErrUnknownReference);
    }

    #[test]
    fn test_release_all_empties_middleware() {
        let (c, mw) = client();
        build_tree(&c);
        c.release_all();
        assert_eq!(c.object_count(), 0);
        assert_eq!(mw.entity_count(), 0);
    }
}
