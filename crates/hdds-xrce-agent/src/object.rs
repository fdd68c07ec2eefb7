// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// XRCE objects held by a ProxyClient.
//
// An object is a closed variant (participant, topic, ...) bound to one
// middleware entity. Objects that depend on it are recorded in its `tied`
// set so deleting it releases them too.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::middleware::{entity_id, EntityId, Middleware};
use crate::processor::delivery::{ReadArgs, WriteArgs};
use crate::protocol::{ClientKey, ObjectId, ObjectKind};
use crate::reader::Reader;

pub use crate::protocol::{ObjectVariant, Representation};

/// Background read task of a DataReader, Requester or Replier.
pub type ObjectReader = Reader<ReadArgs, WriteArgs>;

/// One live object of a client.
pub struct XrceObject {
    id: ObjectId,
    entity_id: EntityId,
    variant: ObjectVariant,
    /// Objects this one depends on.
    parents: Vec<ObjectId>,
    /// Objects that depend on this one.
    tied: BTreeSet<ObjectId>,
    reader: Option<Arc<ObjectReader>>,
}

impl fmt::Debug for XrceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XrceObject")
            .field("id", &self.id)
            .field("entity_id", &format_args!("0x{:x}", self.entity_id))
            .field("kind", &self.variant.kind())
            .field("parents", &self.parents)
            .field("tied", &self.tied)
            .finish()
    }
}

impl XrceObject {
    /// Create the middleware entity for `variant`.
    ///
    /// `parents` must already exist in the client; the first one is the
    /// direct parent named by the variant. Returns `None` if the middleware
    /// refuses.
    pub(crate) fn create(
        middleware: &dyn Middleware,
        key: ClientKey,
        id: ObjectId,
        variant: ObjectVariant,
        parents: Vec<ObjectId>,
        poll_ceiling: Duration,
    ) -> Option<Self> {
        let eid = entity_id(key, id);
        let parent_eid = variant.parent_id().map(|p| entity_id(key, p)).unwrap_or(0);
        let created = match &variant {
            ObjectVariant::Participant {
                domain_id,
                representation,
            } => middleware.create_participant(eid, *domain_id, representation),
            ObjectVariant::Topic { representation, .. } => {
                middleware.create_topic(eid, parent_eid, representation)
            }
            ObjectVariant::Publisher { representation, .. } => {
                middleware.create_publisher(eid, parent_eid, representation)
            }
            ObjectVariant::Subscriber { representation, .. } => {
                middleware.create_subscriber(eid, parent_eid, representation)
            }
            ObjectVariant::DataWriter { representation, .. } => {
                middleware.create_datawriter(eid, parent_eid, representation)
            }
            ObjectVariant::DataReader { representation, .. } => {
                middleware.create_datareader(eid, parent_eid, representation)
            }
            ObjectVariant::Requester { representation, .. } => {
                middleware.create_requester(eid, parent_eid, representation)
            }
            ObjectVariant::Replier { representation, .. } => {
                middleware.create_replier(eid, parent_eid, representation)
            }
        };
        if !created {
            return None;
        }

        let reader = matches!(
            variant.kind(),
            ObjectKind::DataReader | ObjectKind::Requester | ObjectKind::Replier
        )
        .then(|| Arc::new(Reader::new(format!("{}-{}", key, id), poll_ceiling)));

        Some(Self {
            id,
            entity_id: eid,
            variant,
            parents,
            tied: BTreeSet::new(),
            reader,
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.variant.kind()
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn variant(&self) -> &ObjectVariant {
        &self.variant
    }

    pub fn parents(&self) -> &[ObjectId] {
        &self.parents
    }

    pub fn tied(&self) -> &BTreeSet<ObjectId> {
        &self.tied
    }

    pub fn reader(&self) -> Option<&Arc<ObjectReader>> {
        self.reader.as_ref()
    }

    pub(crate) fn tie(&mut self, child: ObjectId) {
        self.tied.insert(child);
    }

    pub(crate) fn untie(&mut self, child: ObjectId) {
        self.tied.remove(&child);
    }

    /// Whether an existing object can stand in for a new `variant`.
    pub(crate) fn matches(&self, middleware: &dyn Middleware, variant: &ObjectVariant) -> bool {
        if self.variant.kind() != variant.kind() || self.variant.parent_id() != variant.parent_id() {
            return false;
        }
        let eid = self.entity_id;
        match variant {
            ObjectVariant::Participant {
                domain_id,
                representation,
            } => middleware.matched_participant(eid, *domain_id, representation),
            ObjectVariant::Topic { representation, .. } => middleware.matched_topic(eid, representation),
            ObjectVariant::Publisher { representation, .. } => {
                middleware.matched_publisher(eid, representation)
            }
            ObjectVariant::Subscriber { representation, .. } => {
                middleware.matched_subscriber(eid, representation)
            }
            ObjectVariant::DataWriter { representation, .. } => {
                middleware.matched_datawriter(eid, representation)
            }
            ObjectVariant::DataReader { representation, .. } => {
                middleware.matched_datareader(eid, representation)
            }
            ObjectVariant::Requester { representation, .. } => {
                middleware.matched_requester(eid, representation)
            }
            ObjectVariant::Replier { representation, .. } => {
                middleware.matched_replier(eid, representation)
            }
        }
    }

    /// Stop any read task and delete the middleware entity.
    pub(crate) fn release(&self, middleware: &dyn Middleware) -> bool {
        if let Some(reader) = &self.reader {
            reader.stop_reading();
        }
        let eid = self.entity_id;
        let deleted = match self.variant.kind() {
            ObjectKind::Participant => middleware.delete_participant(eid),
            ObjectKind::Topic => middleware.delete_topic(eid),
            ObjectKind::Publisher => middleware.delete_publisher(eid),
            ObjectKind::Subscriber => middleware.delete_subscriber(eid),
            ObjectKind::DataWriter => middleware.delete_datawriter(eid),
            ObjectKind::DataReader => middleware.delete_datareader(eid),
            ObjectKind::Requester => middleware.delete_requester(eid),
            ObjectKind::Replier => middleware.delete_replier(eid),
            _ => false,
        };
        if !deleted {
            log::debug!("[XRCE] middleware had no entity for object {}", self.id);
        }
        deleted
    }
}
