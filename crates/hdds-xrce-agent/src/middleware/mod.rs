// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Middleware trait: bridges the XRCE agent to an actual pub/sub implementation.
//
// This is intentionally DDS-agnostic: any middleware can implement it. The
// agent addresses entities by a numeric id that is unique across clients:
// `(client_key << 16) | object_id`.

pub mod memory;

use std::time::Duration;

use crate::protocol::{ClientKey, ObjectId, Representation};

pub use memory::InMemoryMiddleware;

/// Middleware-side handle of an XRCE object.
pub type EntityId = u64;

/// Entity id of `object_id` owned by the client `key`.
pub fn entity_id(key: ClientKey, object_id: ObjectId) -> EntityId {
    (u64::from(key.0) << 16) | u64::from(object_id.raw())
}

/// Capabilities the agent needs from the middleware.
///
/// Every method reports plain success or failure; the agent turns a failure
/// into the matching XRCE status code. Read methods block for at most
/// `timeout` and fill `out` with one serialized sample.
pub trait Middleware: Send + Sync {
    // -- creation -----------------------------------------------------------

    fn create_participant(&self, id: EntityId, domain_id: i16, repr: &Representation) -> bool;

    fn create_topic(&self, id: EntityId, participant_id: EntityId, repr: &Representation) -> bool;

    fn create_publisher(&self, id: EntityId, participant_id: EntityId, repr: &Representation)
        -> bool;

    fn create_subscriber(
        &self,
        id: EntityId,
        participant_id: EntityId,
        repr: &Representation,
    ) -> bool;

    fn create_datawriter(&self, id: EntityId, publisher_id: EntityId, repr: &Representation)
        -> bool;

    fn create_datareader(
        &self,
        id: EntityId,
        subscriber_id: EntityId,
        repr: &Representation,
    ) -> bool;

    fn create_requester(&self, id: EntityId, participant_id: EntityId, repr: &Representation)
        -> bool;

    fn create_replier(&self, id: EntityId, participant_id: EntityId, repr: &Representation)
        -> bool;

    // -- deletion -----------------------------------------------------------

    fn delete_participant(&self, id: EntityId) -> bool;
    fn delete_topic(&self, id: EntityId) -> bool;
    fn delete_publisher(&self, id: EntityId) -> bool;
    fn delete_subscriber(&self, id: EntityId) -> bool;
    fn delete_datawriter(&self, id: EntityId) -> bool;
    fn delete_datareader(&self, id: EntityId) -> bool;
    fn delete_requester(&self, id: EntityId) -> bool;
    fn delete_replier(&self, id: EntityId) -> bool;

    // -- matching (reuse of an existing object) ------------------------------

    fn matched_participant(&self, id: EntityId, domain_id: i16, repr: &Representation) -> bool;
    fn matched_topic(&self, id: EntityId, repr: &Representation) -> bool;
    fn matched_publisher(&self, id: EntityId, repr: &Representation) -> bool;
    fn matched_subscriber(&self, id: EntityId, repr: &Representation) -> bool;
    fn matched_datawriter(&self, id: EntityId, repr: &Representation) -> bool;
    fn matched_datareader(&self, id: EntityId, repr: &Representation) -> bool;
    fn matched_requester(&self, id: EntityId, repr: &Representation) -> bool;
    fn matched_replier(&self, id: EntityId, repr: &Representation) -> bool;

    // -- data ---------------------------------------------------------------

    fn write_data(&self, datawriter_id: EntityId, data: &[u8]) -> bool;
    fn write_request(&self, requester_id: EntityId, data: &[u8]) -> bool;
    fn write_reply(&self, replier_id: EntityId, data: &[u8]) -> bool;

    fn read_data(&self, datareader_id: EntityId, out: &mut Vec<u8>, timeout: Duration) -> bool;
    fn read_request(&self, replier_id: EntityId, out: &mut Vec<u8>, timeout: Duration) -> bool;
    fn read_reply(&self, requester_id: EntityId, out: &mut Vec<u8>, timeout: Duration) -> bool;
}
