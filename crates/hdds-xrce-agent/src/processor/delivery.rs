// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Read / write callbacks plugged into a Reader for READ_DATA.

use std::sync::{Arc, Weak};
use std::time::Duration;

use super::output::{encode, send_submessage, PacketSink, SendOutcome};
use crate::client::ProxyClient;
use crate::middleware::{EntityId, Middleware};
use crate::protocol::{BaseObjectRequest, DataPayload, ObjectKind, Submessage};
use crate::session::StreamId;

/// Which middleware queue a read task drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    /// DataReader samples.
    Data,
    /// Requests arriving at a Replier.
    Request,
    /// Replies arriving at a Requester.
    Reply,
}

impl ReadKind {
    pub fn for_object(kind: ObjectKind) -> Option<Self> {
        match kind {
            ObjectKind::DataReader => Some(Self::Data),
            ObjectKind::Replier => Some(Self::Request),
            ObjectKind::Requester => Some(Self::Reply),
            _ => None,
        }
    }
}

pub struct ReadArgs {
    pub middleware: Arc<dyn Middleware>,
    pub entity_id: EntityId,
    pub kind: ReadKind,
}

pub fn read_fn(args: &ReadArgs, out: &mut Vec<u8>, timeout: Duration) -> bool {
    match args.kind {
        ReadKind::Data => args.middleware.read_data(args.entity_id, out, timeout),
        ReadKind::Request => args.middleware.read_request(args.entity_id, out, timeout),
        ReadKind::Reply => args.middleware.read_reply(args.entity_id, out, timeout),
    }
}

pub struct WriteArgs {
    /// Weak so a running read never keeps a deleted client alive.
    pub client: Weak<ProxyClient>,
    pub sink: Arc<dyn PacketSink>,
    pub stream: StreamId,
    pub request: BaseObjectRequest,
    pub max_message_size: usize,
}

/// Wrap one sample in DATA and queue it. `false` only while the reliable
/// window is full, so the reader retries. Samples that cannot be sent at all
/// are dropped.
pub fn write_fn(args: &WriteArgs, data: &[u8], _timeout: Duration) -> bool {
    let Some(client) = args.client.upgrade() else {
        return true;
    };
    let Some(submessage) = encode(&Submessage::Data(DataPayload {
        request: args.request,
        data: data.to_vec(),
    })) else {
        return true;
    };
    let outcome = send_submessage(
        &client,
        args.sink.as_ref(),
        args.stream,
        submessage,
        args.max_message_size,
    );
    outcome != SendOutcome::WindowFull
}
