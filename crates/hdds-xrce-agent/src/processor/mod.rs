// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// XRCE message processor.
//
// Turns one raw input packet into session and object-graph operations and
// pushes every reply through a PacketSink. Decode errors stop processing of
// the packet they occur in; nothing is ever sent back for them.

pub mod delivery;
pub mod output;

use std::sync::Arc;

use crate::client::ProxyClient;
use crate::config::XrceAgentConfig;
use crate::middleware::Middleware;
use crate::protocol::{
    AcknackPayload, AgentRepresentation, BaseObjectReply, BaseObjectRequest, ClientKey,
    ClientRepresentation, CreatePayload, GetInfoPayload, HeartbeatPayload, InfoPayload,
    MessageHeader, ObjectId, ReadDataPayload, ResultStatus, StatusAgentPayload, StatusCode,
    StatusPayload, Submessage, SubmessageIter, Time, TimestampReplyPayload, FORMAT_DATA,
    XRCE_COOKIE, XRCE_VERSION_MAJOR,
};
use crate::registry::ClientRegistry;
use crate::seq::SeqNum;
use crate::session::StreamId;
use crate::stream::RELIABLE_HISTORY;
use crate::transport::{Endpoint, InputPacket};

use delivery::{ReadArgs, ReadKind, WriteArgs};
pub use output::{PacketSink, SendOutcome};

/// Where the submessages being processed came from.
struct InputContext<'a> {
    client: &'a Arc<ProxyClient>,
    source: &'a Endpoint,
    stream: StreamId,
    received: Time,
}

/// Decodes input packets and drives clients, objects and replies.
pub struct Processor {
    config: XrceAgentConfig,
    registry: Arc<ClientRegistry>,
    middleware: Arc<dyn Middleware>,
    sink: Arc<dyn PacketSink>,
    agent: AgentRepresentation,
}

impl Processor {
    pub fn new(
        config: XrceAgentConfig,
        registry: Arc<ClientRegistry>,
        middleware: Arc<dyn Middleware>,
        sink: Arc<dyn PacketSink>,
    ) -> Self {
        Self {
            config,
            registry,
            middleware,
            sink,
            agent: AgentRepresentation::default(),
        }
    }

    pub fn config(&self) -> &XrceAgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Process one complete XRCE message.
    pub fn process_input_packet(&self, packet: InputPacket) {
        let received = Time::now();
        let (header, offset) = match MessageHeader::parse(&packet.message) {
            Ok(h) => h,
            Err(e) => {
                log::warn!("[XRCE] bad message header from {}: {}", packet.source, e);
                return;
            }
        };
        let body = &packet.message[offset..];

        let key = header
            .client_key
            .or_else(|| self.registry.get_client_key(&packet.source));
        let client = key
            .and_then(|k| self.registry.get_client(k))
            .filter(|c| c.session_id() == header.session_id);

        let Some(client) = client else {
            self.process_sessionless(&header, &packet.source, body);
            return;
        };

        if header.client_key.is_some() {
            self.registry.bind_endpoint(client.key(), packet.source.clone());
        }

        let stream = StreamId(header.stream_id);
        if !client
            .session()
            .next_input_message(stream, header.sequence_nr, body)
        {
            log::debug!(
                "[XRCE] client {}: seq {} on stream {} not processed now",
                client.key(),
                header.sequence_nr,
                stream
            );
            return;
        }

        let ctx = InputContext {
            client: &client,
            source: &packet.source,
            stream,
            received,
        };
        self.process_submessages(&ctx, body);
        self.drain_buffered(&ctx, stream);
    }

    /// Send HEARTBEAT for every reliable output stream still waiting for acks.
    pub fn check_heartbeats(&self) {
        for client in self.registry.clients() {
            let Some(destination) = client.endpoint() else {
                continue;
            };
            for hb in client.session().pending_heartbeats() {
                let Some(bytes) = output::encode(&Submessage::Heartbeat(hb)) else {
                    continue;
                };
                output::send_direct(
                    self.sink.as_ref(),
                    destination.clone(),
                    client.output_header(StreamId::NONE, SeqNum::new(0)),
                    &bytes,
                );
            }
        }
    }

    /// Release every client and its objects.
    pub fn shutdown(&self) {
        self.registry.clear();
    }

    // -- input plumbing -----------------------------------------------------

    /// Only CREATE_CLIENT and GET_INFO make sense without a client.
    fn process_sessionless(&self, header: &MessageHeader, source: &Endpoint, body: &[u8]) {
        for item in SubmessageIter::new(body, 0) {
            let submessage = match item.and_then(|(hdr, payload)| Submessage::decode(&hdr, payload)) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("[XRCE] malformed submessage from {}: {}", source, e);
                    return;
                }
            };
            match submessage {
                Submessage::CreateClient(rep) => self.handle_create_client(&rep, source),
                Submessage::GetInfo(p) => self.handle_get_info(header, &p, source),
                other => {
                    log::debug!(
                        "[XRCE] submessage 0x{:02x} from unknown client at {} ignored",
                        other.id(),
                        source
                    );
                }
            }
        }
    }

    fn process_submessages(&self, ctx: &InputContext<'_>, buf: &[u8]) {
        for item in SubmessageIter::new(buf, 0) {
            let submessage = match item.and_then(|(hdr, payload)| Submessage::decode(&hdr, payload)) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!(
                        "[XRCE] client {}: malformed submessage, rest of message dropped: {}",
                        ctx.client.key(),
                        e
                    );
                    return;
                }
            };
            self.dispatch(ctx, submessage);
        }
    }

    /// Process buffered messages of `stream` that are now in order.
    fn drain_buffered(&self, ctx: &InputContext<'_>, stream: StreamId) {
        let ctx = InputContext {
            stream,
            client: ctx.client,
            source: ctx.source,
            received: ctx.received,
        };
        while let Some(buffered) = ctx.client.session().pop_input_message(stream) {
            self.process_submessages(&ctx, &buffered);
        }
    }

    fn dispatch(&self, ctx: &InputContext<'_>, submessage: Submessage) {
        match submessage {
            Submessage::CreateClient(rep) => self.handle_create_client(&rep, ctx.source),
            Submessage::Create { payload, mode } => {
                let status = ctx
                    .client
                    .create(mode, payload.request.object_id, &payload.variant);
                log_create(ctx.client.key(), &payload, status);
                self.reply_status(ctx, payload.request, status);
            }
            Submessage::GetInfo(p) => {
                let header = ctx.client.output_header(StreamId::NONE, SeqNum::new(0));
                self.handle_get_info(&header, &p, ctx.source);
            }
            Submessage::Delete(p) => self.handle_delete(ctx, p.request),
            Submessage::WriteData(p) => {
                let status = ctx.client.write(p.request.object_id, &p.data);
                if !status.is_success() {
                    log::debug!(
                        "[XRCE] client {}: write to {} failed: {:?}",
                        ctx.client.key(),
                        p.request.object_id,
                        status
                    );
                }
            }
            Submessage::ReadData(p) => self.handle_read_data(ctx, &p),
            Submessage::Acknack(p) => self.handle_acknack(ctx, &p),
            Submessage::Heartbeat(p) => self.handle_heartbeat(ctx, &p),
            Submessage::Reset => {
                log::info!("[XRCE] client {}: session reset", ctx.client.key());
                ctx.client.session().reset();
            }
            Submessage::Fragment { data, last } => {
                match ctx.client.session().push_fragment(ctx.stream, &data, last) {
                    Ok(Some(whole)) => self.process_submessages(ctx, &whole),
                    Ok(None) => {}
                    Err(e) => log::warn!("[XRCE] client {}: {}", ctx.client.key(), e),
                }
            }
            Submessage::Timestamp(originate) => {
                let reply = Submessage::TimestampReply(TimestampReplyPayload {
                    transmit: Time::now(),
                    receive: ctx.received,
                    originate,
                });
                self.reply_on(ctx.client, StreamId::NONE, reply);
            }
            other => {
                log::debug!(
                    "[XRCE] client {}: agent-bound submessage 0x{:02x} ignored",
                    ctx.client.key(),
                    other.id()
                );
            }
        }
    }

    // -- handlers -----------------------------------------------------------

    fn handle_create_client(&self, rep: &ClientRepresentation, source: &Endpoint) {
        let status = if rep.xrce_cookie != XRCE_COOKIE {
            StatusCode::ErrInvalidData
        } else if rep.xrce_version[0] != XRCE_VERSION_MAJOR {
            StatusCode::ErrIncompatible
        } else {
            let middleware = self.middleware.clone();
            let poll_ceiling = self.config.read_poll_ceiling();
            self.registry.create_client(rep, source.clone(), || {
                ProxyClient::new(rep.client_key, rep.session_id, rep.mtu, middleware, poll_ceiling)
            })
        };
        if !status.is_success() {
            log::warn!("[XRCE] CREATE_CLIENT from {} refused: {:?}", source, status);
        }

        let reply = Submessage::StatusAgent(StatusAgentPayload {
            result: ResultStatus::new(status),
            agent: self.agent.clone(),
        });
        let Some(bytes) = output::encode(&reply) else {
            return;
        };
        output::send_direct(
            self.sink.as_ref(),
            source.clone(),
            MessageHeader::new(rep.session_id, StreamId::NONE.0, SeqNum::new(0), rep.client_key),
            &bytes,
        );
    }

    fn handle_get_info(&self, header: &MessageHeader, p: &GetInfoPayload, source: &Endpoint) {
        let reply = Submessage::Info(InfoPayload {
            reply: BaseObjectReply {
                related_request: p.request,
                result: ResultStatus::new(StatusCode::Ok),
            },
            config: Some(self.agent.clone()),
        });
        let header = MessageHeader {
            session_id: header.session_id,
            stream_id: StreamId::NONE.0,
            sequence_nr: SeqNum::new(0),
            client_key: header.client_key,
        };
        if let Some(bytes) = output::encode(&reply) {
            output::send_direct(self.sink.as_ref(), source.clone(), header, &bytes);
        }
    }

    fn handle_delete(&self, ctx: &InputContext<'_>, request: BaseObjectRequest) {
        if request.object_id != ObjectId::CLIENT {
            let status = ctx.client.delete(request.object_id);
            self.reply_status(ctx, request, status);
            return;
        }

        // The client is gone once deleted: answer directly on stream 0.
        let status = self.registry.delete_client(ctx.client.key());
        let reply = Submessage::Status(StatusPayload {
            reply: BaseObjectReply {
                related_request: request,
                result: ResultStatus::new(status),
            },
        });
        let Some(bytes) = output::encode(&reply) else {
            return;
        };
        output::send_direct(
            self.sink.as_ref(),
            ctx.source.clone(),
            ctx.client.output_header(StreamId::NONE, SeqNum::new(0)),
            &bytes,
        );
    }

    fn handle_read_data(&self, ctx: &InputContext<'_>, p: &ReadDataPayload) {
        let object = ctx.client.get_object(p.request.object_id);
        let target = object.as_ref().and_then(|o| {
            let kind = ReadKind::for_object(o.kind)?;
            Some((o, kind, o.reader.clone()?))
        });
        let Some((object, kind, reader)) = target else {
            self.reply_status(ctx, p.request, StatusCode::ErrUnknownReference);
            return;
        };
        if p.read_spec.data_format != FORMAT_DATA {
            self.reply_status(ctx, p.request, StatusCode::ErrInvalidData);
            return;
        }

        reader.stop_reading();
        let delivery_control = p.read_spec.delivery_control.unwrap_or_default();
        let read_args = ReadArgs {
            middleware: self.middleware.clone(),
            entity_id: object.entity_id,
            kind,
        };
        let write_args = WriteArgs {
            client: Arc::downgrade(ctx.client),
            sink: self.sink.clone(),
            stream: StreamId(p.read_spec.preferred_stream_id),
            request: p.request,
            max_message_size: self.max_message_size(ctx.client),
        };
        if !reader.start_reading(
            delivery_control,
            delivery::read_fn,
            read_args,
            delivery::write_fn,
            write_args,
        ) {
            self.reply_status(ctx, p.request, StatusCode::ErrResources);
        }
    }

    fn handle_acknack(&self, ctx: &InputContext<'_>, p: &AcknackPayload) {
        let stream = StreamId(p.stream_id);
        if !stream.is_reliable() {
            return;
        }
        let session = ctx.client.session();
        session.update_from_acknack(stream, p.first_unacked);
        for i in 0..RELIABLE_HISTORY {
            if p.nack_bitmap & (1 << i) != 0 {
                output::resend(ctx.client, self.sink.as_ref(), stream, p.first_unacked + i);
            }
        }
    }

    fn handle_heartbeat(&self, ctx: &InputContext<'_>, p: &HeartbeatPayload) {
        let stream = StreamId(p.stream_id);
        if !stream.is_reliable() {
            return;
        }
        ctx.client
            .session()
            .update_from_heartbeat(stream, p.first_unacked, p.last_unacked);
        self.drain_buffered(ctx, stream);

        let session = ctx.client.session();
        let reply = Submessage::Acknack(AcknackPayload {
            first_unacked: session.first_unacked(stream),
            nack_bitmap: session.nack_bitmap(stream),
            stream_id: stream.0,
        });
        self.reply_on(ctx.client, StreamId::NONE, reply);
    }

    // -- replies ------------------------------------------------------------

    fn max_message_size(&self, client: &ProxyClient) -> usize {
        match usize::from(client.mtu()) {
            0 => self.config.max_message_size,
            mtu => mtu.min(self.config.max_message_size),
        }
    }

    fn reply_on(&self, client: &ProxyClient, stream: StreamId, submessage: Submessage) {
        let Some(bytes) = output::encode(&submessage) else {
            return;
        };
        let outcome = output::send_submessage(
            client,
            self.sink.as_ref(),
            stream,
            bytes,
            self.max_message_size(client),
        );
        if outcome == SendOutcome::WindowFull {
            log::warn!(
                "[XRCE] client {}: output window of stream {} full, reply 0x{:02x} dropped",
                client.key(),
                stream,
                submessage.id()
            );
        }
    }

    fn reply_status(&self, ctx: &InputContext<'_>, request: BaseObjectRequest, status: StatusCode) {
        let reply = Submessage::Status(StatusPayload {
            reply: BaseObjectReply {
                related_request: request,
                result: ResultStatus::new(status),
            },
        });
        self.reply_on(ctx.client, ctx.stream, reply);
    }
}

fn log_create(key: ClientKey, payload: &CreatePayload, status: StatusCode) {
    if status.is_success() {
        log::debug!(
            "[XRCE] client {}: {:?} {} -> {:?}",
            key,
            payload.variant.kind(),
            payload.request.object_id,
            status
        );
    } else {
        log::warn!(
            "[XRCE] client {}: CREATE {:?} {} failed: {:?}",
            key,
            payload.variant.kind(),
            payload.request.object_id,
            status
        );
    }
}
