// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Output composition: header + submessage, sequence numbering through the
// client's session, fragmentation of oversized reliable messages.

use crate::client::ProxyClient;
use crate::protocol::{fragment_submessage, MessageHeader, Submessage, SUBMESSAGE_HEADER_SIZE};
use crate::seq::SeqNum;
use crate::session::StreamId;
use crate::stream::RELIABLE_HISTORY;
use crate::transport::{Endpoint, OutputPacket};

/// Where finished messages go (the server's output queue in production).
pub trait PacketSink: Send + Sync {
    fn send(&self, packet: OutputPacket);
}

/// Result of queuing a submessage on a client stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The reliable window cannot take the message yet.
    WindowFull,
    /// The message was discarded (no endpoint, or too large for its stream).
    Dropped,
}

fn compose(header: &MessageHeader, submessage: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(header.size() + submessage.len());
    header.write_to(&mut message);
    message.extend_from_slice(submessage);
    message
}

/// Serialize `submessage`, logging the ones too large to encode.
pub fn encode(submessage: &Submessage) -> Option<Vec<u8>> {
    match submessage.encode() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            log::warn!("[XRCE] submessage 0x{:02x} dropped: {}", submessage.id(), e);
            None
        }
    }
}

/// Send one submessage outside any stream bookkeeping.
pub fn send_direct(sink: &dyn PacketSink, destination: Endpoint, header: MessageHeader, submessage: &[u8]) {
    sink.send(OutputPacket {
        destination,
        message: compose(&header, submessage),
    });
}

/// Number `submessage` on `stream` of `client` and hand it to `sink`.
///
/// Reliable messages that do not fit in `max_message_size` are split into
/// FRAGMENT submessages, each taking one window slot. The whole set is
/// queued or none of it is; a set larger than the window is dropped.
pub fn send_submessage(
    client: &ProxyClient,
    sink: &dyn PacketSink,
    stream: StreamId,
    submessage: Vec<u8>,
    max_message_size: usize,
) -> SendOutcome {
    let Some(destination) = client.endpoint() else {
        log::debug!("[XRCE] client {} has no endpoint, output dropped", client.key());
        return SendOutcome::Dropped;
    };
    let header_size = client.output_header(stream, SeqNum::new(0)).size();

    if header_size + submessage.len() <= max_message_size {
        return match client.session().push_output_message(stream, submessage.clone()) {
            Some(seq) => {
                send_direct(sink, destination, client.output_header(stream, seq), &submessage);
                SendOutcome::Sent
            }
            None => SendOutcome::WindowFull,
        };
    }

    if !stream.is_reliable() {
        log::warn!(
            "[XRCE] {} byte message exceeds {} on unreliable stream {}, dropped",
            submessage.len(),
            max_message_size,
            stream
        );
        return SendOutcome::Dropped;
    }

    let chunk = max_message_size.saturating_sub(header_size + SUBMESSAGE_HEADER_SIZE);
    let fragments = match fragment_submessage(&submessage, chunk) {
        Ok(f) => f,
        Err(e) => {
            log::warn!("[XRCE] cannot fragment output for client {}: {}", client.key(), e);
            return SendOutcome::Dropped;
        }
    };
    if fragments.len() > usize::from(RELIABLE_HISTORY) {
        log::warn!(
            "[XRCE] {} byte message needs {} fragments on stream {}, window holds {}, dropped",
            submessage.len(),
            fragments.len(),
            stream,
            RELIABLE_HISTORY
        );
        return SendOutcome::Dropped;
    }
    let Some(seqs) = client.session().push_output_batch(stream, fragments.clone()) else {
        return SendOutcome::WindowFull;
    };
    for (seq, fragment) in seqs.into_iter().zip(fragments) {
        send_direct(sink, destination.clone(), client.output_header(stream, seq), &fragment);
    }
    SendOutcome::Sent
}

/// Send the stored reliable message `seq` again. Returns whether it existed.
pub fn resend(client: &ProxyClient, sink: &dyn PacketSink, stream: StreamId, seq: SeqNum) -> bool {
    let Some(body) = client.session().get_output_message(stream, seq) else {
        return false;
    };
    let Some(destination) = client.endpoint() else {
        return false;
    };
    send_direct(sink, destination, client.output_header(stream, seq), &body);
    true
}
