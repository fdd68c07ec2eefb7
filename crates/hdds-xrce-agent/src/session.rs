// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// XRCE session: the per-client set of streams.
//
// A session routes every operation to the stream addressed by its id and
// creates streams on first use. Each stream sits behind its own lock, so the
// processing thread, the heartbeat thread and reader threads only contend
// when they touch the same stream.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::XrceError;
use crate::protocol::HeartbeatPayload;
use crate::seq::SeqNum;
use crate::stream::{
    BestEffortInputStream, BestEffortOutputStream, ReliableInputStream, ReliableOutputStream,
};

// ---------------------------------------------------------------------------
// Stream ids
// ---------------------------------------------------------------------------

/// Reliability class of a stream, given by its id range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// id 0: no sequencing, used for session control.
    None,
    /// ids 1..=127.
    BestEffort,
    /// ids 128..=255.
    Reliable,
}

/// Stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u8);

impl StreamId {
    pub const NONE: StreamId = StreamId(0x00);
    pub const BUILTIN_BEST_EFFORT: StreamId = StreamId(0x01);
    pub const BUILTIN_RELIABLE: StreamId = StreamId(0x80);

    pub fn kind(self) -> StreamKind {
        match self.0 {
            0 => StreamKind::None,
            1..=0x7F => StreamKind::BestEffort,
            _ => StreamKind::Reliable,
        }
    }

    pub fn is_reliable(self) -> bool {
        self.kind() == StreamKind::Reliable
    }
}

impl From<u8> for StreamId {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Stream map
// ---------------------------------------------------------------------------

/// Lazily populated map of streams of one flavour.
struct StreamMap<S> {
    streams: Mutex<HashMap<StreamId, Arc<Mutex<S>>>>,
}

impl<S: Default> StreamMap<S> {
    fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_create(&self, id: StreamId) -> Arc<Mutex<S>> {
        self.streams
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(S::default())))
            .clone()
    }

    fn get(&self, id: StreamId) -> Option<Arc<Mutex<S>>> {
        self.streams.lock().get(&id).cloned()
    }

    fn snapshot(&self) -> Vec<(StreamId, Arc<Mutex<S>>)> {
        let mut all: Vec<_> = self
            .streams
            .lock()
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    fn clear(&self) {
        self.streams.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The four stream maps of one client.
pub struct Session {
    best_effort_in: StreamMap<BestEffortInputStream>,
    best_effort_out: StreamMap<BestEffortOutputStream>,
    reliable_in: StreamMap<ReliableInputStream>,
    reliable_out: StreamMap<ReliableOutputStream>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("reliable_out", &self.reliable_out.snapshot().len())
            .field("reliable_in", &self.reliable_in.snapshot().len())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            best_effort_in: StreamMap::new(),
            best_effort_out: StreamMap::new(),
            reliable_in: StreamMap::new(),
            reliable_out: StreamMap::new(),
        }
    }

    /// Drop every stream; the next message on any stream starts from 0.
    pub fn reset(&self) {
        self.best_effort_in.clear();
        self.best_effort_out.clear();
        self.reliable_in.clear();
        self.reliable_out.clear();
    }

    // -- input side ---------------------------------------------------------

    /// Gate an incoming message.
    ///
    /// `true` means "process it now". Reliable out-of-order messages inside
    /// the window are buffered for [`Session::pop_input_message`].
    pub fn next_input_message(&self, id: StreamId, seq: SeqNum, payload: &[u8]) -> bool {
        match id.kind() {
            StreamKind::None => true,
            StreamKind::BestEffort => self.best_effort_in.get_or_create(id).lock().update(seq),
            StreamKind::Reliable => self
                .reliable_in
                .get_or_create(id)
                .lock()
                .next_message(seq, payload),
        }
    }

    /// Next buffered message that became deliverable, if any.
    pub fn pop_input_message(&self, id: StreamId) -> Option<Vec<u8>> {
        if !id.is_reliable() {
            return None;
        }
        self.reliable_in.get(id)?.lock().pop_next()
    }

    pub fn update_from_heartbeat(&self, id: StreamId, first: SeqNum, last: SeqNum) {
        if id.is_reliable() {
            self.reliable_in
                .get_or_create(id)
                .lock()
                .update_from_heartbeat(first, last);
        }
    }

    pub fn first_unacked(&self, id: StreamId) -> SeqNum {
        match self.reliable_in.get(id) {
            Some(s) => s.lock().first_unacked(),
            None => SeqNum::MAX + 1,
        }
    }

    pub fn nack_bitmap(&self, id: StreamId) -> u16 {
        self.reliable_in
            .get(id)
            .map(|s| s.lock().nack_bitmap())
            .unwrap_or(0)
    }

    /// Feed a FRAGMENT received on a reliable stream.
    pub fn push_fragment(
        &self,
        id: StreamId,
        chunk: &[u8],
        last: bool,
    ) -> Result<Option<Vec<u8>>, XrceError> {
        if !id.is_reliable() {
            return Err(XrceError::Fragment(format!(
                "fragment on non-reliable stream {}",
                id
            )));
        }
        self.reliable_in
            .get_or_create(id)
            .lock()
            .push_fragment(chunk, last)
    }

    // -- output side --------------------------------------------------------

    /// Assign a sequence number to an outbound message.
    ///
    /// Stream 0 always uses 0; best-effort streams only advance their
    /// counter; reliable streams keep `body` for retransmission and return
    /// `None` when their window is full.
    pub fn push_output_message(&self, id: StreamId, body: Vec<u8>) -> Option<SeqNum> {
        match id.kind() {
            StreamKind::None => Some(SeqNum::new(0)),
            StreamKind::BestEffort => Some(self.next_output_seq(id)),
            StreamKind::Reliable => self.reliable_out.get_or_create(id).lock().push(body),
        }
    }

    /// Push several messages as one unit: either all get a sequence number
    /// or, when the reliable window is too small, none does.
    pub fn push_output_batch(&self, id: StreamId, bodies: Vec<Vec<u8>>) -> Option<Vec<SeqNum>> {
        if !id.is_reliable() {
            return bodies
                .into_iter()
                .map(|body| self.push_output_message(id, body))
                .collect();
        }
        let stream = self.reliable_out.get_or_create(id);
        let mut stream = stream.lock();
        if usize::from(stream.free_slots()) < bodies.len() {
            return None;
        }
        bodies.into_iter().map(|body| stream.push(body)).collect()
    }

    /// Promote the sequence number of a best-effort output stream.
    pub fn next_output_seq(&self, id: StreamId) -> SeqNum {
        self.best_effort_out.get_or_create(id).lock().next_seq()
    }

    /// Stored reliable message, for retransmission.
    pub fn get_output_message(&self, id: StreamId, seq: SeqNum) -> Option<Vec<u8>> {
        self.reliable_out.get(id)?.lock().get(seq).map(<[u8]>::to_vec)
    }

    pub fn update_from_acknack(&self, id: StreamId, first_unacked: SeqNum) {
        if let Some(s) = self.reliable_out.get(id) {
            s.lock().update_from_acknack(first_unacked);
        }
    }

    /// Messages `id` can take right now; unbounded for unreliable streams.
    pub fn output_window_available(&self, id: StreamId) -> usize {
        if !id.is_reliable() {
            return usize::MAX;
        }
        usize::from(self.reliable_out.get_or_create(id).lock().free_slots())
    }

    /// Whether the reliable output stream `id` still waits for acks.
    pub fn message_pending(&self, id: StreamId) -> bool {
        self.reliable_out
            .get(id)
            .map(|s| s.lock().message_pending())
            .unwrap_or(false)
    }

    /// Heartbeats for every reliable output stream with unacked messages.
    pub fn pending_heartbeats(&self) -> Vec<HeartbeatPayload> {
        self.reliable_out
            .snapshot()
            .into_iter()
            .filter_map(|(id, stream)| {
                let s = stream.lock();
                s.message_pending().then(|| HeartbeatPayload {
                    first_unacked: s.first_unacked(),
                    last_unacked: s.last_sent(),
                    stream_id: id.0,
                })
            })
            .collect()
    }
}
