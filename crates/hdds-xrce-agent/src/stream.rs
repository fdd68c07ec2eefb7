// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-stream delivery and retransmission bookkeeping.
//!
//! Four stream flavours exist, one per (reliability, direction) pair:
//!
//! | Stream | State | Behaviour |
//! |--------|-------|-----------|
//! | [`BestEffortInputStream`] | `last_handled` | drop stale / duplicate |
//! | [`BestEffortOutputStream`] | `last_sent` | number and forget |
//! | [`ReliableInputStream`] | `last_handled`, `last_announced`, buffer | reorder within 16 slots |
//! | [`ReliableOutputStream`] | `last_sent`, `last_acknowledged`, buffer | keep until acked |
//!
//! All cursors start at [`SeqNum::MAX`] so the first message is numbered 0.

use std::collections::HashMap;

use crate::error::XrceError;
use crate::seq::SeqNum;

/// Number of sequence slots a reliable stream may buffer ahead of its cursor.
pub const RELIABLE_HISTORY: u16 = 16;

/// Upper bound on a reassembled fragmented message.
pub const MAX_REASSEMBLED_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Best-effort input
// ---------------------------------------------------------------------------

/// Inbound best-effort stream: newer messages win, nothing is buffered.
#[derive(Debug, Clone)]
pub struct BestEffortInputStream {
    last_handled: SeqNum,
}

impl Default for BestEffortInputStream {
    fn default() -> Self {
        Self {
            last_handled: SeqNum::MAX,
        }
    }
}

impl BestEffortInputStream {
    /// Accept `seq` if it is newer than anything handled so far.
    pub fn update(&mut self, seq: SeqNum) -> bool {
        if self.last_handled < seq {
            self.last_handled = seq;
            true
        } else {
            false
        }
    }

    pub fn last_handled(&self) -> SeqNum {
        self.last_handled
    }
}

// ---------------------------------------------------------------------------
// Best-effort output
// ---------------------------------------------------------------------------

/// Outbound best-effort stream. Sending only promotes the sequence number.
#[derive(Debug, Clone)]
pub struct BestEffortOutputStream {
    last_sent: SeqNum,
}

impl Default for BestEffortOutputStream {
    fn default() -> Self {
        Self {
            last_sent: SeqNum::MAX,
        }
    }
}

impl BestEffortOutputStream {
    /// Allocate the sequence number of the next outbound message.
    pub fn next_seq(&mut self) -> SeqNum {
        self.last_sent += 1;
        self.last_sent
    }

    pub fn last_sent(&self) -> SeqNum {
        self.last_sent
    }
}

// ---------------------------------------------------------------------------
// Fragment reassembly
// ---------------------------------------------------------------------------

/// Accumulates FRAGMENT payloads of one reliable stream.
///
/// Fragments travel on a reliable stream, so they reach the buffer in order;
/// the message is complete when the fragment flagged as last arrives.
#[derive(Debug, Default, Clone)]
pub struct FragmentBuffer {
    data: Vec<u8>,
}

impl FragmentBuffer {
    /// Append one fragment. Returns the whole message once `last` is set.
    pub fn push(&mut self, chunk: &[u8], last: bool) -> Result<Option<Vec<u8>>, XrceError> {
        if self.data.len() + chunk.len() > MAX_REASSEMBLED_SIZE {
            let have = self.data.len();
            self.data.clear();
            return Err(XrceError::Fragment(format!(
                "reassembled message exceeds {} bytes (have {}, adding {})",
                MAX_REASSEMBLED_SIZE,
                have,
                chunk.len()
            )));
        }
        self.data.extend_from_slice(chunk);
        if last {
            Ok(Some(std::mem::take(&mut self.data)))
        } else {
            Ok(None)
        }
    }

    /// Bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Reliable input
// ---------------------------------------------------------------------------

/// Inbound reliable stream.
///
/// Messages are delivered strictly in sequence order. The next expected
/// message is handed straight to the caller; later ones inside the history
/// window wait in `messages` until the gap before them is filled.
#[derive(Debug, Clone)]
pub struct ReliableInputStream {
    last_handled: SeqNum,
    last_announced: SeqNum,
    messages: HashMap<SeqNum, Vec<u8>>,
    fragments: FragmentBuffer,
}

impl Default for ReliableInputStream {
    fn default() -> Self {
        Self {
            last_handled: SeqNum::MAX,
            last_announced: SeqNum::MAX,
            messages: HashMap::new(),
            fragments: FragmentBuffer::default(),
        }
    }
}

impl ReliableInputStream {
    /// Whether `seq` is the message the stream is waiting for.
    pub fn is_next(&self, seq: SeqNum) -> bool {
        seq == self.last_handled + 1
    }

    /// Gate an incoming message.
    ///
    /// Returns `true` when `seq` is next in order; the cursor advances and the
    /// caller processes `payload` now. Otherwise an in-window message is
    /// buffered and `false` is returned.
    pub fn next_message(&mut self, seq: SeqNum, payload: &[u8]) -> bool {
        if self.is_next(seq) {
            self.last_handled = seq;
            self.raise_announced(seq);
            true
        } else {
            self.insert(seq, payload.to_vec());
            false
        }
    }

    /// Buffer `payload` if `seq` lies in `(last_handled, last_handled + 16]`.
    pub fn insert(&mut self, seq: SeqNum, payload: Vec<u8>) -> bool {
        let in_window = self.last_handled < seq && seq <= self.last_handled + RELIABLE_HISTORY;
        if !in_window {
            return false;
        }
        self.raise_announced(seq);
        self.messages.entry(seq).or_insert(payload);
        true
    }

    /// Take the buffered message that directly follows the cursor, if any.
    pub fn pop_next(&mut self) -> Option<Vec<u8>> {
        let next = self.last_handled + 1;
        let message = self.messages.remove(&next)?;
        self.last_handled = next;
        Some(message)
    }

    /// Apply a HEARTBEAT announcing `[first_available, last_available]`.
    ///
    /// Messages before `first_available` are gone on the sender side, so the
    /// cursor jumps to make `first_available` the next expected message.
    pub fn update_from_heartbeat(&mut self, first_available: SeqNum, last_available: SeqNum) {
        if self.last_handled + 1 < first_available {
            self.last_handled = first_available - 1;
            let cursor = self.last_handled;
            self.messages.retain(|seq, _| cursor < *seq);
        }
        self.raise_announced(last_available);
    }

    /// First sequence number not yet delivered.
    pub fn first_unacked(&self) -> SeqNum {
        self.last_handled + 1
    }

    /// Bit `i` set means `first_unacked + i` was announced but never arrived.
    pub fn nack_bitmap(&self) -> u16 {
        let mut bitmap = 0u16;
        for i in 0..RELIABLE_HISTORY {
            let seq = self.last_handled + 1 + i;
            if self.last_announced < seq {
                break;
            }
            if !self.messages.contains_key(&seq) {
                bitmap |= 1 << i;
            }
        }
        bitmap
    }

    /// Feed a FRAGMENT payload; returns the reassembled message when complete.
    pub fn push_fragment(&mut self, chunk: &[u8], last: bool) -> Result<Option<Vec<u8>>, XrceError> {
        self.fragments.push(chunk, last)
    }

    pub fn last_handled(&self) -> SeqNum {
        self.last_handled
    }

    pub fn last_announced(&self) -> SeqNum {
        self.last_announced
    }

    /// Number of messages waiting for a gap to be filled.
    pub fn buffered(&self) -> usize {
        self.messages.len()
    }

    fn raise_announced(&mut self, seq: SeqNum) {
        if self.last_announced < seq {
            self.last_announced = seq;
        }
    }
}

// ---------------------------------------------------------------------------
// Reliable output
// ---------------------------------------------------------------------------

/// Outbound reliable stream: keeps every message until the peer acks it.
#[derive(Debug, Clone)]
pub struct ReliableOutputStream {
    last_sent: SeqNum,
    last_acknowledged: SeqNum,
    messages: HashMap<SeqNum, Vec<u8>>,
}

impl Default for ReliableOutputStream {
    fn default() -> Self {
        Self {
            last_sent: SeqNum::MAX,
            last_acknowledged: SeqNum::MAX,
            messages: HashMap::new(),
        }
    }
}

impl ReliableOutputStream {
    /// Store a new message. Returns its sequence number, or `None` when 16
    /// messages are already waiting for an acknowledgement.
    pub fn push(&mut self, payload: Vec<u8>) -> Option<SeqNum> {
        if !(self.last_sent < self.last_acknowledged + RELIABLE_HISTORY) {
            return None;
        }
        self.last_sent += 1;
        self.messages.insert(self.last_sent, payload);
        Some(self.last_sent)
    }

    /// Stored message for retransmission.
    pub fn get(&self, seq: SeqNum) -> Option<&[u8]> {
        self.messages.get(&seq).map(Vec::as_slice)
    }

    /// Cumulative ack: everything before `first_unacked` is confirmed.
    pub fn update_from_acknack(&mut self, first_unacked: SeqNum) {
        while self.last_acknowledged + 1 < first_unacked && self.last_acknowledged < self.last_sent {
            self.last_acknowledged += 1;
            self.messages.remove(&self.last_acknowledged);
        }
    }

    /// Pushes the window still admits.
    pub fn free_slots(&self) -> u16 {
        RELIABLE_HISTORY.saturating_sub(self.last_acknowledged.distance_to(self.last_sent))
    }

    /// Whether unacknowledged messages remain.
    pub fn message_pending(&self) -> bool {
        self.last_acknowledged < self.last_sent
    }

    /// First sequence number the peer has not confirmed.
    pub fn first_unacked(&self) -> SeqNum {
        self.last_acknowledged + 1
    }

    pub fn last_sent(&self) -> SeqNum {
        self.last_sent
    }

    pub fn last_acknowledged(&self) -> SeqNum {
        self.last_acknowledged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(v: u16) -> SeqNum {
        SeqNum::new(v)
    }

    #[test]
    fn test_best_effort_input_drops_stale() {
        let mut s = BestEffortInputStream::default();
        assert!(s.update(seq(0)));
        assert!(s.update(seq(3)));
        assert!(!s.update(seq(3)));
        assert!(!s.update(seq(2)));
        assert!(s.update(seq(4)));
        assert_eq!(s.last_handled(), seq(4));
    }

    #[test]
    fn test_best_effort_output_numbers_from_zero() {
        let mut s = BestEffortOutputStream::default();
        assert_eq!(s.next_seq(), seq(0));
        assert_eq!(s.next_seq(), seq(1));
        assert_eq!(s.last_sent(), seq(1));
    }

    #[test]
    fn test_reliable_input_next_is_consumed_not_buffered() {
        let mut s = ReliableInputStream::default();
        assert!(s.is_next(seq(0)));
        assert!(s.next_message(seq(0), b"a"));
        assert_eq!(s.buffered(), 0);
        assert_eq!(s.last_handled(), seq(0));
        assert!(s.pop_next().is_none());
    }

    #[test]
    fn test_reliable_input_scrambled_window_emerges_ordered() {
        let mut s = ReliableInputStream::default();
        assert!(s.next_message(seq(0), &[0]));

        let order = [5u16, 2, 9, 3, 16, 7, 4, 8, 6, 10, 12, 11, 15, 14, 13];
        for &n in &order {
            assert!(!s.next_message(seq(n), &[n as u8]));
        }
        assert!(s.pop_next().is_none(), "gap at 1 must block delivery");

        assert!(s.next_message(seq(1), &[1]));
        let mut delivered = Vec::new();
        while let Some(m) = s.pop_next() {
            delivered.push(m[0] as u16);
        }
        assert_eq!(delivered, (2..=16).collect::<Vec<_>>());
    }

    #[test]
    fn test_reliable_input_drops_outside_window() {
        let mut s = ReliableInputStream::default();
        assert!(s.next_message(seq(0), &[0]));
        // Window is (0, 16]
        assert!(!s.insert(seq(17), vec![17]));
        assert!(!s.insert(seq(0), vec![0]));
        assert!(s.insert(seq(16), vec![16]));
        assert_eq!(s.buffered(), 1);
        assert_eq!(s.last_announced(), seq(16));
    }

    #[test]
    fn test_reliable_input_window_across_wrap() {
        let mut s = ReliableInputStream::default();
        for n in 0..=65533u32 {
            assert!(s.next_message(seq(n as u16), &[]));
        }
        assert!(s.insert(seq(1), vec![1]));
        assert!(s.next_message(seq(65534), &[]));
        assert!(s.next_message(seq(65535), &[]));
        assert!(s.next_message(seq(0), &[]));
        assert_eq!(s.pop_next(), Some(vec![1]));
    }

    #[test]
    fn test_reliable_input_nack_bitmap() {
        let mut s = ReliableInputStream::default();
        assert!(s.next_message(seq(0), &[]));
        s.insert(seq(2), vec![2]);
        s.insert(seq(4), vec![4]);
        assert_eq!(s.first_unacked(), seq(1));
        // Slots 1..=4 announced: 1 and 3 missing.
        assert_eq!(s.nack_bitmap(), 0b0101);
    }

    #[test]
    fn test_reliable_input_heartbeat_jumps_cursor() {
        let mut s = ReliableInputStream::default();
        assert!(s.next_message(seq(0), &[]));
        s.insert(seq(3), vec![3]);
        s.insert(seq(8), vec![8]);
        s.update_from_heartbeat(seq(5), seq(9));
        assert_eq!(s.first_unacked(), seq(5));
        assert_eq!(s.last_announced(), seq(9));
        // seq 3 fell behind the cursor and was discarded.
        assert_eq!(s.buffered(), 1);
        assert_eq!(s.nack_bitmap(), 0b10111);
    }

    #[test]
    fn test_reliable_input_heartbeat_never_moves_back() {
        let mut s = ReliableInputStream::default();
        for n in 0..10 {
            assert!(s.next_message(seq(n), &[]));
        }
        s.update_from_heartbeat(seq(3), seq(9));
        assert_eq!(s.last_handled(), seq(9));
        assert_eq!(s.nack_bitmap(), 0);
    }

    #[test]
    fn test_reliable_output_window_full_on_17th() {
        let mut s = ReliableOutputStream::default();
        assert_eq!(s.free_slots(), RELIABLE_HISTORY);
        for n in 0..16u16 {
            assert_eq!(s.push(vec![n as u8]), Some(seq(n)));
        }
        assert_eq!(s.push(vec![16]), None);
        assert_eq!(s.free_slots(), 0);
        assert!(s.message_pending());

        s.update_from_acknack(seq(1));
        assert_eq!(s.push(vec![16]), Some(seq(16)));
    }

    #[test]
    fn test_reliable_output_acknack_idempotent() {
        let mut s = ReliableOutputStream::default();
        for n in 0..5u8 {
            s.push(vec![n]);
        }
        s.update_from_acknack(seq(3));
        let after_first = (s.last_acknowledged(), s.first_unacked());
        s.update_from_acknack(seq(3));
        assert_eq!((s.last_acknowledged(), s.first_unacked()), after_first);
        assert!(s.get(seq(2)).is_none());
        assert_eq!(s.get(seq(3)), Some(&[3u8][..]));
    }

    #[test]
    fn test_reliable_output_ack_never_rolls_back_or_passes_sent() {
        let mut s = ReliableOutputStream::default();
        for n in 0..3u8 {
            s.push(vec![n]);
        }
        s.update_from_acknack(seq(2));
        s.update_from_acknack(seq(0));
        assert_eq!(s.first_unacked(), seq(2));
        s.update_from_acknack(seq(100));
        assert_eq!(s.last_acknowledged(), seq(2));
        assert!(!s.message_pending());
    }

    #[test]
    fn test_fragment_buffer() {
        let mut f = FragmentBuffer::default();
        assert_eq!(f.push(&[1, 2], false).unwrap(), None);
        assert_eq!(f.push(&[3], false).unwrap(), None);
        assert_eq!(f.len(), 3);
        assert_eq!(f.push(&[4], true).unwrap(), Some(vec![1, 2, 3, 4]));
        assert!(f.is_empty());
    }

    #[test]
    fn test_fragment_buffer_overflow_resets() {
        let mut f = FragmentBuffer::default();
        let big = vec![0u8; MAX_REASSEMBLED_SIZE];
        assert!(f.push(&big, false).unwrap().is_none());
        assert!(matches!(f.push(&[1], true), Err(XrceError::Fragment(_))));
        assert!(f.is_empty());
    }
}
