// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serial line framing.
//!
//! ```text
//! 0x7E | src | dst | len (u16 LE) | payload | crc (u16 LE)
//! ```
//!
//! Every byte after the leading flag that equals `0x7E` or `0x7D` is sent as
//! `0x7D, byte ^ 0x20`. The CRC is CRC-16/ARC over the payload. An unescaped
//! `0x7E` anywhere restarts the frame.

/// Frame delimiter.
pub const FRAMING_BEGIN_FLAG: u8 = 0x7E;
/// Escape marker.
pub const FRAMING_ESC_FLAG: u8 = 0x7D;
/// XOR applied to escaped bytes.
pub const FRAMING_XOR_FLAG: u8 = 0x20;

// CRC-16/ARC, reflected polynomial 0x8005.
const CRC16_POLY_REFLECTED: u16 = 0xA001;

/// CRC-16/ARC (init 0, reflected, no final xor).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &b in data {
        crc ^= u16::from(b);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ CRC16_POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn push_escaped(out: &mut Vec<u8>, b: u8) {
    if b == FRAMING_BEGIN_FLAG || b == FRAMING_ESC_FLAG {
        out.push(FRAMING_ESC_FLAG);
        out.push(b ^ FRAMING_XOR_FLAG);
    } else {
        out.push(b);
    }
}

/// Build a complete frame.
pub fn encode_frame(src: u8, dst: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.push(FRAMING_BEGIN_FLAG);
    push_escaped(&mut out, src);
    push_escaped(&mut out, dst);
    let len = (payload.len() as u16).to_le_bytes();
    push_escaped(&mut out, len[0]);
    push_escaped(&mut out, len[1]);
    for &b in payload {
        push_escaped(&mut out, b);
    }
    let crc = crc16(payload).to_le_bytes();
    push_escaped(&mut out, crc[0]);
    push_escaped(&mut out, crc[1]);
    out
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub src: u8,
    pub dst: u8,
    pub payload: Vec<u8>,
}

/// Why a frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Declared length above the decoder limit.
    TooLong(u16),
    /// CRC mismatch.
    BadCrc { expected: u16, actual: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    WaitingBegin,
    SrcAddr,
    DstAddr,
    SizeLsb,
    SizeMsb,
    Payload,
    CrcLsb,
    CrcMsb,
}

/// Byte-at-a-time frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    escaped: bool,
    max_payload: usize,
    src: u8,
    dst: u8,
    len: u16,
    payload: Vec<u8>,
    crc: u16,
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: DecodeState::WaitingBegin,
            escaped: false,
            max_payload,
            src: 0,
            dst: 0,
            len: 0,
            payload: Vec::new(),
            crc: 0,
        }
    }

    /// Feed one raw byte. Returns a frame once its last CRC byte arrives.
    pub fn push(&mut self, raw: u8) -> Option<Result<Frame, FrameError>> {
        if raw == FRAMING_BEGIN_FLAG {
            self.restart();
            return None;
        }
        if self.state == DecodeState::WaitingBegin {
            return None;
        }
        if raw == FRAMING_ESC_FLAG && !self.escaped {
            self.escaped = true;
            return None;
        }
        let b = if self.escaped {
            self.escaped = false;
            raw ^ FRAMING_XOR_FLAG
        } else {
            raw
        };

        match self.state {
            DecodeState::WaitingBegin => None,
            DecodeState::SrcAddr => {
                self.src = b;
                self.state = DecodeState::DstAddr;
                None
            }
            DecodeState::DstAddr => {
                self.dst = b;
                self.state = DecodeState::SizeLsb;
                None
            }
            DecodeState::SizeLsb => {
                self.len = u16::from(b);
                self.state = DecodeState::SizeMsb;
                None
            }
            DecodeState::SizeMsb => {
                self.len |= u16::from(b) << 8;
                if usize::from(self.len) > self.max_payload {
                    self.state = DecodeState::WaitingBegin;
                    return Some(Err(FrameError::TooLong(self.len)));
                }
                self.state = if self.len == 0 {
                    DecodeState::CrcLsb
                } else {
                    DecodeState::Payload
                };
                None
            }
            DecodeState::Payload => {
                self.payload.push(b);
                if self.payload.len() == usize::from(self.len) {
                    self.state = DecodeState::CrcLsb;
                }
                None
            }
            DecodeState::CrcLsb => {
                self.crc = u16::from(b);
                self.state = DecodeState::CrcMsb;
                None
            }
            DecodeState::CrcMsb => {
                self.crc |= u16::from(b) << 8;
                self.state = DecodeState::WaitingBegin;
                let payload = std::mem::take(&mut self.payload);
                let actual = crc16(&payload);
                if actual != self.crc {
                    return Some(Err(FrameError::BadCrc {
                        expected: self.crc,
                        actual,
                    }));
                }
                Some(Ok(Frame {
                    src: self.src,
                    dst: self.dst,
                    payload,
                }))
            }
        }
    }

    fn restart(&mut self) {
        self.state = DecodeState::SrcAddr;
        self.escaped = false;
        self.payload.clear();
        self.len = 0;
        self.crc = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(dec: &mut FrameDecoder, bytes: &[u8]) -> Vec<Result<Frame, FrameError>> {
        bytes.iter().filter_map(|&b| dec.push(b)).collect()
    }

    #[test]
    fn test_crc16_arc_check_value() {
        assert_eq!(crc16(b"123456789"), 0xBB3D);
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn test_frame_roundtrip_with_escapes() {
        let payload = [0x01, 0x7E, 0x02, 0x7D, 0x03];
        let wire = encode_frame(0x00, 0x7E, &payload);
        assert_eq!(wire.iter().filter(|&&b| b == FRAMING_BEGIN_FLAG).count(), 1);

        let mut dec = FrameDecoder::new(512);
        let frames = decode_all(&mut dec, &wire);
        assert_eq!(
            frames,
            vec![Ok(Frame {
                src: 0x00,
                dst: 0x7E,
                payload: payload.to_vec()
            })]
        );
    }

    #[test]
    fn test_garbage_before_begin_is_ignored() {
        let mut wire = vec![0x11, 0x22, 0x33];
        wire.extend(encode_frame(1, 0, b"hello"));
        let mut dec = FrameDecoder::new(512);
        let frames = decode_all(&mut dec, &wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap().payload, b"hello");
    }

    #[test]
    fn test_begin_restarts_partial_frame() {
        let first = encode_frame(1, 0, b"lost");
        let mut wire = first[..4].to_vec();
        wire.extend(encode_frame(2, 0, b"kept"));
        let mut dec = FrameDecoder::new(512);
        let frames = decode_all(&mut dec, &wire);
        assert_eq!(frames.len(), 1);
        let f = frames[0].as_ref().unwrap();
        assert_eq!((f.src, f.payload.as_slice()), (2, &b"kept"[..]));
    }

    #[test]
    fn test_bad_crc_is_reported() {
        let mut wire = encode_frame(1, 0, b"abc");
        let n = wire.len();
        wire[n - 1] ^= 0x01;
        let mut dec = FrameDecoder::new(512);
        let frames = decode_all(&mut dec, &wire);
        assert!(matches!(frames.as_slice(), [Err(FrameError::BadCrc { .. })]));
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let wire = encode_frame(1, 0, &[0u8; 100]);
        let mut dec = FrameDecoder::new(64);
        let frames = decode_all(&mut dec, &wire);
        assert_eq!(frames, vec![Err(FrameError::TooLong(100))]);
    }

    #[test]
    fn test_empty_payload() {
        let wire = encode_frame(3, 4, &[]);
        let mut dec = FrameDecoder::new(64);
        let frames = decode_all(&mut dec, &wire);
        assert_eq!(
            frames,
            vec![Ok(Frame {
                src: 3,
                dst: 4,
                payload: vec![]
            })]
        );
    }
}
