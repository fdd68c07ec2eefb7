// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// XCDR reader/writer for submessage payloads.
//
// Primitives are aligned to their own size relative to the start of the
// payload, which itself starts 4-byte aligned inside the message. Byte order
// follows the submessage endianness flag.

use crate::error::XrceError;

/// Cursor over a submessage payload.
pub struct CdrReader<'a> {
    buf: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> CdrReader<'a> {
    pub fn new(buf: &'a [u8], little_endian: bool) -> Self {
        Self {
            buf,
            pos: 0,
            little_endian,
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn align(&mut self, n: usize) {
        let rem = self.pos % n;
        if rem != 0 {
            self.pos += n - rem;
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], XrceError> {
        let end = self.pos.checked_add(n).ok_or(XrceError::BufferTooShort)?;
        if end > self.buf.len() {
            return Err(XrceError::BufferTooShort);
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, XrceError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, XrceError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(XrceError::InvalidData(format!("bad boolean 0x{:02x}", v))),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, XrceError> {
        self.align(2);
        let b = self.take(2)?;
        let raw = [b[0], b[1]];
        Ok(if self.little_endian {
            u16::from_le_bytes(raw)
        } else {
            u16::from_be_bytes(raw)
        })
    }

    pub fn read_i16(&mut self) -> Result<i16, XrceError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32, XrceError> {
        self.align(4);
        let b = self.take(4)?;
        let raw = [b[0], b[1], b[2], b[3]];
        Ok(if self.little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    pub fn read_i32(&mut self) -> Result<i32, XrceError> {
        Ok(self.read_u32()? as i32)
    }

    /// Fixed-size octet array (no alignment, no length prefix).
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], XrceError> {
        let b = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(b);
        Ok(out)
    }

    /// `u32` length followed by that many octets.
    pub fn read_sequence(&mut self) -> Result<Vec<u8>, XrceError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// CDR string: `u32` length including the terminating NUL, then bytes.
    pub fn read_string(&mut self) -> Result<String, XrceError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        let text = match bytes.split_last() {
            Some((0, body)) => body,
            Some(_) => bytes,
            None => &[][..],
        };
        String::from_utf8(text.to_vec())
            .map_err(|_| XrceError::InvalidData("string is not UTF-8".into()))
    }

    /// Everything after the cursor (used for raw sample data).
    pub fn read_rest(&mut self) -> &'a [u8] {
        let start = self.pos.min(self.buf.len());
        self.pos = self.buf.len();
        &self.buf[start..]
    }
}

/// Growable payload writer. Always little-endian, matching the endianness
/// flag the agent sets on every submessage it emits.
#[derive(Debug, Default)]
pub struct CdrWriter {
    buf: Vec<u8>,
}

impl CdrWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn align(&mut self, n: usize) {
        while self.buf.len() % n != 0 {
            self.buf.push(0);
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn write_u16(&mut self, v: u16) {
        self.align(2);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.write_u16(v as u16);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.align(4);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_u32(v as u32);
    }

    pub fn write_array(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_sequence(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_u32(s.len() as u32 + 1);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_relative_to_payload_start() {
        let mut w = CdrWriter::new();
        w.write_u8(7);
        w.write_u16(0x1234);
        w.write_u8(1);
        w.write_u32(0xAABBCCDD);
        let bytes = w.into_bytes();
        assert_eq!(bytes, vec![7, 0, 0x34, 0x12, 1, 0, 0, 0, 0xDD, 0xCC, 0xBB, 0xAA]);

        let mut r = CdrReader::new(&bytes, true);
        assert_eq!(r.read_u8().unwrap(), 7);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u8().unwrap(), 1);
        assert_eq!(r.read_u32().unwrap(), 0xAABBCCDD);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_big_endian_read() {
        let bytes = [0x12, 0x34, 0, 0, 0, 0, 0, 5];
        let mut r = CdrReader::new(&bytes, false);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 5);
    }

    #[test]
    fn test_string_includes_terminator() {
        let mut w = CdrWriter::new();
        w.write_string("topic");
        let bytes = w.into_bytes();
        assert_eq!(&bytes[..4], &6u32.to_le_bytes());
        assert_eq!(bytes.last(), Some(&0));
        let mut r = CdrReader::new(&bytes, true);
        assert_eq!(r.read_string().unwrap(), "topic");
    }

    #[test]
    fn test_short_buffer_is_an_error() {
        let mut r = CdrReader::new(&[1, 0], true);
        assert_eq!(r.read_u32(), Err(XrceError::BufferTooShort));
        let mut r = CdrReader::new(&[10, 0, 0, 0, b'a'], true);
        assert_eq!(r.read_sequence(), Err(XrceError::BufferTooShort));
    }

    #[test]
    fn test_bad_bool() {
        let mut r = CdrReader::new(&[2], true);
        assert!(matches!(r.read_bool(), Err(XrceError::InvalidData(_))));
    }
}
