// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! 16-bit XRCE sequence numbers with circular ordering.
//!
//! XRCE streams number their messages with a `u16` that wraps around. Two
//! sequence numbers are ordered by the forward distance between them: `a < b`
//! when `b` lies less than half the sequence space ahead of `a`. This keeps
//! ordering stable across the 65535 -> 0 wrap.
//!
//! ```ignore
//! assert!(SeqNum::new(65535) < SeqNum::new(2));
//! assert_eq!(SeqNum::new(65535) + 3, SeqNum::new(2));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Half of the sequence space; distances at or beyond it are "behind".
const SEQ_HALF_RANGE: u16 = 0x8000;

/// Wraparound-safe 16-bit sequence number.
///
/// Stream cursors must be compared through `PartialOrd` only. When two values
/// are exactly half the space apart, neither is smaller and `partial_cmp`
/// returns `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNum(u16);

impl SeqNum {
    /// Highest raw value; the initial cursor of every stream, so that the
    /// first message carries sequence 0.
    pub const MAX: SeqNum = SeqNum(u16::MAX);

    #[inline]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw wire value.
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Forward distance from `self` to `other`, modulo 65536.
    #[inline]
    pub fn distance_to(self, other: SeqNum) -> u16 {
        other.0.wrapping_sub(self.0)
    }
}

impl From<u16> for SeqNum {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<SeqNum> for u16 {
    fn from(seq: SeqNum) -> Self {
        seq.0
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for SeqNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.0 == other.0 {
            return Some(Ordering::Equal);
        }
        match self.distance_to(*other) {
            d if d < SEQ_HALF_RANGE => Some(Ordering::Less),
            d if d > SEQ_HALF_RANGE => Some(Ordering::Greater),
            _ => None,
        }
    }
}

impl Add<u16> for SeqNum {
    type Output = SeqNum;

    #[inline]
    fn add(self, rhs: u16) -> SeqNum {
        SeqNum(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u16> for SeqNum {
    #[inline]
    fn add_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub<u16> for SeqNum {
    type Output = SeqNum;

    #[inline]
    fn sub(self, rhs: u16) -> SeqNum {
        SeqNum(self.0.wrapping_sub(rhs))
    }
}

impl SubAssign<u16> for SeqNum {
    #[inline]
    fn sub_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_sub(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraparound_ordering() {
        assert!(SeqNum::new(65535) < SeqNum::new(2));
        assert!(SeqNum::new(2) > SeqNum::new(65535));
        assert!(SeqNum::new(0) < SeqNum::new(1));
        assert!(!(SeqNum::new(5) < SeqNum::new(5)));
        assert!(SeqNum::new(5) <= SeqNum::new(5));
    }

    #[test]
    fn test_half_range_is_unordered() {
        let a = SeqNum::new(0);
        let b = SeqNum::new(0x8000);
        assert_eq!(a.partial_cmp(&b), None);
        assert!(!(a < b));
        assert!(!(b < a));
    }

    #[test]
    fn test_near_half_range() {
        assert!(SeqNum::new(0) < SeqNum::new(0x7FFF));
        assert!(SeqNum::new(0) > SeqNum::new(0x8001));
    }

    #[test]
    fn test_arithmetic_wraps() {
        assert_eq!(SeqNum::MAX + 1, SeqNum::new(0));
        assert_eq!(SeqNum::new(0) - 1, SeqNum::MAX);
        let mut s = SeqNum::new(65530);
        s += 10;
        assert_eq!(s.get(), 4);
        s -= 5;
        assert_eq!(s.get(), 65535);
    }

    #[test]
    fn test_total_order_within_window() {
        // A run that crosses the wrap point stays strictly increasing.
        let base = SeqNum::new(65530);
        for i in 0..20u16 {
            for j in (i + 1)..20u16 {
                assert!(base + i < base + j, "{} < {}", base + i, base + j);
            }
        }
    }

    #[test]
    fn test_distance() {
        assert_eq!(SeqNum::new(65535).distance_to(SeqNum::new(2)), 3);
        assert_eq!(SeqNum::new(2).distance_to(SeqNum::new(2)), 0);
    }
}
