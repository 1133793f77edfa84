//! Sequence numbers, identifiers and time.
//!
//! TSNs and SSNs wrap; comparisons use serial-number arithmetic (RFC 1982).
//! Queues that need a total order unwrap them onto a 64-bit line first.

use std::fmt;
use std::ops::Add;
use std::time::Duration;

/// Transmission Sequence Number of a DATA chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tsn(pub u32);

impl Tsn {
    pub fn next(self) -> Tsn {
        Tsn(self.0.wrapping_add(1))
    }

    pub fn prev(self) -> Tsn {
        Tsn(self.0.wrapping_sub(1))
    }

    pub fn offset(self, n: u32) -> Tsn {
        Tsn(self.0.wrapping_add(n))
    }

    /// True if `self` comes strictly after `other` in serial order.
    pub fn is_after(self, other: Tsn) -> bool {
        tsn_gt(self.0, other.0)
    }
}

impl fmt::Display for Tsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serial-number "greater than" for 32-bit TSNs.
pub fn tsn_gt(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < (1 << 31)
}

/// Stream Sequence Number, per stream, for ordered delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ssn(pub u16);

impl Ssn {
    pub fn next(self) -> Ssn {
        Ssn(self.0.wrapping_add(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId(pub u16);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied tag correlating a sent message with its lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LifecycleId(pub u64);

impl fmt::Display for LifecycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Milliseconds on the injected clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs.as_millis() as u64))
    }
}

fn unwrap_serial(last: Option<u64>, value: u64, modulus: u64) -> u64 {
    let Some(last) = last else {
        // Start one full cycle up so values just behind the first stay positive.
        return modulus + value;
    };
    let half = modulus / 2;
    let candidate = last - last % modulus + value;
    if candidate + half < last {
        candidate + modulus
    } else if candidate > last + half && candidate >= modulus {
        candidate - modulus
    } else {
        candidate
    }
}

/// Maps wrapping TSNs onto monotonically increasing `u64` values.
#[derive(Debug, Clone, Default)]
pub struct TsnUnwrapper {
    largest: Option<u64>,
}

impl TsnUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unwraps `tsn` and remembers it as a reference point if it is the newest.
    pub fn unwrap(&mut self, tsn: Tsn) -> u64 {
        let value = self.peek(tsn);
        self.largest = Some(self.largest.map_or(value, |l| l.max(value)));
        value
    }

    /// Unwraps without moving the reference point.
    pub fn peek(&self, tsn: Tsn) -> u64 {
        unwrap_serial(self.largest, tsn.0 as u64, 1 << 32)
    }

    pub fn rewrap(value: u64) -> Tsn {
        Tsn(value as u32)
    }
}

/// Maps wrapping SSNs onto monotonically increasing `u64` values.
#[derive(Debug, Clone, Default)]
pub struct SsnUnwrapper {
    largest: Option<u64>,
}

impl SsnUnwrapper {
    pub fn unwrap(&mut self, ssn: Ssn) -> u64 {
        let value = unwrap_serial(self.largest, ssn.0 as u64, 1 << 16);
        self.largest = Some(self.largest.map_or(value, |l| l.max(value)));
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsn_comparison() {
        assert!(tsn_gt(2, 1));
        assert!(!tsn_gt(1, 2));
        assert!(!tsn_gt(7, 7));
        assert!(tsn_gt(0, 0xFFFFFFFF));
        assert!(tsn_gt(10, 0xFFFFFFF0));
    }

    #[test]
    fn test_tsn_helpers_wrap() {
        assert_eq!(Tsn(u32::MAX).next(), Tsn(0));
        assert_eq!(Tsn(0).prev(), Tsn(u32::MAX));
        assert!(Tsn(3).is_after(Tsn(u32::MAX - 2)));
    }

    #[test]
    fn test_tsn_unwrapper_across_wrap() {
        let mut unwrapper = TsnUnwrapper::new();
        let a = unwrapper.unwrap(Tsn(u32::MAX - 1));
        let b = unwrapper.unwrap(Tsn(u32::MAX));
        let c = unwrapper.unwrap(Tsn(0));
        let d = unwrapper.unwrap(Tsn(5));
        assert_eq!(b, a + 1);
        assert_eq!(c, b + 1);
        assert_eq!(d, c + 5);
    }

    #[test]
    fn test_tsn_unwrapper_older_values() {
        let mut unwrapper = TsnUnwrapper::new();
        let base = unwrapper.unwrap(Tsn(3));
        assert_eq!(unwrapper.peek(Tsn(1)), base - 2);
        assert_eq!(unwrapper.unwrap(Tsn(u32::MAX)), base - 4);
        // Reference point stays at the newest value seen.
        assert_eq!(unwrapper.peek(Tsn(4)), base + 1);
        assert_eq!(TsnUnwrapper::rewrap(base + 1), Tsn(4));
    }

    #[test]
    fn test_ssn_unwrapper_wraps_at_16_bits() {
        let mut unwrapper = SsnUnwrapper::default();
        let a = unwrapper.unwrap(Ssn(u16::MAX));
        let b = unwrapper.unwrap(Ssn(0));
        assert_eq!(b, a + 1);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::from_millis(1_000);
        assert_eq!((t + Duration::from_millis(250)).as_millis(), 1_250);
        assert_eq!(
            Timestamp::from_millis(1_300).saturating_since(t),
            Duration::from_millis(300)
        );
        assert_eq!(t.saturating_since(Timestamp::from_millis(2_000)), Duration::ZERO);
    }
}
