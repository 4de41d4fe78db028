use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::FrameError;

/// Correlation token between an [`crate::Method`] invocation and its
/// response or exception.
///
/// Kept as a numeric type internally and rendered as a plain ASCII decimal
/// string only when a [`crate::Frame`] is encoded. No wraparound: a `u64`
/// counter never needs to reset to stay within a printable width, so it
/// simply never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(value: u64) -> Self {
        RequestId(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(RequestId)
            .map_err(|_| FrameError::InvalidUtf8 { field: "requestId" })
    }
}

/// Monotonic generator for outgoing requestIds, one per [`crate`] client
/// session. Starts at 1 so `0` stays available as a sentinel for
/// synthetic/internal frames that never round-trip the wire.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        RequestIdGenerator {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> RequestId {
        RequestId(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_is_monotonic() {
        let gen = RequestIdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert!(b.get() > a.get());
    }

    #[test]
    fn round_trips_through_string() {
        let id = RequestId::new(42);
        let parsed: RequestId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
