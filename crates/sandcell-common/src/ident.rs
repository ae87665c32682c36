//! Record identifiers.
//!
//! Identifiers are the nanoseconds elapsed since an epoch fixed when the
//! generator is created, written in base 36. The epoch is anchored to the
//! wall clock so a restarted server does not hand out identifiers it used
//! before, while the elapsed part comes from the monotonic clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Width of an encoded identifier. `36^13 > u64::MAX`, so every value fits
/// and lexicographic order matches numeric order.
pub const ID_WIDTH: usize = 13;

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Hands out strictly increasing identifiers.
#[derive(Debug)]
pub struct IdGenerator {
    origin: Instant,
    base_nanos: u64,
    last: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        let base_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX / 2))
            .unwrap_or(0);
        Self {
            origin: Instant::now(),
            base_nanos,
            last: AtomicU64::new(0),
        }
    }

    /// Returns the next identifier.
    ///
    /// When the clock has not advanced since the previous call the value is
    /// bumped by one, so back-to-back and concurrent calls never collide.
    pub fn next(&self) -> String {
        encode_base36(self.next_value())
    }

    fn next_value(&self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let now = self.base_nanos.saturating_add(elapsed);

        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes `value` as zero-padded base 36.
pub fn encode_base36(mut value: u64) -> String {
    let mut buf = [b'0'; ID_WIDTH];
    for slot in buf.iter_mut().rev() {
        *slot = DIGITS[(value % 36) as usize];
        value /= 36;
        if value == 0 {
            break;
        }
    }
    buf.iter().map(|&b| b as char).collect()
}
