//! Process-wide monotonic clock
//!
//! Deadlines are carried as `Instant`s, but lock-free structures need them
//! as plain integers. Nanoseconds are counted from a lazily fixed epoch.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

#[inline]
fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Nanoseconds since the process epoch
#[inline]
pub fn now_ns() -> u64 {
    instant_ns(Instant::now())
}

/// Convert an `Instant` to nanoseconds since the process epoch
///
/// Instants before the epoch clamp to 0.
#[inline]
pub fn instant_ns(at: Instant) -> u64 {
    at.saturating_duration_since(epoch()).as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_monotonic() {
        let a = now_ns();
        std::thread::sleep(Duration::from_millis(2));
        let b = now_ns();
        assert!(b > a);
    }

    #[test]
    fn test_instant_ns_ordering() {
        let _ = now_ns();
        let now = Instant::now();
        let later = now + Duration::from_millis(5);
        assert_eq!(instant_ns(later) - instant_ns(now), 5_000_000);
    }
}
