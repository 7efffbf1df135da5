//! Worker parking mechanism
//!
//! Idle compute workers sleep here instead of spinning. The primitive is an
//! event count: a worker announces itself with `prepare`, re-checks its
//! queues, then parks on the token it got. Any wake issued after `prepare`
//! bumps the epoch, so the park returns immediately instead of missing it.
//!
//! ```text
//! worker                              producer
//! ------                              --------
//! token = prepare()                   queue.push(job)
//! if queues non-empty { cancel() }    wake_one()
//! else { park(token, timeout) }
//! ```

use std::time::Duration;

/// Platform-specific worker parking
pub trait WorkerParking: Send + Sync {
    /// Register as about to park; returns the epoch token to park on
    fn prepare(&self) -> u32;

    /// Withdraw a `prepare` without parking (work turned up)
    fn cancel(&self);

    /// Sleep until the epoch moves past `token` or `timeout` elapses
    ///
    /// Returns `true` if woken by `wake_one`/`wake_all`. Callers re-check
    /// for work regardless of the return value.
    fn park(&self, token: u32, timeout: Option<Duration>) -> bool;

    /// Wake one parked worker (no-op when none are parked)
    fn wake_one(&self);

    /// Wake every parked worker; used at shutdown
    fn wake_all(&self);

    /// Number of prepared or parked workers (hint, may be stale)
    fn parked_count(&self) -> usize;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

/// Create a new platform-appropriate parking instance
pub fn new_parking() -> Box<dyn WorkerParking> {
    Box::new(PlatformParking::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_park_timeout() {
        let parking = new_parking();
        let token = parking.prepare();
        let start = Instant::now();
        let woken = parking.park(token, Some(Duration::from_millis(50)));
        let elapsed = start.elapsed();

        assert!(!woken);
        assert!(elapsed >= Duration::from_millis(40));
        assert_eq!(parking.parked_count(), 0);
    }

    #[test]
    fn test_wake_one() {
        let parking = Arc::new(PlatformParking::new());
        let parking2 = Arc::clone(&parking);

        let handle = thread::spawn(move || {
            let token = parking2.prepare();
            parking2.park(token, Some(Duration::from_secs(10)))
        });

        while parking.parked_count() == 0 {
            thread::yield_now();
        }
        let start = Instant::now();
        parking.wake_one();

        // Woken by the signal, well before the 10s timeout
        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wake_between_prepare_and_park_is_not_lost() {
        let parking = new_parking();
        let token = parking.prepare();
        parking.wake_one();

        let start = Instant::now();
        assert!(parking.park(token, Some(Duration::from_secs(10))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_cancel() {
        let parking = new_parking();
        let _ = parking.prepare();
        assert_eq!(parking.parked_count(), 1);
        parking.cancel();
        assert_eq!(parking.parked_count(), 0);
    }
}
