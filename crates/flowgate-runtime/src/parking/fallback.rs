//! Fallback parking using std::sync::Condvar
//!
//! Same epoch protocol as the futex version, with the epoch guarded by a
//! mutex. Used on platforms without futex support.

use super::WorkerParking;
use std::sync::atomic::{self, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Condvar-based parking
pub struct FallbackParking {
    epoch: Mutex<u32>,
    condvar: Condvar,
    parked: AtomicUsize,
}

impl FallbackParking {
    pub fn new() -> Self {
        Self {
            epoch: Mutex::new(0),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }

    // Epoch is a plain counter; a poisoned lock still holds a usable value.
    fn lock(&self) -> MutexGuard<'_, u32> {
        self.epoch.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bump(&self) -> bool {
        atomic::fence(Ordering::SeqCst);
        if self.parked.load(Ordering::Relaxed) == 0 {
            return false;
        }
        let mut epoch = self.lock();
        *epoch = epoch.wrapping_add(1);
        true
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FallbackParking {
    fn prepare(&self) -> u32 {
        self.parked.fetch_add(1, Ordering::SeqCst);
        atomic::fence(Ordering::SeqCst);
        *self.lock()
    }

    fn cancel(&self) {
        self.parked.fetch_sub(1, Ordering::SeqCst);
    }

    fn park(&self, token: u32, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.lock();
        let woken = loop {
            if *guard != token {
                break true;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break false;
                    }
                    guard = self
                        .condvar
                        .wait_timeout(guard, deadline - now)
                        .map(|(g, _)| g)
                        .unwrap_or_else(|e| e.into_inner().0);
                }
                None => {
                    guard = self.condvar.wait(guard).unwrap_or_else(|e| e.into_inner());
                }
            }
        };
        drop(guard);
        self.parked.fetch_sub(1, Ordering::SeqCst);
        woken
    }

    fn wake_one(&self) {
        if self.bump() {
            self.condvar.notify_one();
        }
    }

    fn wake_all(&self) {
        if self.bump() {
            self.condvar.notify_all();
        }
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
