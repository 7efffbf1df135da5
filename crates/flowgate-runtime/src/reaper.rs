//! Deadline reaper thread
//!
//! A single thread that enforces deadlines nobody else is watching:
//!
//! 1. Suspended exchanges (ASYNC steps) register an `Expire` target with
//!    their deadline. Targets are kept in a min-heap and expired in order.
//! 2. Every tick, a sweep callback drops queued tasks whose queue budget
//!    ran out (`WorkQueue::try_pop_expired`).
//!
//! Registration is lock-free: targets land in an inbox that only the
//! reaper thread drains into its heap.
//!
//! On shutdown every target still waiting is expired, so no suspended
//! exchange is left without an outcome.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use flowgate_core::clock::instant_ns;
use flowgate_core::error::ConfigError;
use tracing::{debug, trace};

use crate::job::Expire;
use crate::tls::{set_role, ThreadRole};

struct Entry {
    deadline: Instant,
    seq: u64,
    target: Arc<dyn Expire>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: earliest deadline on top, registration order breaks ties
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    inbox: SegQueue<Entry>,
    next_seq: AtomicU64,
    shutdown: AtomicBool,
    /// Set once the thread is gone; late registrations expire inline
    stopped: AtomicBool,
    expired: AtomicU64,
}

impl Inner {
    fn expire_inbox(&self) {
        while let Some(entry) = self.inbox.pop() {
            self.expired.fetch_add(1, Ordering::Relaxed);
            entry.target.expire();
        }
    }
}

/// Handle to the reaper thread
pub struct Reaper {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Reaper {
    /// Spawn the reaper
    ///
    /// `sweep` runs once per tick with the current time in clock
    /// nanoseconds (see `flowgate_core::clock`).
    pub fn start<F>(interval: Duration, sweep: F) -> Result<Self, ConfigError>
    where
        F: Fn(u64) + Send + 'static,
    {
        let inner = Arc::new(Inner {
            inbox: SegQueue::new(),
            next_seq: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            expired: AtomicU64::new(0),
        });

        let thread_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("flowgate-reaper".into())
            .spawn(move || reaper_loop(thread_inner, interval, sweep))
            .map_err(|source| ConfigError::Spawn {
                role: "reaper",
                source,
            })?;

        Ok(Self {
            inner,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Expire `target` once `deadline` passes
    pub fn register(&self, deadline: Instant, target: Arc<dyn Expire>) {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        self.inner.inbox.push(Entry {
            deadline,
            seq,
            target,
        });
        if self.inner.stopped.load(Ordering::SeqCst) {
            self.inner.expire_inbox();
        }
    }

    /// Targets expired so far
    pub fn expired_count(&self) -> u64 {
        self.inner.expired.load(Ordering::Relaxed)
    }

    /// Stop the thread, expiring everything still registered
    ///
    /// Idempotent. Safe to call from the reaper thread itself.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.expire_inbox();
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reaper_loop<F>(inner: Arc<Inner>, interval: Duration, sweep: F)
where
    F: Fn(u64),
{
    set_role(ThreadRole::Reaper);
    debug!(?interval, "reaper started");

    let mut heap: BinaryHeap<Entry> = BinaryHeap::new();

    while !inner.shutdown.load(Ordering::Acquire) {
        while let Some(entry) = inner.inbox.pop() {
            heap.push(entry);
        }

        let now = Instant::now();
        while heap.peek().is_some_and(|e| e.deadline <= now) {
            if let Some(entry) = heap.pop() {
                trace!(seq = entry.seq, "deadline passed");
                inner.expired.fetch_add(1, Ordering::Relaxed);
                entry.target.expire();
            }
        }

        sweep(instant_ns(now));

        let sleep = match heap.peek() {
            Some(next) => next.deadline.saturating_duration_since(Instant::now()).min(interval),
            None => interval,
        };
        if !sleep.is_zero() {
            thread::sleep(sleep);
        }
    }

    let remaining = heap.len();
    for entry in heap.into_vec() {
        inner.expired.fetch_add(1, Ordering::Relaxed);
        entry.target.expire();
    }
    debug!(remaining, "reaper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    impl Expire for Counter {
        fn expire(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter() -> Arc<Counter> {
        Arc::new(Counter(AtomicUsize::new(0)))
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let until = Instant::now() + Duration::from_secs(5);
        while Instant::now() < until {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_expires_after_deadline() {
        let reaper = Reaper::start(Duration::from_millis(1), |_| {}).unwrap();
        let early = counter();
        let late = counter();

        let now = Instant::now();
        reaper.register(now + Duration::from_millis(20), early.clone());
        reaper.register(now + Duration::from_secs(60), late.clone());

        assert!(wait_for(|| early.0.load(Ordering::SeqCst) == 1));
        assert_eq!(late.0.load(Ordering::SeqCst), 0);
        assert!(now.elapsed() >= Duration::from_millis(20));

        // Shutdown expires what is left, exactly once
        reaper.shutdown();
        reaper.shutdown();
        assert_eq!(late.0.load(Ordering::SeqCst), 1);
        assert_eq!(early.0.load(Ordering::SeqCst), 1);
        assert_eq!(reaper.expired_count(), 2);
    }

    #[test]
    fn test_register_after_shutdown_expires_inline() {
        let reaper = Reaper::start(Duration::from_millis(1), |_| {}).unwrap();
        reaper.shutdown();

        let target = counter();
        reaper.register(Instant::now() + Duration::from_secs(60), target.clone());
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sweep_runs_every_tick() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&ticks);
        let reaper = Reaper::start(Duration::from_millis(1), move |_now_ns| {
            t.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert!(wait_for(|| ticks.load(Ordering::SeqCst) >= 5));
        drop(reaper);
    }
}
