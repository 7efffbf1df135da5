//! `BlockingPool` - fixed threads for BLOCK steps
//!
//! Spawns N OS threads at creation. Threads dequeue from a lock-free
//! bounded queue and run the job to completion; a job may block for as
//! long as its handler needs. No dynamic scaling.
//!
//! Admission mirrors the controller: a full queue or a stopped pool
//! rejects the job on the submitting thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use flowgate_core::error::{ConfigError, StepError, SubmitError};
use tracing::{debug, error, warn};

use crate::affinity::{pin_current_thread, CoreSet};
use crate::job::Job;
use crate::parking::{new_parking, WorkerParking};
use crate::tls::{set_role, ThreadRole};

/// Shared state between submitters and pool threads
struct PoolInner {
    queue: ArrayQueue<Box<dyn Job>>,
    parking: Box<dyn WorkerParking>,
    shutdown: AtomicBool,
    completed: AtomicU64,
    rejected: AtomicU64,
}

impl PoolInner {
    fn drain(&self) {
        while let Some(job) = self.queue.pop() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            job.reject(SubmitError::ShutDown);
        }
    }
}

pub struct BlockingPool {
    inner: Arc<PoolInner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    threads: usize,
}

impl BlockingPool {
    /// Create a pool with `threads` threads and `queue_size` pending slots
    pub fn new(
        threads: usize,
        queue_size: usize,
        cores: Option<CoreSet>,
        park_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if queue_size == 0 {
            return Err(ConfigError::ZeroBlockingQueueSize);
        }
        let inner = Arc::new(PoolInner {
            queue: ArrayQueue::new(queue_size),
            parking: new_parking(),
            shutdown: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        });

        let pool = BlockingPool {
            inner,
            handles: Mutex::new(Vec::with_capacity(threads)),
            threads,
        };
        for index in 0..threads {
            let inner = Arc::clone(&pool.inner);
            let cores = cores.clone();
            let handle = thread::Builder::new()
                .name(format!("flowgate-blocking-{index}"))
                .spawn(move || {
                    set_role(ThreadRole::Blocking(index));
                    if let Some(cores) = cores {
                        if let Err(e) = pin_current_thread(&cores) {
                            warn!(thread = index, %cores, error = %e, "pinning failed");
                        }
                    }
                    pool_loop(&inner, park_timeout);
                })
                .map_err(|source| ConfigError::Spawn {
                    role: "blocking",
                    source,
                })?;
            pool.lock_handles().push(handle);
        }

        debug!(threads, queue_size, "blocking pool started");
        Ok(pool)
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `job`; on error it has already been rejected
    pub fn submit(&self, job: Box<dyn Job>) -> Result<(), SubmitError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            self.inner.rejected.fetch_add(1, Ordering::Relaxed);
            job.reject(SubmitError::ShutDown);
            return Err(SubmitError::ShutDown);
        }
        match self.inner.queue.push(job) {
            Ok(()) => {
                self.inner.parking.wake_one();
                if self.inner.shutdown.load(Ordering::SeqCst) && self.lock_handles().is_empty() {
                    self.inner.drain();
                }
                Ok(())
            }
            Err(job) => {
                self.inner.rejected.fetch_add(1, Ordering::Relaxed);
                job.reject(SubmitError::QueueFull);
                Err(SubmitError::QueueFull)
            }
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Stop threads after their current job and reject what is queued
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.parking.wake_all();
        let handles: Vec<_> = self.lock_handles().drain(..).collect();
        let me = thread::current().id();
        for handle in handles {
            if handle.thread().id() != me {
                let _ = handle.join();
            }
        }
        self.inner.drain();
        debug!(completed = self.completed(), "blocking pool stopped");
    }
}

impl Drop for BlockingPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pool_loop(inner: &PoolInner, park_timeout: Duration) {
    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        if let Some(job) = inner.queue.pop() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job.run())) {
                error!(error = %StepError::from_panic(payload), "blocking task panicked");
            }
            inner.completed.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let token = inner.parking.prepare();
        if !inner.queue.is_empty() || inner.shutdown.load(Ordering::Acquire) {
            inner.parking.cancel();
        } else {
            inner.parking.park(token, Some(park_timeout));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct Sleep {
        tag: usize,
        millis: u64,
        tx: mpsc::Sender<Result<(usize, ThreadRole), SubmitError>>,
    }

    impl Job for Sleep {
        fn run(self: Box<Self>) {
            thread::sleep(Duration::from_millis(self.millis));
            let _ = self.tx.send(Ok((self.tag, crate::tls::current_role())));
        }

        fn expire(self: Box<Self>) {
            unreachable!("blocking pool never expires jobs");
        }

        fn reject(self: Box<Self>, reason: SubmitError) {
            let _ = self.tx.send(Err(reason));
        }
    }

    #[test]
    fn test_runs_in_parallel_on_blocking_threads() {
        let pool = BlockingPool::new(4, 16, None, Duration::from_millis(10)).unwrap();
        let (tx, rx) = mpsc::channel();

        let start = std::time::Instant::now();
        for tag in 0..4 {
            pool.submit(Box::new(Sleep { tag, millis: 100, tx: tx.clone() })).unwrap();
        }
        for _ in 0..4 {
            let (_, role) = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
            assert!(role.is_blocking());
        }
        // Four 100ms sleeps overlapped
        assert!(start.elapsed() < Duration::from_millis(350));
        assert_eq!(pool.completed(), 4);
    }

    #[test]
    fn test_full_queue_rejects() {
        let pool = BlockingPool::new(1, 1, None, Duration::from_millis(10)).unwrap();
        let (tx, rx) = mpsc::channel();

        pool.submit(Box::new(Sleep { tag: 0, millis: 200, tx: tx.clone() })).unwrap();
        while pool.pending() > 0 {
            thread::yield_now();
        }
        pool.submit(Box::new(Sleep { tag: 1, millis: 0, tx: tx.clone() })).unwrap();
        let err = pool.submit(Box::new(Sleep { tag: 2, millis: 0, tx: tx.clone() }));
        assert_eq!(err, Err(SubmitError::QueueFull));
        assert_eq!(rx.try_recv().unwrap(), Err(SubmitError::QueueFull));
    }

    #[test]
    fn test_shutdown_rejects_later_work() {
        let pool = BlockingPool::new(1, 4, None, Duration::from_millis(10)).unwrap();
        pool.shutdown();
        let (tx, rx) = mpsc::channel();
        assert_eq!(
            pool.submit(Box::new(Sleep { tag: 0, millis: 0, tx })),
            Err(SubmitError::ShutDown)
        );
        assert_eq!(rx.recv().unwrap(), Err(SubmitError::ShutDown));
    }

    #[test]
    fn test_zero_queue_is_config_error() {
        assert!(matches!(
            BlockingPool::new(1, 0, None, Duration::from_millis(10)),
            Err(ConfigError::ZeroBlockingQueueSize)
        ));
    }
}
