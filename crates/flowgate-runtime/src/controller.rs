//! Compute controller
//!
//! Owns the compute workers, their work queues and the deadline reaper.
//!
//! # Admission
//!
//! `submit` tries each queue once, starting from a rotating index, and
//! refuses the task only when every queue is full. A refused task is
//! rejected on the submitting thread before `submit` returns.
//!
//! # Queue budget
//!
//! Every task carries the instant past which it must not start. Stale
//! tasks are dropped (`Job::expire`) by whichever comes first: a worker
//! finding one at the head of its queue, or the reaper's periodic sweep.
//!
//! # Worker loop
//!
//! ```text
//! loop {
//!     shutdown?          -> exit
//!     expired head?      -> job.expire()
//!     pending task?      -> job.run()
//!     spun < idle_spins? -> spin, yield
//!     else               -> park (event count, bounded by park_timeout)
//! }
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use flowgate_core::clock::{instant_ns, now_ns};
use flowgate_core::error::{ConfigError, StepError, SubmitError};
use flowgate_core::queue::WorkQueue;
use tracing::{debug, error, trace, warn};

use crate::affinity::pin_current_thread;
use crate::config::ControllerConfig;
use crate::job::{Expire, Job};
use crate::parking::{new_parking, WorkerParking};
use crate::reaper::Reaper;
use crate::tls::{set_role, ThreadRole};

/// Snapshot of controller counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    /// Tasks accepted into a queue
    pub submitted: u64,
    /// Tasks refused by admission control or shutdown
    pub rejected: u64,
    /// Tasks dropped after their queue budget ran out
    pub expired: u64,
    /// Tasks started by a worker
    pub executed: u64,
}

struct Shared {
    queues: Box<[WorkQueue<Box<dyn Job>>]>,
    parking: Box<dyn WorkerParking>,
    shutdown: AtomicBool,
    next_queue: AtomicUsize,
    submitted: AtomicU64,
    rejected: AtomicU64,
    expired: AtomicU64,
    executed: AtomicU64,
}

impl Shared {
    fn has_work(&self) -> bool {
        self.queues.iter().any(|q| !q.is_empty())
    }

    /// Run or expire one task, scanning queues from `home`
    fn run_one(&self, home: usize) -> bool {
        let n = self.queues.len();
        let now = now_ns();
        for k in 0..n {
            let queue = &self.queues[(home + k) % n];
            if let Some((id, job)) = queue.try_pop_expired(now) {
                trace!(id, "queue budget exhausted");
                self.expired.fetch_add(1, Ordering::Relaxed);
                job.expire();
                return true;
            }
            if let Some((id, job)) = queue.try_pop() {
                trace!(id, "running task");
                self.executed.fetch_add(1, Ordering::Relaxed);
                // Handlers are caught inside the job; this guards the worker
                // against a panicking listener or transport.
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job.run())) {
                    error!(id, error = %StepError::from_panic(payload), "task panicked");
                }
                return true;
            }
        }
        false
    }

    fn sweep(&self, now: u64) {
        for queue in self.queues.iter() {
            while let Some((id, job)) = queue.try_pop_expired(now) {
                trace!(id, "reaped stale task");
                self.expired.fetch_add(1, Ordering::Relaxed);
                job.expire();
            }
        }
    }

    fn drain(&self) {
        for queue in self.queues.iter() {
            while let Some((_, job)) = queue.try_pop() {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                job.reject(SubmitError::ShutDown);
            }
        }
    }
}

/// Compute worker pool with bounded queues and admission control
pub struct Controller {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    reaper: Reaper,
    config: ControllerConfig,
}

impl Controller {
    /// Validate `config`, then start the reaper and workers
    pub fn new(config: ControllerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            queues: (0..config.num_queues)
                .map(|_| WorkQueue::new(config.max_queue_size))
                .collect(),
            parking: new_parking(),
            shutdown: AtomicBool::new(false),
            next_queue: AtomicUsize::new(0),
            submitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            executed: AtomicU64::new(0),
        });

        let sweeper = Arc::clone(&shared);
        let reaper = Reaper::start(config.reaper_interval, move |now| sweeper.sweep(now))?;

        let controller = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(config.num_workers)),
            reaper,
            config,
        };
        // A partially started pool is shut down by Drop
        for i in 0..controller.config.num_workers {
            let handle = controller.spawn_worker(i)?;
            controller.lock_workers().push(handle);
        }

        debug!(
            workers = controller.config.num_workers,
            queues = controller.config.num_queues,
            queue_size = controller.config.max_queue_size,
            "controller started"
        );
        Ok(controller)
    }

    fn spawn_worker(&self, index: usize) -> Result<JoinHandle<()>, ConfigError> {
        let shared = Arc::clone(&self.shared);
        let cores = self.config.compute_cores.clone();
        let idle_spins = self.config.idle_spins;
        let park_timeout = self.config.park_timeout;

        thread::Builder::new()
            .name(format!("flowgate-worker-{index}"))
            .spawn(move || {
                set_role(ThreadRole::Compute(index));
                if let Some(cores) = cores {
                    match pin_current_thread(&cores) {
                        Ok(true) => debug!(worker = index, %cores, "pinned"),
                        Ok(false) => {}
                        Err(e) => warn!(worker = index, %cores, error = %e, "pinning failed"),
                    }
                }
                worker_loop(&shared, index, idle_spins, park_timeout);
            })
            .map_err(|source| ConfigError::Spawn {
                role: "worker",
                source,
            })
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `job` for a compute worker
    ///
    /// `queue_deadline` is the latest instant a worker may start it.
    /// Returns the task's sequence id. On error the job has already been
    /// rejected through `Job::reject`.
    pub fn submit(&self, job: Box<dyn Job>, queue_deadline: Instant) -> Result<u64, SubmitError> {
        let shared = &*self.shared;
        if shared.shutdown.load(Ordering::Acquire) {
            shared.rejected.fetch_add(1, Ordering::Relaxed);
            job.reject(SubmitError::ShutDown);
            return Err(SubmitError::ShutDown);
        }

        let reap_at = instant_ns(queue_deadline);
        let n = shared.queues.len();
        let start = shared.next_queue.fetch_add(1, Ordering::Relaxed);
        let mut job = job;
        for k in 0..n {
            match shared.queues[(start + k) % n].try_push_with_deadline(job, reap_at) {
                Ok(id) => {
                    shared.submitted.fetch_add(1, Ordering::Relaxed);
                    shared.parking.wake_one();
                    // Raced with shutdown after its drain; reject leftovers here
                    if shared.shutdown.load(Ordering::SeqCst) && self.lock_workers().is_empty() {
                        shared.drain();
                    }
                    return Ok(id);
                }
                Err(back) => job = back,
            }
        }

        shared.rejected.fetch_add(1, Ordering::Relaxed);
        trace!("all work queues full");
        job.reject(SubmitError::QueueFull);
        Err(SubmitError::QueueFull)
    }

    /// Expire `target` at `deadline` unless it resolves first
    pub fn register_deadline(&self, deadline: Instant, target: Arc<dyn Expire>) {
        self.reaper.register(deadline, target);
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Tasks waiting across all queues (approximate)
    pub fn pending(&self) -> usize {
        self.shared.queues.iter().map(|q| q.len()).sum()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ControllerStats {
        let s = &self.shared;
        ControllerStats {
            submitted: s.submitted.load(Ordering::Relaxed),
            rejected: s.rejected.load(Ordering::Relaxed),
            expired: s.expired.load(Ordering::Relaxed),
            executed: s.executed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work and wind down
    ///
    /// Workers finish the task they are running; queued tasks are rejected
    /// with `SubmitError::ShutDown`, and suspended exchanges registered with
    /// the reaper are expired. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("controller shutting down");

        self.shared.parking.wake_all();
        let handles: Vec<_> = self.lock_workers().drain(..).collect();
        let me = thread::current().id();
        for handle in handles {
            // Dropping the last engine handle from a worker must not self-join
            if handle.thread().id() != me {
                let _ = handle.join();
            }
        }

        self.shared.drain();
        self.reaper.shutdown();

        let stats = self.stats();
        debug!(?stats, "controller stopped");
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared, index: usize, idle_spins: u32, park_timeout: std::time::Duration) {
    let home = index % shared.queues.len();
    let mut spins = 0u32;

    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        if shared.run_one(home) {
            spins = 0;
            continue;
        }

        if spins < idle_spins {
            spins += 1;
            for _ in 0..32 {
                std::hint::spin_loop();
            }
            thread::yield_now();
            continue;
        }

        let token = shared.parking.prepare();
        if shared.has_work() || shared.shutdown.load(Ordering::Acquire) {
            shared.parking.cancel();
        } else {
            shared.parking.park(token, Some(park_timeout));
        }
        spins = 0;
    }

    trace!(worker = index, "worker exiting");
}
