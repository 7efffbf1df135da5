//! Library defaults for controller configuration

/// Fallback worker count when the CPU count is unavailable
pub const FALLBACK_WORKERS: usize = 4;

/// Work queues shared by the compute workers
pub const NUM_QUEUES: usize = 1;

/// Pending tasks per work queue before admission control rejects
pub const MAX_QUEUE_SIZE: usize = 1024;

/// Share of an exchange's timeout it may spend waiting in a queue
pub const QUEUE_TIMEOUT_PERCENT: u8 = 50;

/// Threads serving BLOCK steps (0 = run BLOCK steps inline)
pub const BLOCKING_THREADS: usize = 4;

/// Pending BLOCK hand-offs before rejecting
pub const BLOCKING_QUEUE_SIZE: usize = 1024;

/// Spin iterations before an idle worker parks
pub const IDLE_SPINS: u32 = 10;

/// Upper bound on a single park
pub const PARK_TIMEOUT_MS: u64 = 100;

/// Reaper tick
pub const REAPER_INTERVAL_MS: u64 = 1;

/// Default compute worker count: one per available CPU
pub fn num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_WORKERS)
        .min(flowgate_core::constants::MAX_WORKERS)
}
