//! # flowgate-runtime
//!
//! Platform-specific runtime for the flowgate engine.
//!
//! This crate provides:
//! - Compute worker pool with admission control (`Controller`)
//! - Blocking-task pool for BLOCK steps (`BlockingPool`)
//! - Deadline thread reaping stale queued tasks and suspended exchanges (`Reaper`)
//! - Worker parking (futex on Linux, condvar elsewhere)
//! - CPU affinity pinning (`CoreSet`)
//! - Thread roles for inline-vs-hand-off decisions

pub mod config;
pub mod affinity;
pub mod parking;
pub mod tls;
pub mod job;
pub mod reaper;
pub mod controller;
pub mod blocking;

// Re-exports
pub use config::ControllerConfig;
pub use affinity::{pin_current_thread, CoreSet};
pub use parking::{new_parking, WorkerParking};
pub use tls::{current_role, ThreadRole};
pub use job::{Expire, Job};
pub use reaper::Reaper;
pub use controller::{Controller, ControllerStats};
pub use blocking::BlockingPool;
