//! # flowgate-core
//!
//! Core types for the flowgate request engine.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Worker threads, parking and CPU pinning live in `flowgate-runtime`.
//!
//! ## Modules
//!
//! - `state` - Exchange process states and step kinds
//! - `buffer` - Fixed-capacity byte sinks for request/response bodies
//! - `queue` - Bounded MPMC work queue with per-push sequence ids
//! - `response` - Draft and rendered HTTP response values
//! - `clock` - Process-wide monotonic nanosecond clock
//! - `error` - Error types
//! - `env` - Environment variable utilities

pub mod state;
pub mod buffer;
pub mod queue;
pub mod response;
pub mod clock;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use state::{ProcessState, StepKind};
pub use buffer::BoundedBuffer;
pub use queue::WorkQueue;
pub use response::{DraftResponse, HttpResponse};
pub use error::{BufferOverflow, ConfigError, StepError, StepResult, SubmitError};
pub use env::{env_get, env_get_ms, env_get_opt};

/// Constants shared across crates
pub mod constants {
    /// Maximum compute workers a controller may own
    pub const MAX_WORKERS: usize = 256;
}
