//! # flowgate - embedded HTTP compute pipeline
//!
//! Drives every request through a fixed workflow of typed steps under a
//! byte budget and a single absolute deadline, with admission control when
//! the compute workers are saturated.
//!
//! ## Step kinds
//!
//! - **COMPUTE** - CPU-bound; runs on a compute worker. Submitted from any
//!   other thread, chained inline once on a worker.
//! - **IO** - short and non-blocking; runs on whatever thread owns the
//!   exchange.
//! - **BLOCK** - may block; moved off I/O threads to the blocking pool.
//! - **ASYNC** - starts work and returns; the exchange suspends until the
//!   `Completion` resolves or the deadline passes.
//!
//! ## Outcomes
//!
//! Every request ends in exactly one terminal state and the `Listener`
//! renders it exactly once:
//!
//! ```text
//! RUNNING ─┬─> DONE
//!          ├─> EXCEPTION                 handler error, panic, failed completion
//!          ├─> TIMEOUT                   deadline at a step boundary, in queue, suspended
//!          ├─> REJECTED                  work queue full, pool shut down
//!          ├─> REQUEST_BUFFER_OVERFLOW   body over request_size (no step runs)
//!          └─> RESPONSE_BUFFER_OVERFLOW  write past response_size
//! ```
//!
//! Handlers are never preempted: the deadline is checked between steps,
//! while queued, and while suspended. Long waits belong in ASYNC steps.
//!
//! ## Quick start
//!
//! ```ignore
//! use flowgate::{BufferedRequest, DefaultListener, Engine, Settings, Step, Workflow};
//!
//! let workflow = Workflow::init(Step::io("parse", parse))
//!     .next(Step::compute("render", render))
//!     .build();
//! let engine = Engine::new(Settings::from_env(), workflow, DefaultListener)?;
//!
//! engine.handle(BufferedRequest::new(body, move |resp| reply(resp)), MyState::default());
//! ```

pub mod workflow;
pub mod exchange;
pub mod completion;
pub mod listener;
pub mod transport;
pub mod settings;
pub mod engine;

pub use workflow::{AsyncHandler, Handler, Step, StepAction, Workflow, WorkflowBuilder};
pub use exchange::Exchange;
pub use completion::Completion;
pub use listener::{DefaultListener, Listener};
pub use transport::{BufferedRequest, Transport};
pub use settings::Settings;
pub use engine::Engine;

// Re-export the types handlers and listeners work with
pub use flowgate_core::{
    BufferOverflow, ConfigError, DraftResponse, HttpResponse, ProcessState, StepError, StepKind,
    StepResult,
};
pub use flowgate_runtime::{ControllerConfig, ControllerStats, CoreSet};
