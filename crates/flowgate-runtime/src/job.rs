//! Work handed to the runtime
//!
//! The runtime never sees request types. An exchange boxes itself as a
//! `Job` when it needs a worker, and registers an `Expire` target with the
//! reaper while it waits on an async callback.

use flowgate_core::error::SubmitError;

/// A unit of work moved between threads by value
///
/// Exactly one of the three methods is called, exactly once.
pub trait Job: Send + 'static {
    /// Execute on the thread that dequeued the job
    fn run(self: Box<Self>);

    /// The job's queue budget ran out before a worker started it
    fn expire(self: Box<Self>);

    /// Admission control refused the job
    fn reject(self: Box<Self>, reason: SubmitError);
}

/// Something the reaper resolves once its deadline passes
///
/// `expire` may race with normal completion; implementors decide the winner.
pub trait Expire: Send + Sync {
    fn expire(&self);
}
