//! Exchange process state and step kind

use core::fmt;

/// State of an exchange
///
/// `Running` is the only non-terminal state. Every other state is
/// absorbing: once an exchange leaves `Running` it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProcessState {
    /// Walking the workflow
    Running = 0,

    /// Reached the end of the workflow or a step called `complete()`
    Done = 1,

    /// A handler failed or panicked, or an async callback reported failure
    Exception = 2,

    /// Deadline passed before a step boundary, in the queue, or while suspended
    Timeout = 3,

    /// Admission control refused the task (queue full or pool shut down)
    Rejected = 4,

    /// Inbound body larger than `request_size`
    RequestBufferOverflow = 5,

    /// A step tried to write past `response_size`
    ResponseBufferOverflow = 6,
}

impl ProcessState {
    /// Check if this state is terminal (anything but `Running`)
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, ProcessState::Running)
    }

    /// Upper-case name used in logs
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Running => "RUNNING",
            ProcessState::Done => "DONE",
            ProcessState::Exception => "EXCEPTION",
            ProcessState::Timeout => "TIMEOUT",
            ProcessState::Rejected => "REJECTED",
            ProcessState::RequestBufferOverflow => "REQUEST_BUFFER_OVERFLOW",
            ProcessState::ResponseBufferOverflow => "RESPONSE_BUFFER_OVERFLOW",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a step's handler is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StepKind {
    /// CPU-bound; runs on a compute worker (inline when already on one)
    Compute = 0,

    /// Short non-blocking work; always runs on the current thread
    Io = 1,

    /// Blocking call; handed to the blocking pool from I/O threads
    Block = 2,

    /// Starts work and returns; resumed later through a completion callback
    Async = 3,
}

impl StepKind {
    /// Whether a compute worker may run this step inline while chaining
    #[inline]
    pub const fn chains_on_worker(&self) -> bool {
        !matches!(self, StepKind::Async)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Compute => write!(f, "COMPUTE"),
            StepKind::Io => write!(f, "IO"),
            StepKind::Block => write!(f, "BLOCK"),
            StepKind::Async => write!(f, "ASYNC"),
        }
    }
}
