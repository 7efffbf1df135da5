//! Error types for the flowgate engine
//!
//! Configuration problems are fatal and surface at construction time.
//! Per-request faults are not errors at the API boundary: a `StepError`
//! is recorded on the exchange and turned into a terminal process state.

use thiserror::Error;

/// Result type for step handlers
pub type StepResult = Result<(), StepError>;

/// Invalid engine, controller or affinity settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("num_workers must be at least 1")]
    ZeroWorkers,

    #[error("num_workers {requested} exceeds maximum {max}")]
    TooManyWorkers { requested: usize, max: usize },

    #[error("num_queues must be between 1 and num_workers")]
    InvalidQueueCount,

    #[error("max_queue_size must be at least 1")]
    ZeroQueueSize,

    #[error("blocking_queue_size must be at least 1 when blocking threads are configured")]
    ZeroBlockingQueueSize,

    #[error("queue_timeout_percent must be in 1..=100, got {0}")]
    QueueTimeoutPercent(u8),

    #[error("request_size must be at least 1 byte")]
    ZeroRequestSize,

    #[error("response_size must be at least 1 byte")]
    ZeroResponseSize,

    #[error("timeout must be non-zero")]
    ZeroTimeout,

    #[error("invalid core set {spec:?}: {reason}")]
    InvalidCoreSet { spec: String, reason: &'static str },

    #[error("core {core} out of range (max {max})")]
    CoreOutOfRange { core: usize, max: usize },

    #[error("failed to spawn {role} thread: {source}")]
    Spawn {
        role: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Failure recorded on an exchange when a step does not succeed
#[derive(Debug, Error)]
pub enum StepError {
    #[error("step failed: {0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Overflow(#[from] BufferOverflow),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl StepError {
    /// Plain failure with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        StepError::Failed(msg.into())
    }

    /// Wrap any error type
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StepError::Other(Box::new(err))
    }

    /// Build from a `catch_unwind` payload
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        StepError::Panicked(msg)
    }
}

/// Write rejected because it would exceed a bounded buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("buffer overflow: {attempted} bytes exceed capacity {capacity}")]
pub struct BufferOverflow {
    pub capacity: usize,
    pub attempted: usize,
}

/// Admission outcome when a pool cannot take a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("work queue full")]
    QueueFull,

    #[error("pool is shut down")]
    ShutDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = ConfigError::QueueTimeoutPercent(0);
        assert_eq!(e.to_string(), "queue_timeout_percent must be in 1..=100, got 0");

        let e = StepError::from(BufferOverflow { capacity: 4, attempted: 9 });
        assert_eq!(e.to_string(), "buffer overflow: 9 bytes exceed capacity 4");
    }

    #[test]
    fn test_from_panic_payloads() {
        let e = StepError::from_panic(Box::new("boom"));
        assert!(matches!(e, StepError::Panicked(ref m) if m == "boom"));

        let e = StepError::from_panic(Box::new(String::from("bang")));
        assert!(matches!(e, StepError::Panicked(ref m) if m == "bang"));

        let e = StepError::from_panic(Box::new(17u32));
        assert!(matches!(e, StepError::Panicked(_)));
    }
}
