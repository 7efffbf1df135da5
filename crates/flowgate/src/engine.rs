//! Engine entry point
//!
//! An `Engine` owns the workflow, the listener, the compute controller and
//! the optional blocking pool. The transport calls `handle_request` once
//! per buffered request; the response comes back through the transport.
//!
//! ```ignore
//! use flowgate::{BufferedRequest, DefaultListener, Engine, Settings, Step, Workflow};
//!
//! let workflow = Workflow::init(Step::compute("echo", |ex| {
//!     ex.copy_request_to_response()?;
//!     Ok(())
//! }))
//! .build();
//!
//! let engine = Engine::new(Settings::from_env(), workflow, DefaultListener)?;
//! engine.handle(BufferedRequest::new(body, |resp| write_out(resp)), ());
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use flowgate_core::buffer::BoundedBuffer;
use flowgate_core::error::ConfigError;
use flowgate_runtime::blocking::BlockingPool;
use flowgate_runtime::controller::{Controller, ControllerStats};
use tracing::{debug, info};

use crate::exchange::Exchange;
use crate::listener::Listener;
use crate::settings::Settings;
use crate::transport::Transport;
use crate::workflow::Workflow;

/// State shared by every exchange of one engine
pub(crate) struct EngineInner<S> {
    pub(crate) workflow: Workflow<S>,
    pub(crate) listener: Box<dyn Listener<S>>,
    pub(crate) controller: Controller,
    pub(crate) blocking: Option<BlockingPool>,
    pub(crate) settings: Settings,
}

/// Request-execution engine
///
/// Dropping the engine shuts it down.
pub struct Engine<S> {
    inner: Arc<EngineInner<S>>,
}

impl<S: Send + 'static> Engine<S> {
    /// Validate `settings` and start the worker pools
    pub fn new<L>(settings: Settings, workflow: Workflow<S>, listener: L) -> Result<Self, ConfigError>
    where
        L: Listener<S>,
    {
        settings.validate()?;
        let config = &settings.controller;

        let blocking = if config.blocking_threads > 0 {
            Some(BlockingPool::new(
                config.blocking_threads,
                config.blocking_queue_size,
                config.blocking_cores.clone(),
                config.park_timeout,
            )?)
        } else {
            None
        };
        let controller = Controller::new(config.clone())?;

        info!(
            steps = workflow.len(),
            workers = config.num_workers,
            blocking_threads = config.blocking_threads,
            request_size = settings.request_size,
            response_size = settings.response_size,
            timeout_ms = settings.timeout.as_millis() as u64,
            "engine started"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                workflow,
                listener: Box::new(listener),
                controller,
                blocking,
                settings,
            }),
        })
    }

    /// Run one request through the workflow
    ///
    /// `start` is when the request arrived; the deadline is `start + timeout`
    /// for the whole request, across every hand-off and suspension. Steps
    /// begin on the calling thread. A body over `request_size` is refused
    /// with REQUEST_BUFFER_OVERFLOW before any step runs.
    pub fn handle_request<T>(&self, mut transport: T, start: Instant, timeout: Duration, state: S)
    where
        T: Transport,
    {
        let deadline = start + timeout;
        let body = transport.take_body();
        let engine = Arc::clone(&self.inner);

        match BoundedBuffer::from_vec(body, self.inner.settings.request_size) {
            Ok(request) => {
                Exchange::new(engine, Box::new(transport), request, state, start, deadline).drive();
            }
            Err(body) => {
                debug!(len = body.len(), limit = self.inner.settings.request_size, "request too large");
                Exchange::request_overflow(engine, Box::new(transport), body.len(), state, start, deadline)
                    .finish();
            }
        }
    }

    /// `handle_request` starting now with the configured timeout
    pub fn handle<T>(&self, transport: T, state: S)
    where
        T: Transport,
    {
        self.handle_request(transport, Instant::now(), self.inner.settings.timeout, state);
    }
}

impl<S> Engine<S> {
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn workflow(&self) -> &Workflow<S> {
        &self.inner.workflow
    }

    pub fn stats(&self) -> ControllerStats {
        self.inner.controller.stats()
    }

    /// Stop all pools
    ///
    /// Queued compute and blocking tasks end in REJECTED, suspended async
    /// exchanges in TIMEOUT; each still gets its listener callback.
    /// Requests handled afterwards are rejected at their first hand-off.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.inner.controller.is_shut_down() {
            return;
        }
        self.inner.controller.shutdown();
        if let Some(pool) = &self.inner.blocking {
            pool.shutdown();
        }
        info!(stats = ?self.inner.controller.stats(), "engine stopped");
    }
}

impl<S> Drop for Engine<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
