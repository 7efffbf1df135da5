//! Per-request state machine
//!
//! An `Exchange` is owned by exactly one thread at a time and moves between
//! threads as `Box<Exchange<S>>`: into a work queue for COMPUTE hand-offs,
//! into the blocking pool for BLOCK hand-offs, into a rendezvous while an
//! ASYNC step is pending. Whoever holds the box drives it.
//!
//! # Stepping
//!
//! ```text
//! loop {
//!     terminal?                     -> fire listener, done
//!     past last step?               -> DONE
//!     COMPUTE off a compute worker? -> submit to controller, release thread
//!     BLOCK on a foreign thread?    -> submit to blocking pool, release thread
//!     now > deadline?               -> TIMEOUT
//!     run step (ASYNC: park until the completion or the reaper resolves it)
//!     advance
//! }
//! ```
//!
//! Hand-offs are submitted before the deadline check, so a full queue
//! reports REJECTED even for an exchange that is already late; the worker
//! that picks the task up re-checks the deadline before running it.
//!
//! `process_state` is write-once: `set_terminal` only takes effect while
//! the exchange is `Running`.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flowgate_core::buffer::BoundedBuffer;
use flowgate_core::error::{BufferOverflow, StepError, SubmitError};
use flowgate_core::response::{reason_phrase, DraftResponse, HttpResponse};
use flowgate_core::state::ProcessState;
use flowgate_runtime::blocking::BlockingPool;
use flowgate_runtime::job::Job;
use flowgate_runtime::tls::current_role;
use tracing::{debug, error, trace};

use crate::completion::{Completion, Outcome, Parked, Rendezvous};
use crate::engine::EngineInner;
use crate::listener::dispatch;
use crate::transport::Transport;
use crate::workflow::{AsyncHandler, Handler, StepAction};

/// Execution context of one request
pub struct Exchange<S> {
    engine: Arc<EngineInner<S>>,
    transport: Option<Box<dyn Transport>>,
    state: S,
    request: BoundedBuffer,
    response: BoundedBuffer,
    draft: DraftResponse,
    started: Instant,
    deadline: Instant,
    step_index: usize,
    process_state: ProcessState,
    error: Option<StepError>,
}

impl<S> Exchange<S> {
    pub(crate) fn new(
        engine: Arc<EngineInner<S>>,
        transport: Box<dyn Transport>,
        request: BoundedBuffer,
        state: S,
        started: Instant,
        deadline: Instant,
    ) -> Box<Self> {
        let response = BoundedBuffer::new(engine.settings.response_size);
        Box::new(Self {
            engine,
            transport: Some(transport),
            state,
            request,
            response,
            draft: DraftResponse::default(),
            started,
            deadline,
            step_index: 0,
            process_state: ProcessState::Running,
            error: None,
        })
    }

    /// Exchange for a body larger than `request_size`; no step ever runs
    pub(crate) fn request_overflow(
        engine: Arc<EngineInner<S>>,
        transport: Box<dyn Transport>,
        attempted: usize,
        state: S,
        started: Instant,
        deadline: Instant,
    ) -> Box<Self> {
        let capacity = engine.settings.request_size;
        let mut exchange = Self::new(
            engine,
            transport,
            BoundedBuffer::new(capacity),
            state,
            started,
            deadline,
        );
        exchange.error = Some(StepError::Overflow(BufferOverflow {
            capacity,
            attempted,
        }));
        exchange.process_state = ProcessState::RequestBufferOverflow;
        exchange
    }

    // ---- request side ----

    /// Buffered request body
    #[inline]
    pub fn request(&self) -> &[u8] {
        self.request.as_slice()
    }

    /// Opaque per-request state
    #[inline]
    pub fn state(&self) -> &S {
        &self.state
    }

    #[inline]
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    #[inline]
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Absolute deadline fixed at ingress
    #[inline]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline (zero once passed)
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    #[inline]
    pub fn process_state(&self) -> ProcessState {
        self.process_state
    }

    /// Failure recorded when the exchange ended in EXCEPTION (or an overflow)
    #[inline]
    pub fn error(&self) -> Option<&StepError> {
        self.error.as_ref()
    }

    /// Index of the step being run (or that ended the exchange)
    #[inline]
    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn current_step_name(&self) -> Option<&str> {
        self.engine.workflow.get(self.step_index).map(|s| s.name())
    }

    // ---- response side ----

    /// Append to the response body
    ///
    /// A write past `response_size` writes nothing and ends the exchange in
    /// RESPONSE_BUFFER_OVERFLOW; no further step runs. Handlers usually
    /// propagate the error with `?`.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), BufferOverflow> {
        let written = self.response.write(bytes);
        self.on_write(written)
    }

    pub fn write_str(&mut self, s: &str) -> Result<(), BufferOverflow> {
        self.write(s.as_bytes())
    }

    /// Append the request body to the response body
    pub fn copy_request_to_response(&mut self) -> Result<(), BufferOverflow> {
        let written = self.response.write(self.request.as_slice());
        self.on_write(written)
    }

    fn on_write(&mut self, written: Result<(), BufferOverflow>) -> Result<(), BufferOverflow> {
        if let Err(e) = &written {
            if self.set_terminal(ProcessState::ResponseBufferOverflow) {
                debug!(capacity = e.capacity, attempted = e.attempted, "response buffer overflow");
            }
        }
        written
    }

    #[inline]
    pub fn response(&self) -> &[u8] {
        self.response.as_slice()
    }

    /// Bytes the response buffer can still take
    #[inline]
    pub fn response_remaining(&self) -> usize {
        self.response.remaining()
    }

    /// Move the response body out (listeners use this when rendering)
    pub fn take_response_body(&mut self) -> Vec<u8> {
        self.response.take()
    }

    pub fn set_status(&mut self, status: u16) {
        self.draft.status = status;
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.draft.content_type = Some(content_type.into());
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.draft.headers.push((name.into(), value.into()));
    }

    #[inline]
    pub fn draft(&self) -> &DraftResponse {
        &self.draft
    }

    pub fn take_draft(&mut self) -> DraftResponse {
        std::mem::take(&mut self.draft)
    }

    /// End the exchange as DONE after the current step; later steps are skipped
    pub fn complete(&mut self) {
        self.set_terminal(ProcessState::Done);
    }

    // ---- state machine ----

    /// Leave `Running` for `state`; no-op (returns false) once terminal
    pub(crate) fn set_terminal(&mut self, state: ProcessState) -> bool {
        debug_assert!(state.is_terminal());
        if self.process_state.is_terminal() {
            return false;
        }
        self.process_state = state;
        true
    }

    /// Record `error` and end in EXCEPTION (unless already terminal)
    pub(crate) fn fail(&mut self, error: StepError) {
        debug!(step = self.current_step_name(), error = %error, "step failed");
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.set_terminal(ProcessState::Exception);
    }

    fn advance(&mut self) {
        if !self.process_state.is_terminal() {
            self.step_index += 1;
        }
    }

    fn run_handler(&mut self, handler: &Handler<S>) {
        match catch_unwind(AssertUnwindSafe(|| handler(&mut *self))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.fail(e),
            Err(payload) => self.fail(StepError::from_panic(payload)),
        }
        self.advance();
    }
}

impl<S: Send + 'static> Exchange<S> {
    /// Walk the workflow on the current thread until the exchange ends,
    /// is handed off, or suspends
    pub(crate) fn drive(mut self: Box<Self>) {
        let engine = Arc::clone(&self.engine);
        loop {
            if self.process_state.is_terminal() {
                return self.finish();
            }
            let Some(step) = engine.workflow.get(self.step_index) else {
                self.set_terminal(ProcessState::Done);
                continue;
            };

            let role = current_role();
            match step.action() {
                StepAction::Compute(_) if !role.is_compute() => {
                    return self.submit_compute();
                }
                StepAction::Block(_) if !role.is_compute() && !role.is_blocking() => {
                    if let Some(pool) = &engine.blocking {
                        return self.submit_blocking(pool);
                    }
                }
                _ => {}
            }

            if Instant::now() > self.deadline {
                debug!(step = step.name(), "deadline passed before step");
                self.set_terminal(ProcessState::Timeout);
                continue;
            }

            trace!(step = step.name(), kind = %step.kind(), "running step");
            match step.action() {
                StepAction::Compute(h) | StepAction::Io(h) | StepAction::Block(h) => {
                    self.run_handler(h);
                }
                StepAction::Async(h) => match self.suspend(h) {
                    Some(exchange) => self = exchange,
                    None => return,
                },
            }
        }
    }

    /// Continue after an async step, on the thread that resolved it
    pub(crate) fn resume(mut self: Box<Self>, outcome: Outcome<S>) {
        outcome.apply(&mut self);
        self.advance();
        self.drive();
    }

    fn submit_compute(self: Box<Self>) {
        let engine = Arc::clone(&self.engine);
        let controller = &engine.controller;
        let total = self.deadline.saturating_duration_since(self.started);
        let queue_deadline = (Instant::now() + controller.config().queue_budget(total)).min(self.deadline);
        if let Err(e) = controller.submit(self, queue_deadline) {
            debug!(reason = %e, "compute hand-off refused");
        }
    }

    fn submit_blocking(self: Box<Self>, pool: &BlockingPool) {
        if let Err(e) = pool.submit(self) {
            debug!(reason = %e, "blocking hand-off refused");
        }
    }

    /// Run an async handler and park the exchange
    ///
    /// Returns the exchange if it must keep going on this thread: the
    /// handler failed, ended it, or resolved the completion inline.
    fn suspend(mut self: Box<Self>, handler: &AsyncHandler<S>) -> Option<Box<Self>> {
        let rendezvous = Rendezvous::new();
        let completion = Completion::new(Arc::clone(&rendezvous));

        match catch_unwind(AssertUnwindSafe(|| handler(&mut *self, completion))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.fail(e),
            Err(payload) => self.fail(StepError::from_panic(payload)),
        }
        if self.process_state.is_terminal() {
            rendezvous.abandon();
            return Some(self);
        }

        let engine = Arc::clone(&self.engine);
        let deadline = self.deadline;
        match rendezvous.park(self) {
            Parked::Resolved(mut exchange, outcome) => {
                outcome.apply(&mut exchange);
                exchange.advance();
                Some(exchange)
            }
            Parked::Waiting => {
                if rendezvous.is_waiting() {
                    engine.controller.register_deadline(deadline, rendezvous);
                }
                None
            }
        }
    }

    /// Fire the listener for the terminal state and hand the response to
    /// the transport
    ///
    /// Consumes the exchange: holding the box is the only way to reach
    /// the listener, so it fires at most once.
    pub(crate) fn finish(mut self: Box<Self>) {
        let engine = Arc::clone(&self.engine);
        let response = match catch_unwind(AssertUnwindSafe(|| dispatch(&*engine.listener, &mut *self))) {
            Ok(response) => response,
            Err(payload) => {
                error!(
                    state = %self.process_state,
                    error = %StepError::from_panic(payload),
                    "listener panicked"
                );
                HttpResponse::text(500, reason_phrase(500))
            }
        };

        trace!(
            state = %self.process_state,
            status = response.status,
            elapsed_us = self.started.elapsed().as_micros() as u64,
            "exchange finished"
        );
        if let Some(transport) = self.transport.take() {
            transport.respond(response);
        }
    }
}

impl<S: Send + 'static> Job for Exchange<S> {
    fn run(self: Box<Self>) {
        self.drive();
    }

    fn expire(mut self: Box<Self>) {
        debug!(step = self.current_step_name(), "queue budget exhausted");
        self.set_terminal(ProcessState::Timeout);
        self.finish();
    }

    fn reject(mut self: Box<Self>, reason: SubmitError) {
        debug!(step = self.current_step_name(), %reason, "rejected");
        self.set_terminal(ProcessState::Rejected);
        self.finish();
    }
}

impl<S> fmt::Debug for Exchange<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("process_state", &self.process_state)
            .field("step_index", &self.step_index)
            .field("request_len", &self.request.len())
            .field("response_len", &self.response.len())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}
