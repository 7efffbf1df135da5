//! Async step continuation
//!
//! When an ASYNC step's handler returns, the exchange is parked in a
//! `Rendezvous` shared by three parties: the engine thread that parked
//! it, the `Completion` handed to the handler, and the deadline reaper.
//! Exactly one of them gets the exchange back.
//!
//! # Flags
//!
//! ```text
//! PARKED   exchange stored in the slot (set by the engine)
//! RESOLVED outcome stored (set by the completion)
//! TAKEN    someone claimed the exchange
//! ```
//!
//! - Completion: store outcome, `fetch_or(RESOLVED)`. If the previous
//!   flags were exactly `PARKED`, the completion owns the exchange and
//!   resumes it on its own thread. Before the park, the engine picks the
//!   outcome up itself; after `TAKEN`, the outcome is dropped.
//! - Engine: store exchange, `fetch_or(PARKED)`. If `RESOLVED` was already
//!   set, the callback ran inline and the engine keeps going.
//! - Reaper: `CAS(PARKED -> PARKED | TAKEN)`. Success means the callback
//!   has not fired; the exchange times out.

use std::cell::UnsafeCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use flowgate_core::error::{StepError, StepResult};
use flowgate_core::state::ProcessState;
use flowgate_runtime::job::Expire;
use tracing::debug;

use crate::exchange::Exchange;

const PARKED: u8 = 1;
const RESOLVED: u8 = 2;
const TAKEN: u8 = 4;

type Continuation<S> = Box<dyn FnOnce(&mut Exchange<S>) -> StepResult + Send>;

pub(crate) enum Outcome<S> {
    Success,
    SuccessWith(Continuation<S>),
    Failure(StepError),
}

impl<S> Outcome<S> {
    /// Apply to the resumed exchange
    pub(crate) fn apply(self, exchange: &mut Exchange<S>) {
        match self {
            Outcome::Success => {}
            Outcome::SuccessWith(f) => {
                match catch_unwind(AssertUnwindSafe(|| f(exchange))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => exchange.fail(e),
                    Err(payload) => exchange.fail(StepError::from_panic(payload)),
                }
            }
            Outcome::Failure(e) => exchange.fail(e),
        }
    }
}

pub(crate) struct Rendezvous<S> {
    flags: AtomicU8,
    slot: UnsafeCell<Option<Box<Exchange<S>>>>,
    outcome: UnsafeCell<Option<Outcome<S>>>,
}

// Safety: `slot` is written once by the engine before PARKED is published
// and read once by whoever sets TAKEN. `outcome` is written once by the
// single `Completion` before RESOLVED is published and read only after
// RESOLVED is observed. The flag protocol serializes every access.
unsafe impl<S: Send> Send for Rendezvous<S> {}
unsafe impl<S: Send> Sync for Rendezvous<S> {}

/// Result of `Rendezvous::park`
pub(crate) enum Parked<S> {
    /// Nobody resolved yet; the exchange waits in the slot
    Waiting,
    /// The callback already fired; continue with the exchange
    Resolved(Box<Exchange<S>>, Outcome<S>),
}

impl<S> Rendezvous<S> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            flags: AtomicU8::new(0),
            slot: UnsafeCell::new(None),
            outcome: UnsafeCell::new(None),
        })
    }

    /// Engine side: the handler failed or ended the exchange; ignore the callback
    pub(crate) fn abandon(&self) {
        self.flags.fetch_or(TAKEN, Ordering::AcqRel);
    }

    /// Engine side: hand the exchange over
    pub(crate) fn park(&self, exchange: Box<Exchange<S>>) -> Parked<S> {
        unsafe {
            *self.slot.get() = Some(exchange);
        }
        let prev = self.flags.fetch_or(PARKED, Ordering::AcqRel);
        if prev & RESOLVED == 0 {
            return Parked::Waiting;
        }
        // Completion ran before we parked and left everything to us
        self.flags.fetch_or(TAKEN, Ordering::AcqRel);
        match (self.take_exchange(), self.take_outcome()) {
            (Some(exchange), Some(outcome)) => Parked::Resolved(exchange, outcome),
            _ => unreachable!("resolved rendezvous without exchange or outcome"),
        }
    }

    /// Whether the exchange is still parked and unclaimed
    pub(crate) fn is_waiting(&self) -> bool {
        self.flags.load(Ordering::Acquire) == PARKED
    }

    fn take_exchange(&self) -> Option<Box<Exchange<S>>> {
        unsafe { (*self.slot.get()).take() }
    }

    fn take_outcome(&self) -> Option<Outcome<S>> {
        unsafe { (*self.outcome.get()).take() }
    }
}

impl<S: Send + 'static> Rendezvous<S> {
    fn resolve(&self, outcome: Outcome<S>) {
        unsafe {
            *self.outcome.get() = Some(outcome);
        }
        let prev = self.flags.fetch_or(RESOLVED, Ordering::AcqRel);
        if prev & TAKEN != 0 {
            debug!("late completion ignored");
            return;
        }
        if prev != PARKED {
            // Not parked yet: the engine thread picks the outcome up
            return;
        }
        self.flags.fetch_or(TAKEN, Ordering::AcqRel);
        let (Some(exchange), Some(outcome)) = (self.take_exchange(), self.take_outcome()) else {
            unreachable!("parked rendezvous without exchange or outcome");
        };
        exchange.resume(outcome);
    }
}

impl<S: Send + 'static> Expire for Rendezvous<S> {
    fn expire(&self) {
        if self
            .flags
            .compare_exchange(PARKED, PARKED | TAKEN, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(mut exchange) = self.take_exchange() else {
            unreachable!("parked rendezvous without exchange");
        };
        debug!(step = exchange.current_step_name(), "async step timed out");
        exchange.set_terminal(ProcessState::Timeout);
        exchange.finish();
    }
}

/// Resolves a suspended ASYNC step
///
/// Handed to the async handler; call exactly one method from any thread.
/// The exchange resumes with the next step on the calling thread. A
/// completion that is dropped unresolved leaves the exchange to time out.
pub struct Completion<S> {
    rendezvous: Arc<Rendezvous<S>>,
}

impl<S: Send + 'static> Completion<S> {
    pub(crate) fn new(rendezvous: Arc<Rendezvous<S>>) -> Self {
        Self { rendezvous }
    }

    /// The async work finished; continue with the next step
    pub fn succeed(self) {
        self.rendezvous.resolve(Outcome::Success);
    }

    /// The async work finished; run `f` against the exchange, then continue
    ///
    /// Use this to write fetched data into the response or request state.
    pub fn succeed_with<F>(self, f: F)
    where
        F: FnOnce(&mut Exchange<S>) -> StepResult + Send + 'static,
    {
        self.rendezvous.resolve(Outcome::SuccessWith(Box::new(f)));
    }

    /// The async work failed; the exchange ends in EXCEPTION
    pub fn fail(self, error: StepError) {
        self.rendezvous.resolve(Outcome::Failure(error));
    }

    /// Resolve from a `Result`
    pub fn complete(self, result: StepResult) {
        match result {
            Ok(()) => self.succeed(),
            Err(e) => self.fail(e),
        }
    }
}

impl<S> fmt::Debug for Completion<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("flags", &self.rendezvous.flags.load(Ordering::Relaxed))
            .finish()
    }
}
