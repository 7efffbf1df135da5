//! Terminal-state callbacks
//!
//! Exactly one method fires, exactly once, for every exchange. Each gets
//! the exchange mutably so it can move the response body out instead of
//! copying it. Every method has a default; implement only the ones whose
//! rendering should differ from `DefaultListener`.
//!
//! | State                      | Default status              |
//! |----------------------------|-----------------------------|
//! | `DONE`                     | draft status (200) + body   |
//! | `EXCEPTION`                | 500                         |
//! | `TIMEOUT`                  | 504                         |
//! | `REJECTED`                 | 503                         |
//! | `REQUEST_BUFFER_OVERFLOW`  | 413                         |
//! | `RESPONSE_BUFFER_OVERFLOW` | 500                         |
//! | anything else              | 500                         |

use flowgate_core::response::{reason_phrase, HttpResponse};
use flowgate_core::state::ProcessState;
use tracing::error;

use crate::exchange::Exchange;

fn status_only(status: u16) -> HttpResponse {
    HttpResponse::text(status, reason_phrase(status))
}

/// Renders a terminal exchange into an HTTP response
pub trait Listener<S>: Send + Sync + 'static {
    fn on_done(&self, exchange: &mut Exchange<S>) -> HttpResponse {
        let body = exchange.take_response_body();
        HttpResponse::from_draft(exchange.take_draft(), body)
    }

    fn on_exception(&self, _exchange: &mut Exchange<S>) -> HttpResponse {
        status_only(500)
    }

    fn on_timeout(&self, _exchange: &mut Exchange<S>) -> HttpResponse {
        status_only(504)
    }

    fn on_rejected(&self, _exchange: &mut Exchange<S>) -> HttpResponse {
        status_only(503)
    }

    fn on_request_buffer_overflow(&self, _exchange: &mut Exchange<S>) -> HttpResponse {
        status_only(413)
    }

    fn on_response_buffer_overflow(&self, _exchange: &mut Exchange<S>) -> HttpResponse {
        status_only(500)
    }

    /// Fallback for a state no other callback covers
    fn on_unknown(&self, _exchange: &mut Exchange<S>) -> HttpResponse {
        status_only(500)
    }
}

/// Listener with every default rendering
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultListener;

impl<S> Listener<S> for DefaultListener {}

/// Route a finished exchange to the callback for its state
pub(crate) fn dispatch<S: 'static>(listener: &dyn Listener<S>, exchange: &mut Exchange<S>) -> HttpResponse {
    match exchange.process_state() {
        ProcessState::Done => listener.on_done(exchange),
        ProcessState::Exception => listener.on_exception(exchange),
        ProcessState::Timeout => listener.on_timeout(exchange),
        ProcessState::Rejected => listener.on_rejected(exchange),
        ProcessState::RequestBufferOverflow => listener.on_request_buffer_overflow(exchange),
        ProcessState::ResponseBufferOverflow => listener.on_response_buffer_overflow(exchange),
        ProcessState::Running => {
            error!(step = exchange.step_index(), "exchange reached the listener while running");
            listener.on_unknown(exchange)
        }
    }
}
