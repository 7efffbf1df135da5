//! Boundary to the HTTP layer
//!
//! The engine never touches a socket. A transport hands over the fully
//! buffered request body and later receives exactly one rendered response.

use flowgate_core::response::HttpResponse;

/// One in-flight HTTP request as seen by the engine
pub trait Transport: Send + 'static {
    /// Move the buffered request body out
    fn take_body(&mut self) -> Vec<u8>;

    /// Deliver the final response; called exactly once per request
    fn respond(self: Box<Self>, response: HttpResponse);
}

/// Transport over an in-memory body and a response callback
///
/// Convenient for embedding and tests; a socket server can also wrap its
/// connection writer in the callback.
pub struct BufferedRequest<F> {
    body: Vec<u8>,
    on_response: F,
}

impl<F> BufferedRequest<F>
where
    F: FnOnce(HttpResponse) + Send + 'static,
{
    pub fn new(body: impl Into<Vec<u8>>, on_response: F) -> Self {
        Self {
            body: body.into(),
            on_response,
        }
    }
}

impl<F> Transport for BufferedRequest<F>
where
    F: FnOnce(HttpResponse) + Send + 'static,
{
    fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }

    fn respond(self: Box<Self>, response: HttpResponse) {
        (self.on_response)(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_buffered_request() {
        let (tx, rx) = mpsc::channel();
        let mut req = BufferedRequest::new(&b"ping"[..], move |resp| tx.send(resp).unwrap());

        assert_eq!(req.take_body(), b"ping");
        assert!(req.take_body().is_empty());

        Box::new(req).respond(HttpResponse::text(200, "pong"));
        assert_eq!(rx.recv().unwrap().body, b"pong");
    }
}
