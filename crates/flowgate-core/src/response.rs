//! HTTP response values
//!
//! The engine never touches a socket. Steps fill a `DraftResponse` on the
//! exchange; the listener turns it (plus the response buffer) into an
//! `HttpResponse` that the transport writes out.

/// Status, content type and headers accumulated while steps run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl Default for DraftResponse {
    fn default() -> Self {
        Self {
            status: 200,
            content_type: None,
            headers: Vec::new(),
        }
    }
}

/// Fully rendered response handed back to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Empty response with the given status
    pub fn new(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// `text/plain` response
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some("text/plain; charset=utf-8".to_string()),
            headers: Vec::new(),
            body: body.into().into_bytes(),
        }
    }

    /// Combine a draft with a body
    pub fn from_draft(draft: DraftResponse, body: Vec<u8>) -> Self {
        Self {
            status: draft.status,
            content_type: draft.content_type,
            headers: draft.headers,
            body,
        }
    }

    /// First header value with a case-insensitive name match
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Canonical reason phrase for the statuses the engine produces
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_draft() {
        let mut draft = DraftResponse::default();
        draft.status = 201;
        draft.content_type = Some("application/json".into());
        draft.headers.push(("X-Trace".into(), "abc".into()));

        let resp = HttpResponse::from_draft(draft, b"{}".to_vec());
        assert_eq!(resp.status, 201);
        assert_eq!(resp.header("x-trace"), Some("abc"));
        assert_eq!(resp.body, b"{}");
    }

    #[test]
    fn test_reason_phrase() {
        assert_eq!(reason_phrase(413), "Payload Too Large");
        assert_eq!(reason_phrase(299), "Unknown");
    }
}
