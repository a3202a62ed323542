//! In-flight request/response state a middleware plugin may observe and
//! mutate. One context per request; the session loop is its single writer.

use bytes::Bytes;
use http::StatusCode;

use super::command::HeaderPairs;

#[derive(Debug, Clone, Default)]
pub struct RequestState {
    pub method: String,
    pub uri: String,
    headers: HeaderPairs,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct ResponseState {
    pub status: StatusCode,
    headers: HeaderPairs,
    pub body: Bytes,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }
}

/// The live HTTP exchange as seen by one middleware session.
#[derive(Debug, Clone, Default)]
pub struct HttpContext {
    pub request: RequestState,
    pub response: ResponseState,
}

fn set_header(headers: &mut HeaderPairs, name: &str, value: String) {
    // Overwrite case-insensitively, append otherwise. Receipt order of
    // untouched headers is preserved.
    for (existing, v) in headers.iter_mut() {
        if existing.eq_ignore_ascii_case(name) {
            *v = value;
            return;
        }
    }
    headers.push((name.to_string(), value));
}

impl HttpContext {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            request: RequestState {
                method: method.into(),
                uri: uri.into(),
                ..Default::default()
            },
            response: ResponseState::default(),
        }
    }

    pub fn request_headers(&self) -> &[(String, String)] {
        &self.request.headers
    }

    pub fn response_headers(&self) -> &[(String, String)] {
        &self.response.headers
    }

    pub fn set_request_header(&mut self, name: &str, value: impl Into<String>) {
        set_header(&mut self.request.headers, name, value.into());
    }

    pub fn set_response_header(&mut self, name: &str, value: impl Into<String>) {
        set_header(&mut self.response.headers, name, value.into());
    }

    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request
            .headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response
            .headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the response with a locally-synthesized error. Used when a
    /// session times out or fails; the original caller sees this instead of
    /// whatever partial state the plugin left behind.
    pub fn error_response(&mut self, status: StatusCode, message: impl Into<String>) {
        let message = message.into();
        self.response.status = status;
        self.response.headers.clear();
        set_header(
            &mut self.response.headers,
            "content-type",
            "text/plain; charset=utf-8".to_string(),
        );
        self.response.body = Bytes::from(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_merge_overwrites_case_insensitively() {
        let mut ctx = HttpContext::new("GET", "/v1/orders");
        ctx.set_request_header("X-Trace", "a");
        ctx.set_request_header("Accept", "text/html");
        ctx.set_request_header("x-trace", "b");

        assert_eq!(ctx.request_header("X-TRACE"), Some("b"));
        // Order of first receipt is kept.
        let names: Vec<&str> = ctx
            .request_headers()
            .iter()
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(names, vec!["X-Trace", "Accept"]);
    }

    #[test]
    fn error_response_replaces_prior_state() {
        let mut ctx = HttpContext::new("GET", "/");
        ctx.set_response_header("x-partial", "yes");
        ctx.response.body = Bytes::from_static(b"half-written");

        ctx.error_response(StatusCode::INTERNAL_SERVER_ERROR, "middleware failed");

        assert_eq!(ctx.response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(ctx.response_header("x-partial").is_none());
        assert_eq!(&ctx.response.body[..], b"middleware failed");
    }
}
