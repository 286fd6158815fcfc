use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Inbound request id header.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Inbound distributed-trace header, forwarded verbatim.
pub const TRACE_HEADER: &str = "x-amzn-trace-id";
/// Outbound correlation header derived from the trace header.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Headers of the inbound request that the client is serving.
///
/// Only read; the client never mutates the inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    headers: HeaderMap,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_headers(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Add a header. Names or values that are not valid HTTP are skipped.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::debug!(header = name, "skipping invalid request context header"),
        }
        self
    }

    /// First value of `name` if present, valid UTF-8 and not blank.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.header(REQUEST_ID_HEADER)
    }

    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.header(TRACE_HEADER)
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}
