//! The network seam between `ApiClient` and the wire.
//!
//! # Design
//! A transport turns an [`HttpRequest`] into an [`HttpResponse`] and nothing
//! else: any status code, 4xx and 5xx included, comes back as data. Only
//! failures that produce no response at all (connection refused, DNS,
//! timeout) are errors. The client owns all interpretation of statuses and
//! bodies.

use std::time::Duration;

use ureq::Agent;

use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Failures that produce no HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Other(ureq::Error),
}

impl From<ureq::Error> for TransportError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Timeout(_) => TransportError::Timeout,
            ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
                TransportError::Timeout
            }
            ureq::Error::Io(io) => TransportError::Network(io.to_string()),
            ureq::Error::HostNotFound => TransportError::Network("host not found".to_string()),
            ureq::Error::ConnectionFailed => {
                TransportError::Network("connection failed".to_string())
            }
            ureq::Error::BadUri(uri) => TransportError::InvalidRequest(uri),
            other => TransportError::Other(other),
        }
    }
}

/// Performs one HTTP round-trip.
///
/// Implementations hold no per-call state; a single transport is shared by
/// every clone of the client and may be used from many threads at once.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Blocking transport backed by a pooled `ureq` agent.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: Agent,
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }

    /// Reuse an existing agent (useful for sharing a connection pool).
    /// It must be configured with `http_status_as_error(false)`.
    pub fn with_agent(agent: Agent) -> Self {
        Self { agent }
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.as_str();
        let timeout = request.timeout;
        let body = request.body.as_deref();

        let response = match request.method {
            HttpMethod::Get => prepare(self.agent.get(url), request, timeout).call(),
            HttpMethod::Delete => prepare(self.agent.delete(url), request, timeout).call(),
            HttpMethod::Post => send_body(prepare(self.agent.post(url), request, timeout), body),
            HttpMethod::Put => send_body(prepare(self.agent.put(url), request, timeout), body),
            HttpMethod::Patch => send_body(prepare(self.agent.patch(url), request, timeout), body),
        }?;

        read_response(response)
    }
}

fn prepare<B>(
    mut builder: ureq::RequestBuilder<B>,
    request: &HttpRequest,
    timeout: Option<Duration>,
) -> ureq::RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.config().timeout_global(timeout).build()
}

fn send_body(
    builder: ureq::RequestBuilder<ureq::typestate::WithBody>,
    body: Option<&[u8]>,
) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    match body {
        Some(bytes) => builder.send(bytes),
        None => builder.send_empty(),
    }
}

fn read_response(
    mut response: ureq::http::Response<ureq::Body>,
) -> Result<HttpResponse, TransportError> {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    // Bodies that are not UTF-8 are still responses; the parser and
    // normalizer classify them from the lossy text.
    let bytes = response.body_mut().read_to_vec()?;

    Ok(HttpResponse {
        status,
        headers,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    })
}
