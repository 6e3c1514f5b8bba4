//! The normalized error every failure is converted into.
//!
//! # Design
//! Callers only ever see one failure type. `ApiError` is derived 1:1 from a
//! [`Failure`] envelope, or synthesized with `UNKNOWN_ERROR` and status `0`
//! from anything that is not an HTTP response (network failure, timeout,
//! serialization bug, transport panic). Fields are private so the value
//! cannot be changed once built; the original cause is kept behind an `Arc`
//! so the error stays `Clone` and still reports it through
//! [`std::error::Error::source`].

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::envelope::{ErrorBody, FieldErrors, Failure};

/// Shared handle on whatever originally went wrong.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Stable machine-readable failure codes.
///
/// Codes returned by the API inside a well-formed failure envelope that are
/// not one of the synthesized codes are kept verbatim in `Application`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Non-2xx status with no response body.
    EmptyErrorBody,
    /// Body present but not parseable as JSON.
    InvalidJson,
    /// HTTP failure status but the body claims success.
    UpstreamInconsistent,
    /// JSON body that does not match the envelope contract.
    UpstreamJsonError,
    /// Non-JSON failure body (HTML error page, plain text).
    UpstreamTextError,
    /// Anything that is not an HTTP response.
    UnknownError,
    Application(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::EmptyErrorBody => "EMPTY_ERROR_BODY",
            ErrorCode::InvalidJson => "INVALID_JSON",
            ErrorCode::UpstreamInconsistent => "UPSTREAM_INCONSISTENT",
            ErrorCode::UpstreamJsonError => "UPSTREAM_JSON_ERROR",
            ErrorCode::UpstreamTextError => "UPSTREAM_TEXT_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
            ErrorCode::Application(code) => code,
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "EMPTY_ERROR_BODY" => ErrorCode::EmptyErrorBody,
            "INVALID_JSON" => ErrorCode::InvalidJson,
            "UPSTREAM_INCONSISTENT" => ErrorCode::UpstreamInconsistent,
            "UPSTREAM_JSON_ERROR" => ErrorCode::UpstreamJsonError,
            "UPSTREAM_TEXT_ERROR" => ErrorCode::UpstreamTextError,
            "UNKNOWN_ERROR" => ErrorCode::UnknownError,
            other => ErrorCode::Application(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fallback message when a non-HTTP failure has nothing useful to say.
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// A single, predictable failure shape for every call through the client.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    code: ErrorCode,
    status_code: u16,
    correlation_id: Option<String>,
    details: Option<Value>,
    fields: Option<FieldErrors>,
    message: String,
    #[source]
    cause: Option<Cause>,
}

impl ApiError {
    /// Build the error that a failure envelope describes.
    ///
    /// The envelope's top-level `message` is only used when `error.message`
    /// is blank.
    pub fn from_failure(failure: Failure, cause: Option<Cause>) -> Self {
        let Failure {
            status_code,
            message,
            correlation_id,
            error,
        } = failure;
        let ErrorBody {
            code,
            message: error_message,
            details,
            fields,
        } = error;
        let message = if error_message.trim().is_empty() {
            message.unwrap_or(error_message)
        } else {
            error_message
        };
        Self {
            code: ErrorCode::from(code.as_str()),
            status_code,
            correlation_id,
            details,
            fields,
            message,
            cause,
        }
    }

    /// Synthesize an `UNKNOWN_ERROR` from a non-HTTP failure.
    pub fn unknown<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let text = err.to_string();
        let message = if text.trim().is_empty() {
            UNKNOWN_ERROR_MESSAGE.to_string()
        } else {
            text.clone()
        };
        Self {
            code: ErrorCode::UnknownError,
            status_code: 0,
            correlation_id: None,
            details: Some(json!({ "error": text })),
            fields: None,
            message,
            cause: Some(Arc::new(err)),
        }
    }

    /// Synthesize an `UNKNOWN_ERROR` from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let text = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        Self::unknown(Panicked(text))
    }

    pub fn code(&self) -> &ErrorCode {
        &self.code
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Per-field validation messages when input validation failed upstream.
    pub fn fields(&self) -> Option<&FieldErrors> {
        self.fields.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// Render back into a failure envelope, e.g. to relay it to a browser.
    pub fn to_failure(&self) -> Failure {
        Failure {
            status_code: self.status_code,
            message: None,
            correlation_id: self.correlation_id.clone(),
            error: ErrorBody {
                code: self.code.as_str().to_string(),
                message: self.message.clone(),
                details: self.details.clone(),
                fields: self.fields.clone(),
            },
        }
    }
}

/// The upstream response a normalized error was derived from.
#[derive(Debug, Clone, thiserror::Error)]
#[error("upstream responded with HTTP {status}")]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Panicked(String);
