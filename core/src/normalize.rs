//! Failure classification: anything that went wrong → [`ApiError`].
//!
//! # Design
//! Two entry points cover the two kinds of failure:
//! - [`normalize_response`] handles a non-2xx HTTP response. The body has
//!   already been buffered by the transport and is only borrowed here, so
//!   normalizing the same response twice yields the same error.
//! - [`normalize_error`] handles everything that is not an HTTP response
//!   (network failure, timeout, programming error) and always produces
//!   `UNKNOWN_ERROR` with status `0`.
//!
//! Both keep the original failure as the error's source.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::envelope::{Envelope, Failure};
use crate::error::{ApiError, Cause, ErrorCode, UpstreamResponse};
use crate::http::HttpResponse;
use crate::parser::{self, excerpt};

/// Maximum number of characters of a text error body used as the message.
pub const TEXT_MESSAGE_LIMIT: usize = 500;

/// Classify a failed HTTP response.
pub fn normalize_response(response: &HttpResponse) -> ApiError {
    let cause: Cause = Arc::new(UpstreamResponse {
        status: response.status,
        content_type: response.content_type().map(str::to_string),
        body: response.body.clone(),
    });

    if response.body.is_empty() {
        return ApiError::from_failure(parser::empty_body_failure(response), Some(cause));
    }

    if response.is_json() {
        if let Ok(value) = serde_json::from_str::<Value>(&response.body) {
            return ApiError::from_failure(classify_json(response, value), Some(cause));
        }
    }

    ApiError::from_failure(text_failure(response), Some(cause))
}

/// Classify a failure that never produced an HTTP response.
pub fn normalize_error<E>(err: E) -> ApiError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ApiError::unknown(err)
}

fn classify_json(response: &HttpResponse, value: Value) -> Failure {
    match Envelope::from_value(value.clone()) {
        Ok(Envelope::Failure(failure)) => failure,
        Ok(Envelope::Success(_)) => Failure::new(
            response.status,
            ErrorCode::UpstreamInconsistent.as_str(),
            format!(
                "Upstream returned HTTP {} with a success envelope",
                response.status
            ),
        )
        .with_details(json!({ "body": value }))
        .with_correlation_id(response.correlation_id()),
        Err(_) => {
            let message = upstream_message(&value)
                .unwrap_or_else(|| generic_message(response.status));
            Failure::new(
                response.status,
                ErrorCode::UpstreamJsonError.as_str(),
                message,
            )
            .with_details(value)
            .with_correlation_id(response.correlation_id())
        }
    }
}

fn text_failure(response: &HttpResponse) -> Failure {
    let text = excerpt(response.body.trim(), TEXT_MESSAGE_LIMIT);
    let message = if text.is_empty() {
        generic_message(response.status)
    } else {
        text
    };
    Failure::new(
        response.status,
        ErrorCode::UpstreamTextError.as_str(),
        message,
    )
    .with_correlation_id(response.correlation_id())
}

/// `error.message`, else a top-level `message`, from a foreign JSON body.
fn upstream_message(value: &Value) -> Option<String> {
    value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| value.get("message").and_then(Value::as_str))
        .filter(|message| !message.trim().is_empty())
        .map(str::to_string)
}

fn generic_message(status: u16) -> String {
    format!("Request failed with status {status}")
}
