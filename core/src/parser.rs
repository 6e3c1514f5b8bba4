//! Raw response → envelope.
//!
//! Pure and deterministic: the same status and body text always produce the
//! same envelope. Empty bodies and non-JSON bodies never fail here; they turn
//! into synthesized failure envelopes instead.

use serde_json::{json, Value};

use crate::envelope::{Envelope, Failure, Success};
use crate::error::ErrorCode;
use crate::http::HttpResponse;

/// Maximum number of characters of an unparseable body kept in `details.raw`.
pub const RAW_EXCERPT_LIMIT: usize = 200;

pub fn parse(response: &HttpResponse) -> Envelope {
    let text = response.body.as_str();

    if text.is_empty() {
        if response.is_success() {
            return Envelope::Success(Success::new(Value::Null));
        }
        return Envelope::Failure(empty_body_failure(response));
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            return Envelope::Failure(
                Failure::new(
                    response.status,
                    ErrorCode::InvalidJson.as_str(),
                    "Response body is not valid JSON",
                )
                .with_details(json!({
                    "raw": excerpt(text, RAW_EXCERPT_LIMIT),
                    "reason": err.to_string(),
                }))
                .with_correlation_id(response.correlation_id()),
            );
        }
    };

    match Envelope::from_value(value.clone()) {
        Ok(envelope) => envelope,
        Err(err) => Envelope::Failure(
            Failure::new(
                response.status,
                ErrorCode::UpstreamJsonError.as_str(),
                "Response body does not match the envelope contract",
            )
            .with_details(json!({
                "body": value,
                "reason": err.to_string(),
            }))
            .with_correlation_id(response.correlation_id()),
        ),
    }
}

pub(crate) fn empty_body_failure(response: &HttpResponse) -> Failure {
    Failure::new(
        response.status,
        ErrorCode::EmptyErrorBody.as_str(),
        format!("Request failed with status {} and an empty body", response.status),
    )
    .with_correlation_id(response.correlation_id())
}

/// The first `limit` characters of `text`, never splitting a code point.
pub(crate) fn excerpt(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
