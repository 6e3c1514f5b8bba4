//! The two-shape wire envelope every API response conforms to.
//!
//! # Design
//! On the wire both shapes share one JSON object discriminated by the
//! boolean `success` field. Deserialization goes through a private
//! `WireEnvelope` and is validated by `TryFrom`: a body is only accepted as
//! envelope-shaped when it has `success: true`, or `success: false` together
//! with a numeric `statusCode` and an `error` carrying `code` and `message`.
//! Unrelated JSON fails to deserialize instead of being guessed at field by
//! field.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-field validation messages, keyed by input field name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// A successful response. `data` is the sole carrier of business payload.
///
/// The untyped form (`Success<Value>`) is what the parser yields; the client
/// converts it into the caller's type with [`Success::into_typed`].
#[derive(Debug, Clone, PartialEq)]
pub struct Success<T = Value> {
    pub data: T,
    pub meta: Option<Value>,
    pub message: Option<String>,
    pub status_code: Option<u16>,
    pub correlation_id: Option<String>,
}

impl<T> Success<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            meta: None,
            message: None,
            status_code: None,
            correlation_id: None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Success<U> {
        Success {
            data: f(self.data),
            meta: self.meta,
            message: self.message,
            status_code: self.status_code,
            correlation_id: self.correlation_id,
        }
    }
}

impl Success<Value> {
    /// Deserialize `data` into `T`, keeping the surrounding metadata.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<Success<T>, serde_json::Error> {
        let data = serde_json::from_value(self.data)?;
        Ok(Success {
            data,
            meta: self.meta,
            message: self.message,
            status_code: self.status_code,
            correlation_id: self.correlation_id,
        })
    }
}

/// Machine-readable failure detail. `code` is a stable identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

/// A failed response.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub status_code: u16,
    pub message: Option<String>,
    pub correlation_id: Option<String>,
    pub error: ErrorBody,
}

impl Failure {
    pub fn new(status_code: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: None,
            correlation_id: None,
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
                details: None,
                fields: None,
            },
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<&str>) -> Self {
        self.correlation_id = correlation_id.map(str::to_string);
        self
    }
}

/// Exactly one of the two shapes describes any given response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope", into = "WireEnvelope")]
pub enum Envelope {
    Success(Success),
    Failure(Failure),
}

impl Envelope {
    /// Validate an already-parsed JSON value against the envelope schema.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success(_))
    }
}

/// Reasons a JSON object with a `success` flag is still not an envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("failure envelope is missing `statusCode`")]
    MissingStatusCode,
    #[error("failure envelope is missing `error`")]
    MissingError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = ShapeError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        if wire.success {
            return Ok(Envelope::Success(Success {
                data: wire.data.unwrap_or(Value::Null),
                meta: wire.meta,
                message: wire.message,
                status_code: wire.status_code,
                correlation_id: wire.correlation_id,
            }));
        }
        let status_code = wire.status_code.ok_or(ShapeError::MissingStatusCode)?;
        let error = wire.error.ok_or(ShapeError::MissingError)?;
        Ok(Envelope::Failure(Failure {
            status_code,
            message: wire.message,
            correlation_id: wire.correlation_id,
            error,
        }))
    }
}

impl From<Envelope> for WireEnvelope {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Success(success) => WireEnvelope {
                success: true,
                data: Some(success.data),
                meta: success.meta,
                message: success.message,
                status_code: success.status_code,
                correlation_id: success.correlation_id,
                error: None,
            },
            Envelope::Failure(failure) => WireEnvelope {
                success: false,
                data: None,
                meta: None,
                message: failure.message,
                status_code: Some(failure.status_code),
                correlation_id: failure.correlation_id,
                error: Some(failure.error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn success_with_meta_parses() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"success":true,"data":[1,2],"meta":{"count":2},"correlationId":"c-1"}"#,
        )
        .unwrap();
        let Envelope::Success(success) = envelope else {
            panic!("expected success");
        };
        assert_eq!(success.data, json!([1, 2]));
        assert_eq!(success.meta, Some(json!({"count": 2})));
        assert_eq!(success.correlation_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn success_without_data_yields_null() {
        let envelope: Envelope = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert_eq!(envelope, Envelope::Success(Success::new(Value::Null)));
    }

    #[test]
    fn failure_with_fields_parses() {
        let envelope: Envelope = serde_json::from_str(
            r#"{
                "success": false,
                "statusCode": 422,
                "error": {
                    "code": "VALIDATION_ERROR",
                    "message": "invalid input",
                    "fields": {"title": ["must not be empty"]}
                }
            }"#,
        )
        .unwrap();
        let Envelope::Failure(failure) = envelope else {
            panic!("expected failure");
        };
        assert_eq!(failure.status_code, 422);
        assert_eq!(failure.error.code, "VALIDATION_ERROR");
        let fields = failure.error.fields.unwrap();
        assert_eq!(fields["title"], vec!["must not be empty".to_string()]);
    }

    #[test]
    fn failure_without_error_is_rejected() {
        let result = Envelope::from_value(json!({"success": false, "statusCode": 500}));
        assert_matches!(result, Err(_));
    }

    #[test]
    fn failure_without_status_code_is_rejected() {
        let result = Envelope::from_value(json!({
            "success": false,
            "error": {"code": "X", "message": "y"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn unrelated_json_is_rejected() {
        assert!(Envelope::from_value(json!({"error": {"message": "boom"}})).is_err());
        assert!(Envelope::from_value(json!({"success": "yes"})).is_err());
        assert!(Envelope::from_value(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn serialized_failure_carries_success_false() {
        let failure = Failure::new(404, "NOT_FOUND", "post not found");
        let value = serde_json::to_value(Envelope::Failure(failure)).unwrap();
        assert_eq!(
            value,
            json!({
                "success": false,
                "statusCode": 404,
                "error": {"code": "NOT_FOUND", "message": "post not found"}
            })
        );
    }

    #[test]
    fn into_typed_keeps_metadata() {
        let mut success = Success::new(json!({"id": "1"}));
        success.meta = Some(json!({"page": 1}));

        #[derive(Debug, Deserialize, PartialEq)]
        struct Item {
            id: String,
        }

        let typed: Success<Item> = success.into_typed().unwrap();
        assert_eq!(typed.data, Item { id: "1".to_string() });
        assert_eq!(typed.meta, Some(json!({"page": 1})));
    }
}
