//! Request bodies for the write verbs.
//!
//! Raw bytes and multipart forms go out as the literal wire body. URL-encoded
//! parameters and plain text are literal too. Anything structured is sent as
//! JSON. Each variant knows the content type the transport would pick for
//! it; per-call headers can still override that.

use std::io::Read;

use serde::Serialize;
use serde_json::Value;
use ureq::unversioned::multipart::{Form, Part as FormPart};
use url::form_urlencoded;

use crate::error::ApiError;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";
pub const TEXT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Bytes(Vec<u8>),
    Multipart(Multipart),
    UrlEncoded(Vec<(String, String)>),
    Text(String),
    Json(Value),
}

impl Body {
    /// Serialize any value into a JSON body.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ApiError> {
        serde_json::to_value(value)
            .map(Body::Json)
            .map_err(ApiError::unknown)
    }

    pub fn form<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Body::UrlEncoded(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Wire bytes plus the content type the transport would attach on its
    /// own. Raw bytes carry none.
    pub(crate) fn encode(self) -> Result<Encoded, ApiError> {
        let encoded = match self {
            Body::Bytes(bytes) => Encoded {
                content_type: None,
                bytes,
            },
            Body::Multipart(form) => form.encode()?,
            Body::UrlEncoded(pairs) => Encoded {
                content_type: Some(FORM_CONTENT_TYPE.to_string()),
                bytes: form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs)
                    .finish()
                    .into_bytes(),
            },
            Body::Text(text) => Encoded {
                content_type: Some(TEXT_CONTENT_TYPE.to_string()),
                bytes: text.into_bytes(),
            },
            Body::Json(value) => Encoded {
                content_type: Some(JSON_CONTENT_TYPE.to_string()),
                bytes: serde_json::to_vec(&value).map_err(ApiError::unknown)?,
            },
        };
        Ok(encoded)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<&[u8]> for Body {
    fn from(bytes: &[u8]) -> Self {
        Body::Bytes(bytes.to_vec())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_string())
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Json(value)
    }
}

impl From<Multipart> for Body {
    fn from(form: Multipart) -> Self {
        Body::Multipart(form)
    }
}

#[derive(Debug)]
pub(crate) struct Encoded {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Parts of a `multipart/form-data` body.
///
/// Framing is done by `ureq`'s form encoder when the body is encoded, and
/// each encode draws a fresh boundary. Always take the content type from the
/// same encode as the bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Multipart {
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: Vec<u8>,
}

impl Multipart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.parts.push(Part {
            name: name.to_string(),
            filename: None,
            content_type: None,
            data: value.as_bytes().to_vec(),
        });
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, data: Vec<u8>) -> Self {
        self.parts.push(Part {
            name: name.to_string(),
            filename: Some(filename.to_string()),
            content_type: Some(content_type.to_string()),
            data,
        });
        self
    }

    fn encode(&self) -> Result<Encoded, ApiError> {
        let mut form = Form::new();
        for part in &self.parts {
            let mut field = FormPart::bytes(&part.data);
            if let Some(filename) = &part.filename {
                field = field.file_name(filename);
            }
            if let Some(content_type) = &part.content_type {
                field = field.mime_str(content_type).map_err(ApiError::unknown)?;
            }
            form = form.part(&part.name, field);
        }

        let content_type = format!("multipart/form-data; boundary={}", form.boundary());
        let mut bytes = Vec::new();
        form.read_to_end(&mut bytes).map_err(ApiError::unknown)?;
        Ok(Encoded {
            content_type: Some(content_type),
            bytes,
        })
    }
}
