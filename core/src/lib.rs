//! HTTP client core for the blog's API.
//!
//! # Overview
//! Every API response is a JSON envelope: either a `Success` carrying `data`
//! or a `Failure` carrying a machine-readable `error.code`. This crate issues
//! requests, parses whatever comes back into that envelope, and folds every
//! kind of failure (bad status, empty or garbled body, network error,
//! timeout) into one error type, [`ApiError`]. A call either yields the
//! success envelope or fails with `ApiError`.
//!
//! # Design
//! - `ApiClient` is stateless apart from its immutable `ClientConfig`.
//! - Requests and responses are plain data (`HttpRequest`, `HttpResponse`);
//!   the network round-trip sits behind the [`Transport`] trait.
//! - `parser` and `normalize` are pure functions over a buffered response.
//! - `rows` and `auth` are thin collaborators built on the client: row
//!   queries for pages, and the session provider plus admin gate.

pub mod auth;
pub mod body;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod http;
pub mod normalize;
pub mod parser;
pub mod rows;
pub mod transport;

pub use auth::{AdminGate, Denial, HttpSessionProvider, Session, SessionProvider};
pub use body::{Body, Multipart};
pub use client::{default_client, ApiClient, RequestOptions};
pub use config::{ClientConfig, ConfigError, RuntimeContext};
pub use envelope::{Envelope, ErrorBody, Failure, FieldErrors, Success};
pub use error::{ApiError, ErrorCode};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use normalize::{normalize_error, normalize_response};
pub use parser::parse;
pub use rows::{HttpRowSource, Order, Query, Row, RowSource};
pub use transport::{Transport, TransportError, UreqTransport};
