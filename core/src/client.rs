//! Request client: one call in, a success envelope or an [`ApiError`] out.
//!
//! # Design
//! `ApiClient` holds only the immutable [`ClientConfig`] and a shared
//! [`Transport`]; no per-call state lives on the client, so clones and
//! concurrent calls are independent. Each verb runs the same pipeline:
//!
//! 1. `build_request` resolves the URL, headers, timeout and wire body.
//! 2. The transport performs the round-trip.
//! 3. `parse_response` returns the success envelope or a normalized error.
//!
//! `build_request` and `parse_response` are public so a caller that owns its
//! own I/O can run step 2 itself. A panic inside the transport is caught and
//! reported as `UNKNOWN_ERROR` so nothing but `ApiError` leaves a call.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::body::Body;
use crate::config::ClientConfig;
use crate::envelope::{Envelope, Failure, Success};
use crate::error::{ApiError, ErrorCode, UpstreamResponse};
use crate::http::{set_header, HttpMethod, HttpRequest, HttpResponse};
use crate::normalize::{normalize_error, normalize_response};
use crate::parser;
use crate::transport::{Transport, UreqTransport};

/// Per-call overrides layered on top of the client's base configuration.
///
/// `body` and `json` are only consulted when the call itself passes no body;
/// an explicit body argument always wins and both are then discarded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub body: Option<Body>,
    pub json: Option<Value>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn json(mut self, json: Value) -> Self {
        self.json = Some(json);
        self
    }
}

#[derive(Clone)]
pub struct ApiClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Client over the default blocking transport.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(UreqTransport::new()))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<Success<T>, ApiError> {
        self.request(HttpMethod::Get, path, None, options)
    }

    pub fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<Success<T>, ApiError> {
        self.request(HttpMethod::Delete, path, None, options)
    }

    pub fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Body>,
        options: RequestOptions,
    ) -> Result<Success<T>, ApiError> {
        self.request(HttpMethod::Post, path, body, options)
    }

    pub fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Body>,
        options: RequestOptions,
    ) -> Result<Success<T>, ApiError> {
        self.request(HttpMethod::Put, path, body, options)
    }

    pub fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Body>,
        options: RequestOptions,
    ) -> Result<Success<T>, ApiError> {
        self.request(HttpMethod::Patch, path, body, options)
    }

    pub fn request<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Body>,
        options: RequestOptions,
    ) -> Result<Success<T>, ApiError> {
        self.execute(method, path, body, options)
            .inspect_err(|err| {
                if warrants_warning(err) {
                    tracing::warn!(
                        %method,
                        path,
                        code = %err.code(),
                        status = err.status_code(),
                        correlation_id = err.correlation_id(),
                        "request failed: {err}"
                    );
                } else {
                    tracing::debug!(
                        %method,
                        path,
                        code = %err.code(),
                        status = err.status_code(),
                        correlation_id = err.correlation_id(),
                        "request rejected: {err}"
                    );
                }
            })
    }

    fn execute<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Body>,
        options: RequestOptions,
    ) -> Result<Success<T>, ApiError> {
        let request = self.build_request(method, path, body, options)?;
        tracing::debug!(method = %request.method, url = %request.url, "dispatching request");

        let sent = panic::catch_unwind(AssertUnwindSafe(|| self.transport.send(&request)));
        let response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(normalize_error(err)),
            Err(payload) => return Err(ApiError::from_panic(payload)),
        };

        self.parse_response(&response)
    }

    /// Resolve everything the wire needs for one call.
    ///
    /// Header precedence, lowest first: config defaults, the body's own
    /// content type, per-call headers. The effective timeout is the per-call
    /// one if given, else the configured default.
    pub fn build_request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Body>,
        options: RequestOptions,
    ) -> Result<HttpRequest, ApiError> {
        let RequestOptions {
            headers: call_headers,
            query,
            timeout,
            body: option_body,
            json: option_json,
        } = options;

        let body = select_body(method, body, option_body, option_json);

        let mut headers = self.config.default_headers.clone();
        let wire_body = match body {
            Some(body) => {
                let encoded = body.encode()?;
                if let Some(content_type) = &encoded.content_type {
                    set_header(&mut headers, "content-type", content_type);
                }
                Some(encoded.bytes)
            }
            None => None,
        };
        for (name, value) in &call_headers {
            set_header(&mut headers, name, value);
        }

        Ok(HttpRequest {
            method,
            url: self.config.url_for(path, &query),
            headers,
            body: wire_body,
            timeout: Some(timeout.unwrap_or(self.config.timeout)),
        })
    }

    /// Turn a raw response into the caller's typed success, or an error.
    pub fn parse_response<T: DeserializeOwned>(
        &self,
        response: &HttpResponse,
    ) -> Result<Success<T>, ApiError> {
        if !response.is_success() {
            return Err(normalize_response(response));
        }

        match parser::parse(response) {
            Envelope::Success(success) => success
                .into_typed()
                .map_err(|err| data_mismatch(response, err)),
            Envelope::Failure(failure) => Err(ApiError::from_failure(
                failure,
                Some(Arc::new(upstream(response))),
            )),
        }
    }
}

/// Apply the body-selection policy for one call.
fn select_body(
    method: HttpMethod,
    explicit: Option<Body>,
    option_body: Option<Body>,
    option_json: Option<Value>,
) -> Option<Body> {
    if !method.allows_body() {
        if explicit.is_some() || option_body.is_some() || option_json.is_some() {
            tracing::debug!(%method, "dropping request body for a method without one");
        }
        return None;
    }
    match explicit {
        Some(body) => {
            if option_body.is_some() || option_json.is_some() {
                tracing::debug!(%method, "explicit body given, ignoring body/json from options");
            }
            Some(body)
        }
        None => option_body.or_else(|| option_json.map(Body::Json)),
    }
}

fn upstream(response: &HttpResponse) -> UpstreamResponse {
    UpstreamResponse {
        status: response.status,
        content_type: response.content_type().map(str::to_string),
        body: response.body.clone(),
    }
}

fn data_mismatch(response: &HttpResponse, err: serde_json::Error) -> ApiError {
    let failure = Failure::new(
        response.status,
        ErrorCode::UpstreamJsonError.as_str(),
        format!("Response data has an unexpected shape: {err}"),
    )
    .with_details(json!({ "reason": err.to_string() }))
    .with_correlation_id(response.correlation_id());
    ApiError::from_failure(failure, Some(Arc::new(err)))
}

/// 4xx answers are routine (validation, signed-out sessions). Server faults
/// and `UNKNOWN_ERROR` (status 0) warn.
fn warrants_warning(err: &ApiError) -> bool {
    !(400..500).contains(&err.status_code())
}

static DEFAULT_CLIENT: OnceLock<ApiClient> = OnceLock::new();

/// Process-wide client configured from the environment on first use.
///
/// An unusable environment (e.g. a malformed timeout) is logged and the
/// built-in defaults are used instead.
pub fn default_client() -> &'static ApiClient {
    DEFAULT_CLIENT.get_or_init(|| {
        let config = ClientConfig::from_env().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "invalid client configuration, using defaults");
            ClientConfig::default()
        });
        ApiClient::new(config)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use serde::Deserialize;

    use super::*;
    use crate::body::{Multipart, JSON_CONTENT_TYPE};
    use crate::transport::TransportError;

    /// Replays a canned response and records every request it sees.
    struct Canned {
        response: Result<HttpResponse, fn() -> TransportError>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Canned {
        fn ok(response: HttpResponse) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(response),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(err: fn() -> TransportError) -> Arc<Self> {
            Arc::new(Self {
                response: Err(err),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn last(&self) -> HttpRequest {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl Transport for Canned {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            match &self.response {
                Ok(response) => Ok(response.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    struct Panicking;

    impl Transport for Panicking {
        fn send(&self, _: &HttpRequest) -> Result<HttpResponse, TransportError> {
            panic!("socket table corrupted");
        }
    }

    fn client_with(transport: Arc<dyn Transport>) -> ApiClient {
        ApiClient::with_transport(ClientConfig::new("http://localhost:3000"), transport)
    }

    fn client() -> ApiClient {
        client_with(Canned::ok(HttpResponse::new(204, "")))
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct PostRef {
        id: String,
    }

    #[test]
    fn plain_object_body_is_sent_as_json() {
        let body = Body::json(&json!({"title": "Hello", "tags": ["rust"]})).unwrap();
        let req = client()
            .build_request(HttpMethod::Post, "/posts", Some(body), RequestOptions::new())
            .unwrap();
        assert_eq!(req.url, "http://localhost:3000/posts");
        assert_eq!(req.header("content-type"), Some(JSON_CONTENT_TYPE));
        let sent: Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(sent, json!({"title": "Hello", "tags": ["rust"]}));
    }

    #[test]
    fn explicit_multipart_body_beats_json_option() {
        let form = Multipart::new().text("caption", "sunset");
        let options = RequestOptions::new().json(json!({"ignored": true}));

        let req = client()
            .build_request(HttpMethod::Post, "/media", Some(Body::from(form)), options)
            .unwrap();

        let content_type = req.header("content-type").unwrap();
        let boundary = content_type
            .strip_prefix("multipart/form-data; boundary=")
            .unwrap();
        let sent = String::from_utf8(req.body.clone().unwrap()).unwrap();
        assert!(sent.starts_with(&format!("--{boundary}\r\n")));
        assert!(sent.contains("name=\"caption\"\r\n\r\nsunset\r\n"));
        assert!(!sent.contains("ignored"));
    }

    #[test]
    fn explicit_body_beats_body_option() {
        let options = RequestOptions::new().body(Body::from("from options"));
        let req = client()
            .build_request(HttpMethod::Put, "/posts/1", Some(Body::from("explicit")), options)
            .unwrap();
        assert_eq!(req.body.as_deref(), Some(b"explicit".as_slice()));
    }

    #[test]
    fn option_body_is_used_without_explicit_body() {
        let options = RequestOptions::new()
            .body(Body::from(vec![9u8, 8, 7]))
            .json(json!({"ignored": true}));
        let req = client()
            .build_request(HttpMethod::Post, "/upload", None, options)
            .unwrap();
        assert_eq!(req.body.as_deref(), Some([9u8, 8, 7].as_slice()));
        assert_eq!(req.header("content-type"), None);
    }

    #[test]
    fn option_json_is_used_as_last_resort() {
        let options = RequestOptions::new().json(json!({"published": true}));
        let req = client()
            .build_request(HttpMethod::Patch, "/posts/1", None, options)
            .unwrap();
        assert_eq!(req.header("content-type"), Some(JSON_CONTENT_TYPE));
        assert_eq!(req.body.as_deref(), Some(br#"{"published":true}"#.as_slice()));
    }

    #[test]
    fn call_headers_override_body_content_type() {
        let body = Body::json(&json!({"a": 1})).unwrap();
        let options = RequestOptions::new().header("Content-Type", "application/vnd.blog+json");
        let req = client()
            .build_request(HttpMethod::Post, "/posts", Some(body), options)
            .unwrap();
        assert_eq!(req.header("content-type"), Some("application/vnd.blog+json"));
        assert_eq!(
            req.headers
                .iter()
                .filter(|(name, _)| name.eq_ignore_ascii_case("content-type"))
                .count(),
            1
        );
    }

    #[test]
    fn get_never_carries_a_body() {
        let options = RequestOptions::new().json(json!({"q": 1}));
        let req = client()
            .build_request(HttpMethod::Get, "/posts", Some(Body::from("x")), options)
            .unwrap();
        assert!(req.body.is_none());
        assert_eq!(req.header("accept"), Some("application/json"));
    }

    #[test]
    fn timeout_defaults_to_config_and_can_be_overridden() {
        let req = client()
            .build_request(HttpMethod::Get, "/posts", None, RequestOptions::new())
            .unwrap();
        assert_eq!(req.timeout, Some(crate::config::DEFAULT_TIMEOUT));

        let options = RequestOptions::new().timeout(Duration::from_millis(50));
        let req = client()
            .build_request(HttpMethod::Get, "/posts", None, options)
            .unwrap();
        assert_eq!(req.timeout, Some(Duration::from_millis(50)));
    }

    #[test]
    fn query_parameters_are_appended() {
        let options = RequestOptions::new().query("page", 2).query("tag", "rust");
        let req = client()
            .build_request(HttpMethod::Get, "/posts", None, options)
            .unwrap();
        assert_eq!(req.url, "http://localhost:3000/posts?page=2&tag=rust");
    }

    #[test]
    fn get_resolves_to_typed_success() {
        let transport = Canned::ok(HttpResponse::new(
            200,
            r#"{"success":true,"data":{"id":"1"}}"#,
        ));
        let success: Success<PostRef> = client_with(transport.clone())
            .get("/posts/1", RequestOptions::new())
            .unwrap();
        assert_eq!(success.data, PostRef { id: "1".to_string() });
        assert_eq!(transport.last().method, HttpMethod::Get);
    }

    #[test]
    fn html_error_page_is_a_text_error() {
        let transport = Canned::ok(
            HttpResponse::new(500, "<html>Internal Error</html>")
                .with_header("content-type", "text/html"),
        );
        let err = client_with(transport)
            .get::<Value>("/posts", RequestOptions::new())
            .unwrap_err();
        assert_eq!(err.code(), &ErrorCode::UpstreamTextError);
        assert_eq!(err.message(), "<html>Internal Error</html>");
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn failure_envelope_on_2xx_is_still_an_error() {
        let transport = Canned::ok(HttpResponse::new(
            200,
            r#"{"success":false,"statusCode":409,"error":{"code":"SLUG_TAKEN","message":"slug in use"}}"#,
        ));
        let err = client_with(transport)
            .post::<Value>("/posts", None, RequestOptions::new())
            .unwrap_err();
        assert_eq!(err.code(), &ErrorCode::Application("SLUG_TAKEN".to_string()));
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn invalid_json_on_2xx_is_an_error() {
        let transport = Canned::ok(HttpResponse::new(200, "{oops"));
        let err = client_with(transport)
            .get::<Value>("/posts", RequestOptions::new())
            .unwrap_err();
        assert_eq!(err.code(), &ErrorCode::InvalidJson);
    }

    #[test]
    fn empty_2xx_body_resolves_to_unit() {
        let success: Success<()> = client()
            .delete("/posts/1", RequestOptions::new())
            .unwrap();
        assert_eq!(success, Success::new(()));
    }

    #[test]
    fn data_of_the_wrong_shape_is_reported() {
        let transport = Canned::ok(HttpResponse::new(200, r#"{"success":true,"data":[1,2]}"#));
        let err = client_with(transport)
            .get::<PostRef>("/posts/1", RequestOptions::new())
            .unwrap_err();
        assert_eq!(err.code(), &ErrorCode::UpstreamJsonError);
        assert_eq!(err.status_code(), 200);
    }

    #[test]
    fn transport_timeout_is_unknown_error() {
        let transport = Canned::failing(|| TransportError::Timeout);
        let err = client_with(transport)
            .get::<Value>("/slow", RequestOptions::new().timeout(Duration::from_millis(1)))
            .unwrap_err();
        assert_eq!(err.code(), &ErrorCode::UnknownError);
        assert_eq!(err.status_code(), 0);
        assert_eq!(err.message(), "request timed out");
    }

    #[test]
    fn transport_panic_is_rewrapped() {
        let err = client_with(Arc::new(Panicking))
            .get::<Value>("/posts", RequestOptions::new())
            .unwrap_err();
        assert_matches!(err.code(), ErrorCode::UnknownError);
        assert_eq!(err.message(), "socket table corrupted");
    }

    #[test]
    fn clones_share_configuration() {
        let client = client();
        let clone = client.clone();
        assert!(Arc::ptr_eq(&client.config, &clone.config));
    }

    #[test]
    fn only_server_and_network_failures_warn() {
        let rejected = |status: u16, code: &str| {
            ApiError::from_failure(Failure::new(status, code, "nope"), None)
        };
        assert!(!warrants_warning(&rejected(401, "NOT_AUTHENTICATED")));
        assert!(!warrants_warning(&rejected(422, "VALIDATION_ERROR")));
        assert!(warrants_warning(&rejected(503, "UPSTREAM_TEXT_ERROR")));
        assert!(warrants_warning(&normalize_error(TransportError::Timeout)));
    }

    #[test]
    fn default_client_is_built_once() {
        let first = default_client();
        let second = default_client();
        assert!(std::ptr::eq(first, second));

        let from_thread = std::thread::spawn(|| default_client() as *const ApiClient as usize)
            .join()
            .unwrap();
        assert_eq!(from_thread, first as *const ApiClient as usize);

        let expected = ClientConfig::from_env().unwrap_or_default();
        assert_eq!(first.config(), &expected);
    }
}
