//! Local stand-in for the blog API.
//!
//! Speaks the JSON envelope (`{"success": true, "data": ...}` /
//! `{"success": false, "statusCode": ..., "error": {...}}`) for posts, row
//! queries and sessions. The `/fixtures/*` routes misbehave on purpose (HTML
//! error pages, empty bodies, broken JSON, non-UTF-8 bytes, slow replies) so
//! clients can be tested against them. Wire types here are defined
//! independently of the client crate; integration tests catch drift between
//! the two.

use std::{cmp::Ordering, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, Query, RawQuery, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use uuid::Uuid;

/// How long `/fixtures/slow` waits before answering.
pub const SLOW_DELAY: Duration = Duration::from_millis(1_000);

pub const ADMIN_EMAIL: &str = "owner@example.com";
pub const GUEST_EMAIL: &str = "guest@example.com";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub published: bool,
}

#[derive(Deserialize)]
pub struct CreatePost {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub published: bool,
}

#[derive(Deserialize)]
pub struct UpdatePost {
    pub title: Option<String>,
    pub body: Option<String>,
    pub published: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub access_token: String,
}

#[derive(Deserialize)]
pub struct TokenRequest {
    pub code: String,
}

/// Posts in insertion order.
pub type Db = Arc<RwLock<Vec<Post>>>;

pub fn app() -> Router {
    app_with(Db::default())
}

pub fn app_with(db: Db) -> Router {
    Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route(
            "/posts/{id}",
            get(get_post)
                .put(update_post)
                .patch(update_post)
                .delete(delete_post),
        )
        .route("/rows/{table}", get(list_rows))
        .route("/auth/token", post(exchange_token))
        .route("/auth/session", get(current_session))
        .route("/echo", any(echo))
        .route("/fixtures/html-error", get(html_error))
        .route("/fixtures/empty-error", get(empty_error))
        .route("/fixtures/invalid-json", get(invalid_json))
        .route("/fixtures/inconsistent", get(inconsistent))
        .route("/fixtures/foreign-json", get(foreign_json))
        .route("/fixtures/slow", get(slow))
        .route("/fixtures/latin1-error", get(latin1_error))
        .route("/fixtures/binary", get(binary))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

// ---------------------------------------------------------------------------
// Envelope helpers
// ---------------------------------------------------------------------------

fn ok(status: StatusCode, data: impl Serialize) -> Response {
    (status, Json(json!({ "success": true, "data": data }))).into_response()
}

fn fail(status: StatusCode, code: &str, message: &str) -> Response {
    fail_with(status, code, message, None)
}

fn fail_with(status: StatusCode, code: &str, message: &str, fields: Option<Value>) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let mut error = json!({ "code": code, "message": message });
    if let Some(fields) = fields {
        error["fields"] = fields;
    }
    let body = json!({
        "success": false,
        "statusCode": status.as_u16(),
        "correlationId": correlation_id,
        "error": error,
    });
    (
        status,
        [("x-correlation-id", correlation_id.as_str())],
        Json(body),
    )
        .into_response()
}

fn not_found(id: Uuid) -> Response {
    fail(StatusCode::NOT_FOUND, "NOT_FOUND", &format!("post {id} not found"))
}

// ---------------------------------------------------------------------------
// Posts
// ---------------------------------------------------------------------------

async fn list_posts(State(db): State<Db>) -> Response {
    let posts = db.read().await;
    let body = json!({
        "success": true,
        "data": &*posts,
        "meta": { "count": posts.len() },
    });
    Json(body).into_response()
}

async fn create_post(State(db): State<Db>, Json(input): Json<CreatePost>) -> Response {
    if input.title.trim().is_empty() {
        return fail_with(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            "post is invalid",
            Some(json!({ "title": ["must not be empty"] })),
        );
    }
    let post = Post {
        id: Uuid::new_v4(),
        title: input.title,
        body: input.body,
        published: input.published,
    };
    db.write().await.push(post.clone());
    ok(StatusCode::CREATED, post)
}

async fn get_post(State(db): State<Db>, Path(id): Path<Uuid>) -> Response {
    let posts = db.read().await;
    match posts.iter().find(|p| p.id == id) {
        Some(post) => ok(StatusCode::OK, post),
        None => not_found(id),
    }
}

async fn update_post(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdatePost>,
) -> Response {
    let mut posts = db.write().await;
    let Some(post) = posts.iter_mut().find(|p| p.id == id) else {
        return not_found(id);
    };
    if let Some(title) = input.title {
        post.title = title;
    }
    if let Some(body) = input.body {
        post.body = body;
    }
    if let Some(published) = input.published {
        post.published = published;
    }
    ok(StatusCode::OK, post.clone())
}

async fn delete_post(State(db): State<Db>, Path(id): Path<Uuid>) -> Response {
    let mut posts = db.write().await;
    let before = posts.len();
    posts.retain(|p| p.id != id);
    if posts.len() == before {
        return not_found(id);
    }
    StatusCode::NO_CONTENT.into_response()
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

async fn list_rows(
    State(db): State<Db>,
    Path(table): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    if table != "posts" {
        return fail(
            StatusCode::NOT_FOUND,
            "UNKNOWN_TABLE",
            &format!("table {table} does not exist"),
        );
    }

    let mut rows: Vec<Map<String, Value>> = db
        .read()
        .await
        .iter()
        .filter_map(|post| match serde_json::to_value(post) {
            Ok(Value::Object(row)) => Some(row),
            _ => None,
        })
        .collect();

    let mut select: Option<Vec<String>> = None;
    let mut limit: Option<usize> = None;
    for (key, value) in &params {
        match key.as_str() {
            "select" => select = Some(value.split(',').map(str::to_string).collect()),
            "limit" => match value.parse() {
                Ok(n) => limit = Some(n),
                Err(_) => {
                    return fail(StatusCode::BAD_REQUEST, "BAD_QUERY", "limit must be a number")
                }
            },
            "order" => {
                let (column, direction) = value.rsplit_once('.').unwrap_or((value.as_str(), "asc"));
                rows.sort_by(|a, b| compare(a.get(column), b.get(column)));
                if direction == "desc" {
                    rows.reverse();
                }
            }
            column => {
                let Some(expected) = value.strip_prefix("eq.") else {
                    return fail(
                        StatusCode::BAD_REQUEST,
                        "BAD_QUERY",
                        &format!("unsupported filter on {column}"),
                    );
                };
                rows.retain(|row| row.get(column).is_some_and(|v| render(v) == expected));
            }
        }
    }

    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    if let Some(columns) = select {
        for row in &mut rows {
            row.retain(|key, _| columns.iter().any(|c| c == key));
        }
    }

    ok(StatusCode::OK, rows)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

fn session_for(token: &str) -> Option<Session> {
    let email = match token {
        "token-owner" => ADMIN_EMAIL,
        "token-guest" => GUEST_EMAIL,
        _ => return None,
    };
    Some(Session {
        user_id: format!("user-{}", token.trim_start_matches("token-")),
        email: email.to_string(),
        access_token: token.to_string(),
    })
}

async fn exchange_token(Json(input): Json<TokenRequest>) -> Response {
    let token = match input.code.as_str() {
        "owner-code" => "token-owner",
        "guest-code" => "token-guest",
        _ => {
            tracing::debug!(code = %input.code, "rejecting unknown authorization code");
            return fail(
                StatusCode::UNAUTHORIZED,
                "INVALID_GRANT",
                "authorization code is invalid or expired",
            )
        }
    };
    tracing::debug!(token, "issued session");
    match session_for(token) {
        Some(session) => ok(StatusCode::OK, session),
        None => fail(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "no session"),
    }
}

async fn current_session(headers: HeaderMap) -> Response {
    let session = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(session_for);
    match session {
        Some(session) => ok(StatusCode::OK, session),
        None => {
            tracing::debug!("no active session for request");
            fail(StatusCode::UNAUTHORIZED, "NOT_AUTHENTICATED", "no active session")
        }
    }
}

// ---------------------------------------------------------------------------
// Echo and fixtures
// ---------------------------------------------------------------------------

async fn echo(method: Method, headers: HeaderMap, RawQuery(query): RawQuery, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    ok(
        StatusCode::OK,
        json!({
            "method": method.as_str(),
            "contentType": content_type,
            "query": query,
            "body": String::from_utf8_lossy(&body),
            "bodyLength": body.len(),
        }),
    )
}

async fn html_error() -> Response {
    tracing::debug!("serving html error page");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/html")],
        "<html>Internal Error</html>",
    )
        .into_response()
}

async fn empty_error() -> Response {
    tracing::debug!("serving empty error body");
    StatusCode::SERVICE_UNAVAILABLE.into_response()
}

async fn invalid_json() -> Response {
    tracing::debug!("serving truncated json");
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"success": tru"#,
    )
        .into_response()
}

async fn inconsistent() -> Response {
    tracing::debug!("serving success envelope with failure status");
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "success": true, "data": { "ok": true } })),
    )
        .into_response()
}

async fn foreign_json() -> Response {
    tracing::debug!("serving non-envelope json error");
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": { "message": "title is required" } })),
    )
        .into_response()
}

async fn slow() -> Response {
    tracing::debug!(delay_ms = SLOW_DELAY.as_millis() as u64, "delaying response");
    tokio::time::sleep(SLOW_DELAY).await;
    ok(StatusCode::OK, json!({ "slow": true }))
}

/// JSON error whose message is Latin-1 encoded, so the body is not UTF-8.
async fn latin1_error() -> Response {
    tracing::debug!("serving latin-1 json error");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::CONTENT_TYPE, "application/json")],
        Bytes::from_static(b"{\"message\":\"caf\xe9 down\"}"),
    )
        .into_response()
}

async fn binary() -> Response {
    tracing::debug!("serving binary body");
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Bytes::from_static(b"\xff\xfe garbage"),
    )
        .into_response()
}
