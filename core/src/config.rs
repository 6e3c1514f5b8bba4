//! Process-wide base configuration for the API client.
//!
//! # Design
//! A `ClientConfig` is built once (usually from the environment) and never
//! mutated afterwards; clients share it behind an `Arc`. Environment
//! resolution takes a lookup closure instead of reading `std::env` directly
//! so it can be exercised in tests without touching process state.

use std::time::Duration;

use url::form_urlencoded;

/// Candidate base-URL variables, highest priority first.
pub const BASE_URL_VARS: [&str; 3] = ["API_BASE_URL", "PUBLIC_API_BASE_URL", "SITE_URL"];

/// Optional override of the default timeout, in milliseconds.
pub const TIMEOUT_VAR: &str = "API_TIMEOUT_MS";

pub const DEFAULT_SERVER_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_BROWSER_BASE_URL: &str = "/api";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a whole number of milliseconds, got {value:?}")]
    InvalidTimeout { var: &'static str, value: String },
}

/// Where the client is running, which decides the fallback origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeContext {
    /// Same-origin requests from a page; a relative base path suffices.
    Browser,
    Server,
}

impl RuntimeContext {
    pub fn current() -> Self {
        if cfg!(target_arch = "wasm32") {
            RuntimeContext::Browser
        } else {
            RuntimeContext::Server
        }
    }

    fn fallback_base_url(self) -> &'static str {
        match self {
            RuntimeContext::Browser => DEFAULT_BROWSER_BASE_URL,
            RuntimeContext::Server => DEFAULT_SERVER_BASE_URL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub default_headers: Vec<(String, String)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(RuntimeContext::current().fallback_base_url())
    }
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
            default_headers: vec![("accept".to_string(), "application/json".to_string())],
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        crate::http::set_header(&mut self.default_headers, name, value);
        self
    }

    /// Build from the real process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(|var| std::env::var(var).ok(), RuntimeContext::current())
    }

    pub fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        context: RuntimeContext,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::new(&resolve_base_url(&lookup, context));

        if let Some(raw) = lookup(TIMEOUT_VAR).filter(|v| !v.trim().is_empty()) {
            let millis: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout {
                    var: TIMEOUT_VAR,
                    value: raw.clone(),
                })?;
            config.timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }

    /// Absolute URLs are used verbatim; anything else is joined onto the
    /// base URL. Query pairs are form-encoded and appended.
    pub fn url_for(&self, path: &str, query: &[(String, String)]) -> String {
        let mut url = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        };

        if !query.is_empty() {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(query)
                .finish();
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&encoded);
        }

        url
    }
}

/// First non-empty candidate variable wins; otherwise the context fallback.
pub fn resolve_base_url(
    lookup: impl Fn(&str) -> Option<String>,
    context: RuntimeContext,
) -> String {
    for var in BASE_URL_VARS {
        if let Some(value) = lookup(var) {
            let value = value.trim();
            if !value.is_empty() {
                tracing::debug!(var, base_url = value, "resolved API base URL");
                return value.to_string();
            }
        }
    }
    let fallback = context.fallback_base_url();
    tracing::debug!(base_url = fallback, "no base URL configured, using fallback");
    fallback.to_string()
}
