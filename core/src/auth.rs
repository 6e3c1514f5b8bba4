//! Sessions from the identity provider and the admin gate in front of the
//! blog's admin pages.
//!
//! The OAuth dance itself belongs to the provider. All this module needs is
//! "exchange an authorization code for a session" and "what is the current
//! session, if any". [`AdminGate`] layers an email allow-list on top and
//! decides where the browser goes next.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::body::Body;
use crate::client::{ApiClient, RequestOptions};
use crate::error::ApiError;

/// Comma-separated admin allow-list.
pub const ADMIN_EMAILS_VAR: &str = "ADMIN_EMAILS";

pub const ADMIN_HOME: &str = "/admin";
pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

pub trait SessionProvider {
    fn exchange_code(&self, code: &str) -> Result<Session, ApiError>;

    /// `Ok(None)` when nobody is signed in.
    fn current_session(&self) -> Result<Option<Session>, ApiError>;
}

/// Session provider reached over the API.
///
/// `access_token` is whatever the session cookie carried; without one there
/// is no current session and no request is made.
#[derive(Debug, Clone)]
pub struct HttpSessionProvider {
    client: ApiClient,
    access_token: Option<String>,
}

impl HttpSessionProvider {
    pub fn new(client: ApiClient, access_token: Option<String>) -> Self {
        Self {
            client,
            access_token,
        }
    }
}

impl SessionProvider for HttpSessionProvider {
    fn exchange_code(&self, code: &str) -> Result<Session, ApiError> {
        let body = Body::json(&json!({ "code": code }))?;
        let session = self
            .client
            .post::<Session>("/auth/token", Some(body), RequestOptions::new())?;
        Ok(session.data)
    }

    fn current_session(&self) -> Result<Option<Session>, ApiError> {
        let Some(token) = self.access_token.as_deref() else {
            return Ok(None);
        };
        let options =
            RequestOptions::new().header("authorization", &format!("Bearer {token}"));
        match self.client.get::<Session>("/auth/session", options) {
            Ok(session) => Ok(Some(session.data)),
            Err(err) if err.status_code() == 401 => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Why a request for an admin page was turned away.
#[derive(Debug, thiserror::Error)]
pub enum Denial {
    #[error("not signed in")]
    Unauthenticated,

    #[error("{email} is not an admin")]
    Forbidden { email: String },

    #[error("session lookup failed: {0}")]
    Provider(#[from] ApiError),
}

impl Denial {
    /// Where to send the browser instead.
    pub fn redirect(&self) -> String {
        match self {
            Denial::Unauthenticated => LOGIN_PATH.to_string(),
            Denial::Forbidden { .. } => format!("{LOGIN_PATH}?error=forbidden"),
            Denial::Provider(_) => format!("{LOGIN_PATH}?error=auth"),
        }
    }
}

pub struct AdminGate<P> {
    provider: P,
    admins: Vec<String>,
}

impl<P: SessionProvider> AdminGate<P> {
    pub fn new<S: AsRef<str>>(provider: P, admins: impl IntoIterator<Item = S>) -> Self {
        let admins = admins
            .into_iter()
            .map(|email| email.as_ref().trim().to_ascii_lowercase())
            .filter(|email| !email.is_empty())
            .collect();
        Self { provider, admins }
    }

    /// Allow-list taken from `ADMIN_EMAILS`; an unset variable admits nobody.
    pub fn from_env(provider: P) -> Self {
        let raw = std::env::var(ADMIN_EMAILS_VAR).unwrap_or_default();
        Self::new(provider, raw.split(','))
    }

    pub fn is_admin(&self, email: &str) -> bool {
        let email = email.trim().to_ascii_lowercase();
        self.admins.iter().any(|admin| *admin == email)
    }

    /// Handle the OAuth callback and return the redirect location.
    pub fn handle_callback(&self, code: Option<&str>, next: Option<&str>) -> String {
        let Some(code) = code.filter(|c| !c.trim().is_empty()) else {
            tracing::warn!("oauth callback without a code");
            return format!("{LOGIN_PATH}?error=missing_code");
        };

        let session = match self.provider.exchange_code(code) {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(code = %err.code(), error = %err, "code exchange failed");
                return format!("{LOGIN_PATH}?error=auth");
            }
        };

        if !self.is_admin(&session.email) {
            tracing::warn!(email = %session.email, "non-admin sign-in rejected");
            return format!("{LOGIN_PATH}?error=forbidden");
        }

        safe_next(next).to_string()
    }

    /// The current session, if it belongs to an admin.
    pub fn authorize(&self) -> Result<Session, Denial> {
        let session = self
            .provider
            .current_session()?
            .ok_or(Denial::Unauthenticated)?;
        if self.is_admin(&session.email) {
            Ok(session)
        } else {
            Err(Denial::Forbidden {
                email: session.email,
            })
        }
    }
}

/// Only same-site relative paths are honoured as post-login targets.
fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.starts_with("/\\") => {
            path
        }
        _ => ADMIN_HOME,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;
    use crate::envelope::Failure;

    struct FakeProvider {
        exchange: Result<Session, ApiError>,
        current: Result<Option<Session>, ApiError>,
        codes: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn signed_in(email: &str) -> Self {
            Self {
                exchange: Ok(session(email)),
                current: Ok(Some(session(email))),
                codes: Mutex::new(Vec::new()),
            }
        }
    }

    impl SessionProvider for FakeProvider {
        fn exchange_code(&self, code: &str) -> Result<Session, ApiError> {
            self.codes.lock().unwrap().push(code.to_string());
            self.exchange.clone()
        }

        fn current_session(&self) -> Result<Option<Session>, ApiError> {
            self.current.clone()
        }
    }

    fn session(email: &str) -> Session {
        Session {
            user_id: "u-1".to_string(),
            email: email.to_string(),
            access_token: "token".to_string(),
            expires_at: None,
        }
    }

    fn gate(provider: FakeProvider) -> AdminGate<FakeProvider> {
        AdminGate::new(provider, [" Owner@Example.com ", ""])
    }

    #[test]
    fn admin_matching_ignores_case_and_whitespace() {
        let gate = gate(FakeProvider::signed_in("owner@example.com"));
        assert!(gate.is_admin("OWNER@example.com"));
        assert!(!gate.is_admin("guest@example.com"));
        assert!(!gate.is_admin(""));
    }

    #[test]
    fn callback_redirects_admin_to_next() {
        let gate = gate(FakeProvider::signed_in("owner@example.com"));
        assert_eq!(gate.handle_callback(Some("abc"), Some("/admin/posts")), "/admin/posts");
        assert_eq!(gate.provider.codes.lock().unwrap().as_slice(), ["abc".to_string()]);
    }

    #[test]
    fn callback_ignores_offsite_next() {
        let gate = gate(FakeProvider::signed_in("owner@example.com"));
        assert_eq!(gate.handle_callback(Some("abc"), Some("//evil.com")), ADMIN_HOME);
        assert_eq!(gate.handle_callback(Some("abc"), Some("https://evil.com")), ADMIN_HOME);
        assert_eq!(gate.handle_callback(Some("abc"), None), ADMIN_HOME);
    }

    #[test]
    fn callback_without_code_goes_to_login() {
        let gate = gate(FakeProvider::signed_in("owner@example.com"));
        assert_eq!(gate.handle_callback(None, None), "/login?error=missing_code");
        assert_eq!(gate.handle_callback(Some("  "), None), "/login?error=missing_code");
        assert!(gate.provider.codes.lock().unwrap().is_empty());
    }

    #[test]
    fn callback_rejects_non_admins() {
        let gate = gate(FakeProvider::signed_in("guest@example.com"));
        assert_eq!(gate.handle_callback(Some("abc"), None), "/login?error=forbidden");
    }

    #[test]
    fn failed_exchange_goes_to_login() {
        let mut provider = FakeProvider::signed_in("owner@example.com");
        provider.exchange = Err(ApiError::from_failure(
            Failure::new(401, "INVALID_GRANT", "code expired"),
            None,
        ));
        assert_eq!(gate(provider).handle_callback(Some("abc"), None), "/login?error=auth");
    }

    #[test]
    fn authorize_admits_admins() {
        let gate = gate(FakeProvider::signed_in("owner@example.com"));
        assert_eq!(gate.authorize().unwrap().email, "owner@example.com");
    }

    #[test]
    fn authorize_denials_map_to_redirects() {
        let mut provider = FakeProvider::signed_in("owner@example.com");
        provider.current = Ok(None);
        let denial = gate(provider).authorize().unwrap_err();
        assert_matches!(denial, Denial::Unauthenticated);
        assert_eq!(denial.redirect(), "/login");

        let denial = gate(FakeProvider::signed_in("guest@example.com"))
            .authorize()
            .unwrap_err();
        assert_matches!(denial, Denial::Forbidden { ref email } if email == "guest@example.com");
        assert_eq!(denial.redirect(), "/login?error=forbidden");

        let mut provider = FakeProvider::signed_in("owner@example.com");
        provider.current = Err(ApiError::unknown(std::io::Error::other("offline")));
        let denial = gate(provider).authorize().unwrap_err();
        assert_eq!(denial.redirect(), "/login?error=auth");
    }
}
