//! Admission checks in front of token issuance and key access.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::{AuthError, AuthSettings, Principal, TokenVerifier};
use crate::observability;

/// Name of the query parameter and cookie that may carry a token.
pub const TOKEN_PARAM: &str = "token";

/// Credential check guarding token issuance.
///
/// Both the username and the shared header value are compared in constant
/// time, and both comparisons always run, so neither the response nor its
/// timing reveals which one failed.
#[derive(Debug, Clone)]
pub struct IssuanceGate {
    settings: Arc<AuthSettings>,
}

impl IssuanceGate {
    /// Create a gate checking against the configured user and header.
    #[must_use]
    pub fn new(settings: Arc<AuthSettings>) -> Self {
        Self { settings }
    }

    /// Check a username against the issuance header in `headers`.
    pub fn admit(&self, headers: &HeaderMap, username: Option<&str>) -> Result<Principal, AuthError> {
        let header_value = headers
            .get(self.settings.header_name.as_str())
            .and_then(|v| v.to_str().ok());
        self.check(username, header_value)
    }

    /// Check raw credentials.
    pub fn check(
        &self,
        username: Option<&str>,
        header_value: Option<&str>,
    ) -> Result<Principal, AuthError> {
        let username = username.unwrap_or_default();
        let header_value = header_value.unwrap_or_default();

        let user_ok = username
            .as_bytes()
            .ct_eq(self.settings.allowed_user.as_bytes());
        let header_ok = header_value
            .as_bytes()
            .ct_eq(self.settings.header_value.as_bytes());

        let admitted = bool::from(user_ok & header_ok) && !username.is_empty();
        observability::record_auth_attempt(admitted);
        if admitted {
            Ok(Principal(username.to_string()))
        } else {
            warn!(username = %username.escape_debug(), "Token request rejected: invalid credentials");
            Err(AuthError::InvalidCredentials)
        }
    }
}

/// Token check guarding every key-store route.
#[derive(Clone)]
pub struct ResourceGate {
    verifier: Arc<TokenVerifier>,
}

impl ResourceGate {
    /// Create a gate backed by `verifier`.
    #[must_use]
    pub fn new(verifier: Arc<TokenVerifier>) -> Self {
        Self { verifier }
    }

    /// Extract and verify the request's token.
    pub fn authorize(&self, headers: &HeaderMap, query: Option<&str>) -> Result<Principal, AuthError> {
        let result = extract_token(headers, query)
            .ok_or(AuthError::TokenMissing)
            .and_then(|token| self.verifier.verify(&token))
            .map(|claims| Principal(claims.sub));

        observability::record_token_validation(match &result {
            Ok(_) => "valid",
            Err(AuthError::TokenMissing) => "missing",
            Err(_) => "invalid",
        });
        result
    }
}

/// HTTP basic auth guarding the metrics endpoint.
#[derive(Clone)]
pub struct BasicAuthGate {
    user: String,
    password: String,
}

impl BasicAuthGate {
    /// Create a gate admitting exactly `user` / `password`.
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Check the request's basic credentials. Both halves are compared in
    /// constant time.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let (user, password) = basic_credentials(headers).unwrap_or_default();

        let user_ok = user.as_bytes().ct_eq(self.user.as_bytes());
        let password_ok = password.as_bytes().ct_eq(self.password.as_bytes());

        if bool::from(user_ok & password_ok) && !self.user.is_empty() {
            Ok(())
        } else {
            warn!(user = %user.escape_debug(), "Metrics request rejected: invalid credentials");
            Err(AuthError::BasicAuthRequired)
        }
    }
}

impl std::fmt::Debug for BasicAuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthGate")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Decode `Authorization: Basic base64(user:password)`.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Find the request's token: `Authorization: Bearer`, then `?token=`, then
/// the `token` cookie. Empty values are treated as absent.
#[must_use]
pub fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    bearer_token(headers)
        .or_else(|| query.and_then(query_token))
        .or_else(|| cookie_token(headers))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn query_token(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, value)| name == TOKEN_PARAM && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_PARAM && !value.is_empty())
        .map(|(_, value)| value.trim_matches('"').to_string())
}

/// Resource-gate middleware: rejects with 401 or stores the [`Principal`] in
/// request extensions before running the inner service.
pub async fn require_token(
    State(gate): State<Arc<ResourceGate>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    match gate.authorize(request.headers(), request.uri().query()) {
        Ok(principal) => {
            debug!(principal = %principal, path = %path, "Authenticated request");
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Request rejected by resource gate");
            e.into_response()
        }
    }
}

/// Basic-auth middleware for the metrics endpoint.
pub async fn require_basic_auth(
    State(gate): State<Arc<BasicAuthGate>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match gate.check(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}
