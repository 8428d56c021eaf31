//! Token-based access control for key lookups.
//!
//! Two flows, both stateless:
//!
//! 1. **Issuance**: `POST /api/v1/auth/token` presents a username (form field)
//!    and a shared secret in a custom header. The [`IssuanceGate`] checks both
//!    in constant time and, on success, the [`TokenIssuer`] signs a short-lived
//!    HS256 token carrying `sub`, `iat`, `exp`, `iss` and `aud`.
//!
//! 2. **Access**: every key-store route sits behind the [`ResourceGate`]. It
//!    extracts a bearer token (header, then `?token=`, then cookie), the
//!    [`TokenVerifier`] validates signature, claims, expiry, issuer and
//!    audience, and the resulting [`Principal`] is attached to the request.
//!
//! ```text
//! Request arrives
//!   -> extract token (Authorization / query / cookie)   -- none: TokenMissing
//!   -> verify signature (HS256/384/512 only)             -- TokenInvalid
//!   -> require sub/iat/exp/iss/aud                       -- TokenInvalid
//!   -> exp / iat / iss / aud checks                      -- TokenInvalid
//!   -> Principal in request extensions -> handler
//! ```
//!
//! Tokens are never stored server-side and there is no revocation list; a
//! token is valid until its `exp`.

pub mod clock;
pub mod gate;
pub mod issuer;
pub mod verifier;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::JwtConfig;
use crate::{Error, Result};

pub use clock::{Clock, ManualClock, SystemClock};
pub use gate::{
    BasicAuthGate, IssuanceGate, ResourceGate, extract_token, require_basic_auth, require_token,
};
pub use issuer::TokenIssuer;
pub use verifier::TokenVerifier;

/// Authentication failures.
///
/// The `Display` output is safe to log; none of the variants carry a token value.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was presented.
    #[error("token is required")]
    TokenMissing,

    /// A token was presented but failed verification.
    #[error("invalid or expired token ({0})")]
    TokenInvalid(TokenRejection),

    /// Issuance credentials (username or header) were wrong.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Basic credentials for the metrics endpoint were absent or wrong.
    #[error("basic authentication required")]
    BasicAuthRequired,

    /// The token could not be signed.
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Why a presented token was rejected.
///
/// Only ever logged; clients always see the same generic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// Not a well-formed token, bad signature, or disallowed algorithm.
    Malformed,
    /// One of `sub`, `iat`, `exp`, `iss`, `aud` is absent or mistyped.
    MissingClaims,
    /// `now >= exp`.
    Expired,
    /// `iat` lies in the future.
    IssuedInFuture,
    /// `iss` does not match the configured issuer.
    IssuerMismatch,
    /// `aud` does not match the configured audience.
    AudienceMismatch,
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Malformed => "malformed or bad signature",
            Self::MissingClaims => "missing claims",
            Self::Expired => "expired",
            Self::IssuedInFuture => "issued in the future",
            Self::IssuerMismatch => "issuer mismatch",
            Self::AudienceMismatch => "audience mismatch",
        };
        f.write_str(reason)
    }
}

/// Signed claim set carried by every access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the authenticated principal.
    pub sub: String,
    /// Issued-at (Unix epoch seconds).
    pub iat: i64,
    /// Expires-at (Unix epoch seconds).
    pub exp: i64,
    /// Issuer.
    pub iss: String,
    /// Audience.
    pub aud: String,
}

/// Authenticated identity attached to a request after the resource gate admits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

impl Principal {
    /// The subject string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolved, immutable auth settings shared by the issuer, verifier and gates.
#[derive(Clone)]
pub struct AuthSettings {
    /// HMAC signing secret.
    pub secret: Vec<u8>,
    /// Token lifetime in minutes.
    pub lifetime_minutes: i64,
    /// `iss` claim value.
    pub issuer: String,
    /// `aud` claim value.
    pub audience: String,
    /// The only username allowed to obtain tokens.
    pub allowed_user: String,
    /// Name of the issuance header.
    pub header_name: String,
    /// Expected value of the issuance header.
    pub header_value: String,
}

impl AuthSettings {
    /// Resolve settings from configuration (`env:VAR` secrets are expanded).
    pub fn from_config(config: &JwtConfig) -> Result<Self> {
        let secret = config.resolve_secret();
        if secret.is_empty() {
            return Err(Error::Config("jwt.secret resolved to an empty value".to_string()));
        }

        Ok(Self {
            secret: secret.into_bytes(),
            lifetime_minutes: config.expire_minutes,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            allowed_user: config.user.clone(),
            header_name: config.header_key.clone(),
            header_value: config.resolve_header_value(),
        })
    }

    /// Token lifetime in seconds.
    #[must_use]
    pub fn lifetime_secs(&self) -> i64 {
        self.lifetime_minutes.saturating_mul(60)
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("secret", &"<redacted>")
            .field("lifetime_minutes", &self.lifetime_minutes)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("allowed_user", &self.allowed_user)
            .field("header_name", &self.header_name)
            .field("header_value", &"<redacted>")
            .finish()
    }
}
