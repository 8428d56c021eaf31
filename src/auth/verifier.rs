//! Access token verification.
//!
//! # Verification order
//!
//! Short-circuits on the first failure:
//!
//! 1. empty token → [`AuthError::TokenMissing`]
//! 2. signature, restricted to the HMAC family (HS256/384/512)
//! 3. all of `sub`, `iat`, `exp`, `iss`, `aud` present and correctly typed
//! 4. `now >= exp` → expired (strict: a token is dead at exactly `exp`)
//! 5. `iat > now` → issued in the future
//! 6. `iss` / `aud` equal to the configured values
//!
//! Steps 2-6 all surface as [`AuthError::TokenInvalid`]; the attached
//! [`TokenRejection`] is for logs only.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

use super::{AuthError, AuthSettings, Clock, TokenClaims, TokenRejection};

/// Claims as they appear on the wire; every field optional so that a missing
/// claim is distinguishable from a bad signature.
#[derive(Debug, Deserialize)]
struct WireClaims {
    sub: Option<String>,
    iat: Option<i64>,
    exp: Option<i64>,
    iss: Option<String>,
    aud: Option<String>,
}

impl WireClaims {
    fn into_claims(self) -> Option<TokenClaims> {
        Some(TokenClaims {
            sub: self.sub?,
            iat: self.iat?,
            exp: self.exp?,
            iss: self.iss?,
            aud: self.aud?,
        })
    }
}

/// Validates presented tokens against the shared secret and configured claims.
pub struct TokenVerifier {
    settings: Arc<AuthSettings>,
    clock: Arc<dyn Clock>,
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Create a verifier for tokens signed with `settings.secret`.
    #[must_use]
    pub fn new(settings: Arc<AuthSettings>, clock: Arc<dyn Clock>) -> Self {
        let key = DecodingKey::from_secret(&settings.secret);
        Self {
            settings,
            clock,
            key,
            validation: build_validation(),
        }
    }

    /// Verify `token` and return its claims.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::TokenMissing);
        }

        let wire = jsonwebtoken::decode::<WireClaims>(token, &self.key, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "Token signature or structure rejected");
                AuthError::TokenInvalid(TokenRejection::Malformed)
            })?
            .claims;

        let claims = wire
            .into_claims()
            .ok_or(AuthError::TokenInvalid(TokenRejection::MissingClaims))?;

        self.check_claims(&claims)?;
        Ok(claims)
    }

    /// Time and binding checks on an already signature-verified claim set.
    fn check_claims(&self, claims: &TokenClaims) -> Result<(), AuthError> {
        let now = self.clock.now();

        let rejection = if now >= claims.exp {
            Some(TokenRejection::Expired)
        } else if claims.iat > now {
            Some(TokenRejection::IssuedInFuture)
        } else if claims.iss != self.settings.issuer {
            Some(TokenRejection::IssuerMismatch)
        } else if claims.aud != self.settings.audience {
            Some(TokenRejection::AudienceMismatch)
        } else {
            None
        };

        match rejection {
            Some(reason) => Err(AuthError::TokenInvalid(reason)),
            None => Ok(()),
        }
    }
}

/// Signature-only validation: HMAC algorithms, no built-in claim checks.
///
/// Expiry, issuer and audience are checked by hand against the injected clock
/// so that tests are deterministic and the rejection reason is precise.
fn build_validation() -> Validation {
    let mut v = Validation::new(Algorithm::HS256);
    v.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
    v.required_spec_claims.clear();
    v.validate_exp = false;
    v.validate_nbf = false;
    v.validate_aud = false;
    v.leeway = 0;
    v
}

#[cfg(test)]
mod tests {
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;

    use super::*;
    use crate::auth::{ManualClock, TokenIssuer, testing};

    const T0: i64 = 1_700_000_000;

    fn fixture() -> (Arc<ManualClock>, TokenIssuer, TokenVerifier) {
        let settings = Arc::new(testing::settings());
        let clock = Arc::new(ManualClock::new(T0));
        let issuer = TokenIssuer::new(Arc::clone(&settings), clock.clone());
        let verifier = TokenVerifier::new(settings, clock.clone());
        (clock, issuer, verifier)
    }

    fn sign(alg: Algorithm, claims: &serde_json::Value, secret: &[u8]) -> String {
        jsonwebtoken::encode(&Header::new(alg), claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn full_claims() -> serde_json::Value {
        json!({
            "sub": "alice",
            "iat": T0,
            "exp": T0 + 600,
            "iss": "svc",
            "aud": "hls",
        })
    }

    fn rejection(result: Result<TokenClaims, AuthError>) -> TokenRejection {
        match result {
            Err(AuthError::TokenInvalid(reason)) => reason,
            other => panic!("expected TokenInvalid, got {other:?}"),
        }
    }

    #[test]
    fn round_trip_returns_subject() {
        // GIVEN: a token issued for alice (issuer "svc", audience "hls")
        let (_clock, issuer, verifier) = fixture();
        let token = issuer.issue("alice").unwrap();

        // WHEN: verified
        let claims = verifier.verify(&token).unwrap();

        // THEN: the subject and bindings come back
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.iss, "svc");
        assert_eq!(claims.aud, "hls");
    }

    #[test]
    fn empty_token_is_missing() {
        let (_clock, _issuer, verifier) = fixture();
        assert!(matches!(verifier.verify(""), Err(AuthError::TokenMissing)));
    }

    #[test]
    fn garbage_is_malformed() {
        let (_clock, _issuer, verifier) = fixture();
        assert_eq!(rejection(verifier.verify("invalid.jwt.token")), TokenRejection::Malformed);
        assert_eq!(rejection(verifier.verify("not-a-jwt")), TokenRejection::Malformed);
    }

    #[test]
    fn altering_any_signature_byte_invalidates() {
        // GIVEN: a valid token
        let (_clock, issuer, verifier) = fixture();
        let token = issuer.issue("alice").unwrap();

        // WHEN: the first character of the signature is changed
        let sig_start = token.rfind('.').unwrap() + 1;
        let mut bytes = token.into_bytes();
        bytes[sig_start] = if bytes[sig_start] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        // THEN: verification fails
        assert_eq!(rejection(verifier.verify(&tampered)), TokenRejection::Malformed);
    }

    #[test]
    fn altering_payload_invalidates() {
        let (_clock, issuer, verifier) = fixture();
        let token = issuer.issue("alice").unwrap();

        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let forged = sign(
            Algorithm::HS256,
            &json!({"sub": "mallory", "iat": T0, "exp": T0 + 600, "iss": "svc", "aud": "hls"}),
            b"test-secret-key-for-jwt",
        );
        parts[1] = forged.split('.').nth(1).unwrap().to_string();

        assert_eq!(
            rejection(verifier.verify(&parts.join("."))),
            TokenRejection::Malformed
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (_clock, _issuer, verifier) = fixture();
        let token = sign(Algorithm::HS256, &full_claims(), b"some-other-secret");
        assert_eq!(rejection(verifier.verify(&token)), TokenRejection::Malformed);
    }

    #[test]
    fn other_hmac_strengths_are_accepted() {
        let (_clock, _issuer, verifier) = fixture();
        for alg in [Algorithm::HS384, Algorithm::HS512] {
            let token = sign(alg, &full_claims(), b"test-secret-key-for-jwt");
            assert!(verifier.verify(&token).is_ok(), "{alg:?} should verify");
        }
    }

    #[test]
    fn unsigned_token_is_rejected() {
        // GIVEN: an "alg: none" token built by hand
        let (_clock, _issuer, verifier) = fixture();
        let encode = |v: &serde_json::Value| URL_SAFE_NO_PAD.encode(serde_json::to_vec(v).unwrap());
        let token = format!(
            "{}.{}.",
            encode(&json!({"alg": "none", "typ": "JWT"})),
            encode(&full_claims())
        );

        // THEN: rejected before any claim is trusted
        assert_eq!(rejection(verifier.verify(&token)), TokenRejection::Malformed);
    }

    #[test]
    fn each_missing_claim_is_rejected() {
        let (_clock, _issuer, verifier) = fixture();
        for claim in ["sub", "iat", "exp", "iss", "aud"] {
            let mut claims = full_claims();
            claims.as_object_mut().unwrap().remove(claim);
            let token = sign(Algorithm::HS256, &claims, b"test-secret-key-for-jwt");

            assert_eq!(
                rejection(verifier.verify(&token)),
                TokenRejection::MissingClaims,
                "missing {claim}"
            );
        }
    }

    #[test]
    fn mistyped_claim_is_rejected() {
        let (_clock, _issuer, verifier) = fixture();
        let mut claims = full_claims();
        claims["aud"] = json!(["hls"]);
        let token = sign(Algorithm::HS256, &claims, b"test-secret-key-for-jwt");

        assert!(matches!(verifier.verify(&token), Err(AuthError::TokenInvalid(_))));
    }

    #[test]
    fn lifetime_boundaries() {
        // GIVEN: a token with a 10 minute lifetime
        let (clock, issuer, verifier) = fixture();
        let token = issuer.issue("alice").unwrap();

        // THEN: accepted at L-1 minutes
        clock.set(T0 + 9 * 60);
        assert!(verifier.verify(&token).is_ok());

        // AND: one second before expiry
        clock.set(T0 + 600 - 1);
        assert!(verifier.verify(&token).is_ok());

        // AND: rejected at exactly exp (strict)
        clock.set(T0 + 600);
        assert_eq!(rejection(verifier.verify(&token)), TokenRejection::Expired);

        // AND: rejected at L+1 minutes
        clock.set(T0 + 11 * 60);
        assert_eq!(rejection(verifier.verify(&token)), TokenRejection::Expired);
    }

    #[test]
    fn future_issued_token_is_rejected() {
        let (clock, issuer, verifier) = fixture();
        let token = issuer.issue("alice").unwrap();

        clock.set(T0 - 1);

        assert_eq!(rejection(verifier.verify(&token)), TokenRejection::IssuedInFuture);
    }

    #[test]
    fn issuer_and_audience_must_match() {
        let (_clock, _issuer, verifier) = fixture();

        let mut claims = full_claims();
        claims["iss"] = json!("someone-else");
        let token = sign(Algorithm::HS256, &claims, b"test-secret-key-for-jwt");
        assert_eq!(rejection(verifier.verify(&token)), TokenRejection::IssuerMismatch);

        let mut claims = full_claims();
        claims["aud"] = json!("dash");
        let token = sign(Algorithm::HS256, &claims, b"test-secret-key-for-jwt");
        assert_eq!(rejection(verifier.verify(&token)), TokenRejection::AudienceMismatch);
    }

    #[test]
    fn expiry_is_checked_before_bindings() {
        let (clock, _issuer, verifier) = fixture();
        let mut claims = full_claims();
        claims["iss"] = json!("someone-else");
        let token = sign(Algorithm::HS256, &claims, b"test-secret-key-for-jwt");

        clock.set(T0 + 3600);

        assert_eq!(rejection(verifier.verify(&token)), TokenRejection::Expired);
    }
}
