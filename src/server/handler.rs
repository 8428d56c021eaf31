//! HTTP handlers and error-to-response mapping

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Extension, Form, Json,
    extract::{FromRequest, Multipart, Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::router::AppState;
use crate::auth::{AuthError, Principal};
use crate::key_store::KeyStoreError;
use crate::observability::{self, KeyOutcome};

/// Build a `{"error": message}` response.
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn unauthorized(challenge: &'static str, message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        Json(json!({ "error": message })),
    )
        .into_response()
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::TokenMissing => unauthorized("Bearer", "Token is required"),
            Self::TokenInvalid(_) => unauthorized("Bearer", "Invalid or expired token"),
            Self::InvalidCredentials => {
                error_response(StatusCode::UNAUTHORIZED, "Invalid credentials")
            }
            Self::BasicAuthRequired => {
                unauthorized(r#"Basic realm="metrics""#, "Invalid credentials")
            }
            Self::Signing(e) => {
                error!(error = %e, "Token signing failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate token")
            }
        }
    }
}

impl IntoResponse for KeyStoreError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidIdentifier(_) => error_response(StatusCode::BAD_REQUEST, "Invalid key name"),
            Self::NotFound(_) => error_response(StatusCode::NOT_FOUND, "Key not found"),
            Self::Scan { .. } | Self::Read { .. } => {
                error!(error = %self, "Key lookup failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve key")
            }
        }
    }
}

/// `key` from the query string or form body.
#[derive(Debug, Default, Deserialize)]
pub struct KeyParams {
    /// Requested key identifier
    pub key: Option<String>,
}

/// `username` from the issuance form body.
#[derive(Debug, Default, Deserialize)]
pub struct TokenParams {
    /// Username presented for issuance
    pub username: Option<String>,
}

/// Form fields from an urlencoded or multipart body.
///
/// Never rejects: a missing, unparsable or non-form body yields `T::default()`.
#[derive(Debug, Default)]
pub struct PostForm<T>(pub T);

impl<S, T> FromRequest<S> for PostForm<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default + Send,
{
    type Rejection = std::convert::Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let fields = if content_type.starts_with("application/x-www-form-urlencoded") {
            Form::<T>::from_request(req, state).await.ok().map(|Form(v)| v)
        } else if content_type.starts_with("multipart/form-data") {
            multipart_fields(req, state).await
        } else {
            None
        };

        Ok(Self(fields.unwrap_or_default()))
    }
}

/// Collect the text fields of a multipart body (first non-empty value wins).
async fn multipart_fields<S, T>(req: Request, state: &S) -> Option<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    let mut multipart = Multipart::from_request(req, state).await.ok()?;
    let mut fields = HashMap::new();

    while let Ok(Some(field)) = multipart.next_field().await {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if field.file_name().is_some() || fields.contains_key(&name) {
            continue;
        }
        if let Ok(text) = field.text().await {
            if !text.is_empty() {
                fields.insert(name, serde_json::Value::String(text));
            }
        }
    }

    serde_json::from_value(serde_json::Value::Object(fields.into_iter().collect())).ok()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// GET|POST /healthz
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// POST /api/v1/auth/token
///
/// Form field `username` plus the configured issuance header.
pub async fn issue_token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    PostForm(params): PostForm<TokenParams>,
) -> Response {
    let username = non_empty(params.username);

    let principal = match state.issuance_gate.admit(&headers, username.as_deref()) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    match state.issuer.issue(principal.as_str()) {
        Ok(token) => {
            observability::record_token_issued();
            Json(json!({ "token": token })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET|POST /api/v1/hls/key
///
/// Key name from `?key=`, then the form body, then the configured default.
pub async fn get_key_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<KeyParams>,
    PostForm(form): PostForm<KeyParams>,
) -> Response {
    let name = non_empty(query.key)
        .or_else(|| non_empty(form.key))
        .unwrap_or_else(|| state.default_key.clone());

    match state.key_store.get(&name) {
        Ok(bytes) => {
            observability::record_key_request(KeyOutcome::Served);
            debug!(key = %name, principal = %principal, size = bytes.len(), "Key served");
            (
                [(header::CONTENT_TYPE, "application/octet-stream")],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            match &e {
                KeyStoreError::InvalidIdentifier(_) => {
                    observability::record_key_request(KeyOutcome::Invalid);
                }
                KeyStoreError::NotFound(_) => {
                    observability::record_key_request(KeyOutcome::NotFound);
                }
                KeyStoreError::Scan { .. } | KeyStoreError::Read { .. } => {}
            }
            if e.is_client_error() {
                warn!(key = ?name, principal = %principal, error = %e, "Key request rejected");
            }
            e.into_response()
        }
    }
}

/// GET /api/v1/hls/keys
pub async fn list_keys_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut keys = state.key_store.list();
    keys.sort_unstable();
    Json(json!({ "keys": keys }))
}

/// POST /api/v1/hls/reload
pub async fn reload_keys_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Response {
    match state.key_store.reload().await {
        Ok(summary) => {
            info!(
                principal = %principal,
                count = summary.loaded,
                skipped = summary.skipped,
                superseded = summary.superseded,
                "Keys reloaded on request"
            );
            Json(json!({
                "message": "Keys reloaded successfully",
                "count": summary.loaded,
            }))
            .into_response()
        }
        Err(e) => {
            error!(principal = %principal, error = %e, "Key reload failed, previous keys remain in force");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to reload keys")
        }
    }
}

/// GET /metrics (Prometheus text format)
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenRejection;
    use crate::key_store::InvalidIdentifier;

    async fn post_form<T>(content_type: &str, body: &'static str) -> T
    where
        T: DeserializeOwned + Default + Send,
    {
        let request = axum::http::Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, content_type)
            .body(axum::body::Body::from(body))
            .unwrap();
        let PostForm(value) = PostForm::<T>::from_request(request, &()).await.unwrap();
        value
    }

    #[tokio::test]
    async fn post_form_reads_urlencoded_fields() {
        let params: KeyParams =
            post_form("application/x-www-form-urlencoded", "key=a%20b.key").await;
        assert_eq!(params.key.as_deref(), Some("a b.key"));
    }

    #[tokio::test]
    async fn post_form_reads_multipart_fields() {
        // GIVEN: a multipart body with an empty and a real username part
        let body = "--XYZ\r\n\
                    Content-Disposition: form-data; name=\"username\"\r\n\r\n\
                    \r\n\
                    --XYZ\r\n\
                    Content-Disposition: form-data; name=\"username\"\r\n\r\n\
                    player\r\n\
                    --XYZ--\r\n";

        // WHEN: parsed as issuance params
        let params: TokenParams = post_form("multipart/form-data; boundary=XYZ", body).await;

        // THEN: the first non-empty value is used
        assert_eq!(params.username.as_deref(), Some("player"));
    }

    #[tokio::test]
    async fn post_form_ignores_other_bodies() {
        let params: KeyParams = post_form("application/json", r#"{"key":"live.key"}"#).await;
        assert_eq!(params.key, None);

        let params: KeyParams = post_form("application/x-www-form-urlencoded", "%%%").await;
        assert_eq!(params.key, None);
    }

    #[test]
    fn auth_errors_map_to_statuses() {
        let resp = AuthError::TokenMissing.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[header::WWW_AUTHENTICATE], "Bearer");

        let resp = AuthError::TokenInvalid(TokenRejection::Expired).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = AuthError::InvalidCredentials.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().get(header::WWW_AUTHENTICATE).is_none());

        let resp = AuthError::BasicAuthRequired.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers()[header::WWW_AUTHENTICATE],
            r#"Basic realm="metrics""#
        );

        let resp = AuthError::Signing("boom".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn key_store_errors_map_to_statuses() {
        let resp = KeyStoreError::InvalidIdentifier(InvalidIdentifier::Traversal).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = KeyStoreError::NotFound("x.key".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = KeyStoreError::Scan {
            source: std::io::Error::other("disk gone"),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
