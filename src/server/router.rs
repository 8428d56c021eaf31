//! HTTP router and middleware stack

use std::sync::Arc;
use std::time::Duration;

use axum::{
    BoxError, Router,
    error_handling::HandleErrorLayer,
    http::StatusCode,
    middleware,
    response::Response,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower::timeout::{TimeoutLayer, error::Elapsed};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::{
        CompressionLayer,
        predicate::{DefaultPredicate, NotForContentType, Predicate},
    },
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use super::handler::{
    error_response, get_key_handler, health_handler, issue_token_handler, list_keys_handler,
    metrics_handler, reload_keys_handler,
};
use crate::Result;
use crate::auth::{
    AuthSettings, BasicAuthGate, Clock, IssuanceGate, ResourceGate, TokenIssuer, TokenVerifier,
    require_basic_auth, require_token,
};
use crate::config::Config;
use crate::key_store::KeyStore;
use crate::observability;

/// Prometheus exporter and the credentials guarding it.
#[derive(Clone)]
pub struct MetricsEndpoint {
    /// Renders the process-wide recorder
    pub handle: PrometheusHandle,
    /// Basic auth check
    pub gate: Arc<BasicAuthGate>,
}

/// Shared application state
pub struct AppState {
    /// Key cache
    pub key_store: Arc<KeyStore>,
    /// Token signer
    pub issuer: Arc<TokenIssuer>,
    /// Credential check for token issuance
    pub issuance_gate: IssuanceGate,
    /// Token check for key routes
    pub resource_gate: Arc<ResourceGate>,
    /// Key served when a request names none
    pub default_key: String,
    /// Per-request deadline
    pub request_timeout: Duration,
    /// `/metrics` exporter, when credentials are configured
    pub metrics: Option<MetricsEndpoint>,
}

impl AppState {
    /// Wire the auth components from configuration around an opened key store.
    pub fn from_config(
        config: &Config,
        key_store: Arc<KeyStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let settings = Arc::new(AuthSettings::from_config(&config.jwt)?);
        let issuer = Arc::new(TokenIssuer::new(Arc::clone(&settings), Arc::clone(&clock)));
        let verifier = Arc::new(TokenVerifier::new(Arc::clone(&settings), clock));

        let metrics = if config.metrics.is_enabled() {
            Some(MetricsEndpoint {
                handle: observability::install_recorder()?,
                gate: Arc::new(BasicAuthGate::new(
                    config.metrics.user.clone(),
                    config.metrics.resolve_password(),
                )),
            })
        } else {
            info!("Metrics credentials not configured, /metrics disabled");
            None
        };

        Ok(Self {
            key_store,
            issuer,
            issuance_gate: IssuanceGate::new(settings),
            resource_gate: Arc::new(ResourceGate::new(verifier)),
            default_key: config.keys.default_key.clone(),
            request_timeout: config.server.request_timeout,
            metrics,
        })
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let resource_gate = Arc::clone(&state.resource_gate);

    let key_routes = Router::new()
        .route("/api/v1/hls/key", get(get_key_handler).post(get_key_handler))
        .route("/api/v1/hls/keys", get(list_keys_handler))
        .route("/api/v1/hls/reload", post(reload_keys_handler))
        .route_layer(middleware::from_fn_with_state(resource_gate, require_token));

    // Health and metrics stay uncompressed
    let api_routes = Router::new()
        .route("/api/v1/auth/token", post(issue_token_handler))
        .merge(key_routes)
        .layer(compression_layer());

    let mut router = Router::new()
        .route("/healthz", get(health_handler).post(health_handler))
        .merge(api_routes);

    if let Some(metrics) = &state.metrics {
        let metrics_routes: Router<Arc<AppState>> = Router::new()
            .route("/metrics", get(metrics_handler))
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&metrics.gate),
                require_basic_auth,
            ))
            .with_state(metrics.handle.clone());
        router = router.merge(metrics_routes);
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .layer(TimeoutLayer::new(state.request_timeout)),
        )
        .layer(CatchPanicLayer::new())
        .layer(middleware::from_fn(observability::track_http))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Gzip for JSON responses. Key bytes are incompressible and skipped.
fn compression_layer() -> CompressionLayer<impl Predicate> {
    CompressionLayer::new()
        .gzip(true)
        .compress_when(
            DefaultPredicate::new()
                .and(NotForContentType::const_new("application/octet-stream")),
        )
}

/// Browser players fetch keys cross-origin with cookies, so the request
/// origin is mirrored and credentials are allowed.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .max_age(Duration::from_secs(12 * 60 * 60))
}

async fn handle_middleware_error(err: BoxError) -> Response {
    if err.is::<Elapsed>() {
        warn!("Request exceeded deadline");
        error_response(StatusCode::GATEWAY_TIMEOUT, "Request timeout")
    } else {
        error!(error = %err, "Unhandled middleware error");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}
