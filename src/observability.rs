//! Prometheus metrics.
//!
//! Counters are recorded through the `metrics` facade at the call sites
//! (gates, handlers, key reload). Until [`install_recorder`] runs every
//! macro is a no-op, so the library stays usable without an exporter.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    middleware::Next,
    response::Response,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use telemetry_metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};

use crate::{Error, Result};

/// HTTP requests by method, matched route and status.
pub const HTTP_REQUESTS_TOTAL: &str = "hls_http_requests_total";
/// HTTP request latency by method and matched route.
pub const HTTP_REQUEST_DURATION: &str = "hls_http_request_duration_seconds";
/// Requests currently in flight.
pub const CONCURRENT_REQUESTS: &str = "hls_concurrent_requests";
/// Key lookups by outcome.
pub const KEY_REQUESTS_TOTAL: &str = "hls_key_requests_total";
/// Lookups answered from the cache.
pub const KEY_CACHE_HITS_TOTAL: &str = "hls_key_cache_hits_total";
/// Well-formed lookups for a key that is not cached.
pub const KEY_CACHE_MISSES_TOTAL: &str = "hls_key_cache_misses_total";
/// Keys in the installed snapshot.
pub const ACTIVE_KEYS: &str = "hls_active_keys";
/// Reloads by result.
pub const KEY_RELOADS_TOTAL: &str = "hls_key_reloads_total";
/// Reload latency.
pub const KEY_RELOAD_DURATION: &str = "hls_key_reload_duration_seconds";
/// Key files skipped because their names failed validation.
pub const KEY_FILES_SKIPPED_TOTAL: &str = "hls_key_files_skipped_total";
/// Issuance attempts by result.
pub const AUTH_ATTEMPTS_TOTAL: &str = "hls_auth_attempts_total";
/// Tokens signed.
pub const TOKEN_GENERATIONS_TOTAL: &str = "hls_token_generations_total";
/// Resource gate decisions by result.
pub const TOKEN_VALIDATIONS_TOTAL: &str = "hls_token_validations_total";

/// Prometheus default latency buckets, in seconds.
const LATENCY_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static RECORDER: OnceLock<std::result::Result<PrometheusHandle, String>> = OnceLock::new();

/// Install the process-wide Prometheus recorder, or return the handle of
/// the one already installed.
pub fn install_recorder() -> Result<PrometheusHandle> {
    RECORDER
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .set_buckets(&LATENCY_BUCKETS)
                .and_then(PrometheusBuilder::install_recorder)
                .map_err(|e| e.to_string())?;
            describe();
            Ok(handle)
        })
        .clone()
        .map_err(|e| Error::Internal(format!("Failed to install metrics recorder: {e}")))
}

fn describe() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests processed");
    describe_histogram!(HTTP_REQUEST_DURATION, "HTTP request duration in seconds");
    describe_gauge!(CONCURRENT_REQUESTS, "Number of HTTP requests in flight");
    describe_counter!(KEY_REQUESTS_TOTAL, "Total number of HLS key requests");
    describe_counter!(KEY_CACHE_HITS_TOTAL, "Total number of key cache hits");
    describe_counter!(KEY_CACHE_MISSES_TOTAL, "Total number of key cache misses");
    describe_gauge!(ACTIVE_KEYS, "Number of currently active HLS keys");
    describe_counter!(KEY_RELOADS_TOTAL, "Total number of key reloads");
    describe_histogram!(KEY_RELOAD_DURATION, "Duration of key reload operations in seconds");
    describe_counter!(KEY_FILES_SKIPPED_TOTAL, "Key files skipped for invalid names");
    describe_counter!(AUTH_ATTEMPTS_TOTAL, "Total number of token issuance attempts");
    describe_counter!(TOKEN_GENERATIONS_TOTAL, "Total number of tokens generated");
    describe_counter!(TOKEN_VALIDATIONS_TOTAL, "Total number of token validations");
}

/// Outcome of a key lookup, used as the `status` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Key bytes were served.
    Served,
    /// The identifier failed validation.
    Invalid,
    /// The identifier is well-formed but unknown.
    NotFound,
}

impl KeyOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Served => "served",
            Self::Invalid => "invalid",
            Self::NotFound => "not_found",
        }
    }
}

pub(crate) fn record_key_request(outcome: KeyOutcome) {
    counter!(KEY_REQUESTS_TOTAL, "status" => outcome.as_str()).increment(1);
    match outcome {
        KeyOutcome::Served => counter!(KEY_CACHE_HITS_TOTAL).increment(1),
        KeyOutcome::NotFound => counter!(KEY_CACHE_MISSES_TOTAL).increment(1),
        KeyOutcome::Invalid => {}
    }
}

pub(crate) fn record_reload(elapsed: Duration, installed_keys: Option<usize>, skipped: usize) {
    histogram!(KEY_RELOAD_DURATION).record(elapsed.as_secs_f64());
    match installed_keys {
        Some(count) => {
            counter!(KEY_RELOADS_TOTAL, "result" => "success").increment(1);
            #[allow(clippy::cast_precision_loss)]
            gauge!(ACTIVE_KEYS).set(count as f64);
            counter!(KEY_FILES_SKIPPED_TOTAL).increment(skipped as u64);
        }
        None => counter!(KEY_RELOADS_TOTAL, "result" => "failure").increment(1),
    }
}

pub(crate) fn record_auth_attempt(admitted: bool) {
    let result = if admitted { "success" } else { "failure" };
    counter!(AUTH_ATTEMPTS_TOTAL, "result" => result).increment(1);
}

pub(crate) fn record_token_issued() {
    counter!(TOKEN_GENERATIONS_TOTAL).increment(1);
}

pub(crate) fn record_token_validation(result: &'static str) {
    counter!(TOKEN_VALIDATIONS_TOTAL, "result" => result).increment(1);
}

/// Request counting middleware. Routes are labelled by their matched
/// pattern so the label set stays bounded.
pub async fn track_http(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());

    gauge!(CONCURRENT_REQUESTS).increment(1.0);
    let response = next.run(request).await;
    gauge!(CONCURRENT_REQUESTS).decrement(1.0);

    let status = response.status().as_u16().to_string();
    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status)
        .increment(1);
    histogram!(HTTP_REQUEST_DURATION, "method" => method, "path" => path)
        .record(start.elapsed().as_secs_f64());

    response
}
