//! HLS Key Server Library
//!
//! Serves AES-128 content keys to HLS players behind short-lived bearer tokens.
//!
//! # Features
//!
//! - **Key cache**: in-memory snapshot of a key directory, swapped atomically on reload
//! - **Hot reload**: `POST /api/v1/hls/reload` or `SIGHUP`; a failed reload keeps the old keys
//! - **Token gate**: HS256 tokens bound to issuer and audience, strict expiry
//! - **Traversal-proof names**: key identifiers are validated before any lookup
//! - **Metrics**: Prometheus text output at `/metrics` behind basic auth

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod key_store;
pub mod observability;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
