//! Configuration management

use std::{env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::key_store::name::validate_identifier;
use crate::{Error, Result};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "HLS_KEY_SERVER_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before secrets are resolved.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Application mode
    pub app: AppConfig,
    /// Server configuration
    pub server: ServerConfig,
    /// Key directory configuration
    pub keys: KeysConfig,
    /// Token configuration
    pub jwt: JwtConfig,
    /// Metrics endpoint configuration
    #[serde(alias = "metric")]
    pub metrics: MetricsConfig,
}

/// Application-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `development`, `release` or `production`
    pub mode: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: "development".to_string(),
        }
    }
}

impl AppConfig {
    /// Production mode switches logging to JSON.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.mode.eq_ignore_ascii_case("production")
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Per-request deadline
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Key directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Directory holding `*.key` files
    pub directory: PathBuf,
    /// Key served when a request names none
    pub default_key: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./keys"),
            default_key: "stream.key".to_string(),
        }
    }
}

/// Token issuance and verification settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// HMAC secret. Supports a literal value or `env:VAR_NAME`.
    pub secret: String,
    /// Token lifetime in minutes
    #[serde(alias = "expire")]
    pub expire_minutes: i64,
    /// The only username allowed to request tokens
    pub user: String,
    /// Header carrying the issuance secret
    #[serde(alias = "header-key")]
    pub header_key: String,
    /// Expected issuance header value. Supports `env:VAR_NAME`.
    #[serde(alias = "header-value")]
    pub header_value: String,
    /// `iss` claim
    #[serde(alias = "iss")]
    pub issuer: String,
    /// `aud` claim
    #[serde(alias = "aud")]
    pub audience: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expire_minutes: 10,
            user: String::new(),
            header_key: "x-key".to_string(),
            header_value: String::new(),
            issuer: "hls-key-server".to_string(),
            audience: "hls".to_string(),
        }
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("expire_minutes", &self.expire_minutes)
            .field("user", &self.user)
            .field("header_key", &self.header_key)
            .field("header_value", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

impl JwtConfig {
    /// Resolve the signing secret (`env:VAR` is read from the environment).
    #[must_use]
    pub fn resolve_secret(&self) -> String {
        resolve_env_ref(&self.secret)
    }

    /// Resolve the issuance header value (`env:VAR` is read from the environment).
    #[must_use]
    pub fn resolve_header_value(&self) -> String {
        resolve_env_ref(&self.header_value)
    }
}

/// Prometheus endpoint credentials. `/metrics` is only served when both
/// are set.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Basic auth username
    pub user: String,
    /// Basic auth password. Supports `env:VAR_NAME`.
    pub password: String,
}

impl std::fmt::Debug for MetricsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl MetricsConfig {
    /// Resolve the password (`env:VAR` is read from the environment).
    #[must_use]
    pub fn resolve_password(&self) -> String {
        resolve_env_ref(&self.password)
    }

    /// Whether the metrics endpoint should be exposed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.user.is_empty() && !self.resolve_password().is_empty()
    }
}

/// Expand `env:VAR`; an unset variable resolves to an empty string.
fn resolve_env_ref(value: &str) -> String {
    match value.strip_prefix("env:") {
        Some(var_name) => env::var(var_name).unwrap_or_default(),
        None => value.to_string(),
    }
}

impl Config {
    /// Load configuration from an optional YAML file plus `HLS_KEY_SERVER_*`
    /// environment variables (nested with `__`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files must land before `env:` secrets are resolved
        config.load_env_files();

        Ok(config)
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let jwt = &self.jwt;

        if jwt.resolve_secret().is_empty() {
            return Err(Error::Config(
                "jwt.secret is empty (set it directly or via env:VAR)".to_string(),
            ));
        }
        if jwt.expire_minutes <= 0 {
            return Err(Error::Config(format!(
                "jwt.expire_minutes must be positive, got {}",
                jwt.expire_minutes
            )));
        }

        let required = [
            ("jwt.user", jwt.user.as_str()),
            ("jwt.issuer", jwt.issuer.as_str()),
            ("jwt.audience", jwt.audience.as_str()),
            ("jwt.header_key", jwt.header_key.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{name} must not be empty")));
            }
        }
        if jwt.resolve_header_value().is_empty() {
            return Err(Error::Config("jwt.header_value must not be empty".to_string()));
        }
        if axum::http::HeaderName::from_bytes(jwt.header_key.as_bytes()).is_err() {
            return Err(Error::Config(format!(
                "jwt.header_key is not a valid header name: {}",
                jwt.header_key
            )));
        }

        validate_identifier(&self.keys.default_key).map_err(|e| {
            Error::Config(format!(
                "keys.default_key '{}' is not a valid key name: {e}",
                self.keys.default_key
            ))
        })?;

        if self.keys.directory.as_os_str().is_empty() {
            return Err(Error::Config("keys.directory must not be empty".to_string()));
        }

        if self.server.request_timeout.is_zero() {
            return Err(Error::Config(
                "server.request_timeout must be positive".to_string(),
            ));
        }

        if !self.metrics.user.is_empty() && self.metrics.resolve_password().is_empty() {
            return Err(Error::Config(
                "metrics.password must be set when metrics.user is".to_string(),
            ));
        }

        Ok(())
    }

    /// Load env files into the process environment.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!(path = %expanded, "Loaded env file"),
                    Err(e) => tracing::warn!(path = %expanded, error = %e, "Failed to load env file"),
                }
            } else {
                tracing::debug!(path = %expanded, "Env file not found (skipped)");
            }
        }
    }
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Serde helpers for human-readable durations (`"30s"`, `"5m"`, `"250ms"`).
pub mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    /// Serialize a `Duration` as whole seconds (`"30s"`).
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize `"250ms"`, `"30s"`, `"5m"` or a bare number of seconds.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(s) => parse(s.trim()).map_err(serde::de::Error::custom),
        }
    }

    /// Parse a duration string.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let number = |n: &str| {
            n.trim()
                .parse::<u64>()
                .map_err(|e| format!("invalid duration '{s}': {e}"))
        };

        if let Some(ms) = s.strip_suffix("ms") {
            number(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            number(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            number(mins).map(|m| Duration::from_secs(m.saturating_mul(60)))
        } else {
            number(s).map(Duration::from_secs)
        }
    }
}
