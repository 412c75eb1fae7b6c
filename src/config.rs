//! Typed configuration, loaded once from the environment at startup and
//! validated before any port is opened. There is no config file — every
//! setting is a `std::env` read with a documented default.

use std::collections::HashSet;

use anyhow::ensure;

/// Top-level gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub ssl_cert: Option<String>,
    pub ssl_key: Option<String>,

    pub models_dir: String,
    pub default_model: String,
    pub max_model_memory_gb: f64,

    pub api_prefix: String,
    pub max_tokens_default: u32,
    pub max_tokens_limit: u32,

    pub redis_url: Option<String>,
    pub session_ttl_hours: i64,

    pub rate_limit_per_minute: u32,
    pub rate_limit_per_hour: u32,

    pub enable_auth: bool,
    pub api_keys: HashSet<String>,
    pub jwt_secret: String,
    pub jwt_algorithm: String,

    pub enable_metrics: bool,
    pub metrics_port: u16,

    pub allowed_origins: Vec<String>,

    pub journal_dir: String,
}

impl Config {
    /// Load configuration from the process environment, applying defaults
    /// for anything unset, then validate it.
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            server_host: env_or("SERVER_HOST", defaults::SERVER_HOST),
            server_port: env_parsed_or("SERVER_PORT", defaults::SERVER_PORT)?,
            ssl_cert: std::env::var("SSL_CERT").ok(),
            ssl_key: std::env::var("SSL_KEY").ok(),

            models_dir: env_or("MODELS_DIR", defaults::MODELS_DIR),
            default_model: env_or("DEFAULT_MODEL", defaults::DEFAULT_MODEL),
            max_model_memory_gb: env_parsed_or("MAX_MODEL_MEMORY_GB", defaults::MAX_MODEL_MEMORY_GB)?,

            api_prefix: env_or("API_PREFIX", defaults::API_PREFIX),
            max_tokens_default: env_parsed_or("MAX_TOKENS_DEFAULT", defaults::MAX_TOKENS_DEFAULT)?,
            max_tokens_limit: env_parsed_or("MAX_TOKENS_LIMIT", defaults::MAX_TOKENS_LIMIT)?,

            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            session_ttl_hours: env_parsed_or("SESSION_TTL_HOURS", defaults::SESSION_TTL_HOURS)?,

            rate_limit_per_minute: env_parsed_or(
                "RATE_LIMIT_PER_MINUTE",
                defaults::RATE_LIMIT_PER_MINUTE,
            )?,
            rate_limit_per_hour: env_parsed_or("RATE_LIMIT_PER_HOUR", defaults::RATE_LIMIT_PER_HOUR)?,

            enable_auth: env_parsed_or("ENABLE_AUTH", defaults::ENABLE_AUTH)?,
            api_keys: parse_api_keys(&std::env::var("API_KEYS").unwrap_or_default()),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_else(|_| generate_ephemeral_secret()),
            jwt_algorithm: env_or("JWT_ALGORITHM", defaults::JWT_ALGORITHM),

            enable_metrics: env_parsed_or("ENABLE_METRICS", defaults::ENABLE_METRICS)?,
            metrics_port: env_parsed_or("METRICS_PORT", defaults::METRICS_PORT)?,

            allowed_origins: parse_origins(&std::env::var("ALLOWED_ORIGINS").unwrap_or_default()),

            journal_dir: env_or("JOURNAL_DIR", defaults::JOURNAL_DIR),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.server_port > 0, "SERVER_PORT must be nonzero");
        ensure!(
            self.max_tokens_default <= self.max_tokens_limit,
            "MAX_TOKENS_DEFAULT ({}) must not exceed MAX_TOKENS_LIMIT ({})",
            self.max_tokens_default,
            self.max_tokens_limit
        );
        ensure!(
            self.max_model_memory_gb > 0.0,
            "MAX_MODEL_MEMORY_GB must be positive"
        );
        if self.enable_auth {
            ensure!(
                !self.api_keys.is_empty() || !self.jwt_secret.is_empty(),
                "ENABLE_AUTH=true requires API_KEYS or a JWT_SECRET to be configured"
            );
        }
        ensure!(
            self.ssl_cert.is_some() == self.ssl_key.is_some(),
            "SSL_CERT and SSL_KEY must both be set or both unset"
        );
        Ok(())
    }

    /// Whether TLS should be enabled for the client listener.
    pub fn tls_enabled(&self) -> bool {
        self.ssl_cert.is_some() && self.ssl_key.is_some()
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{name}: invalid value {raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

fn parse_api_keys(raw: &str) -> HashSet<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return HashSet::new();
    }
    if trimmed.starts_with('[') {
        if let Ok(values) = serde_json::from_str::<Vec<String>>(trimmed) {
            return values.into_iter().collect();
        }
    }
    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Used only when `JWT_SECRET` is unset: a process-lifetime-only secret so
/// signed tokens still work in a single-process dev setup, without the
/// footgun of a fixed compiled-in key reused across deployments.
fn generate_ephemeral_secret() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("ephemeral-{nanos}-{:p}", &nanos)
}

mod defaults {
    pub const SERVER_HOST: &str = "0.0.0.0";
    pub const SERVER_PORT: u16 = 8555;
    pub const MODELS_DIR: &str = "./models";
    pub const DEFAULT_MODEL: &str = "default";
    pub const MAX_MODEL_MEMORY_GB: f64 = 24.0;
    pub const API_PREFIX: &str = "/api/v1";
    pub const MAX_TOKENS_DEFAULT: u32 = 2048;
    pub const MAX_TOKENS_LIMIT: u32 = 32_768;
    pub const SESSION_TTL_HOURS: i64 = 24;
    pub const RATE_LIMIT_PER_MINUTE: u32 = 60;
    pub const RATE_LIMIT_PER_HOUR: u32 = 1000;
    pub const ENABLE_AUTH: bool = true;
    pub const JWT_ALGORITHM: &str = "HS256";
    pub const ENABLE_METRICS: bool = true;
    pub const METRICS_PORT: u16 = 9090;
    pub const JOURNAL_DIR: &str = "./queue";
}
