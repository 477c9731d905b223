//! Server configuration loaded from environment variables.
//!
//! `DATABASE_URL` and `TOKEN_SIGNING_KEY` are required and startup fails if
//! either is missing or malformed. Everything else has a default.

use std::net::SocketAddr;
use std::time::Duration;

use rentline_shared::constants::SIGNING_SEED_SIZE;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// SQLite connection string (`sqlite://path`, a bare path or `:memory:`).
    /// Env: `DATABASE_URL` (required)
    pub database_url: String,

    /// Ed25519 seed used to sign and verify access tokens (hex, 64 chars).
    /// Env: `TOKEN_SIGNING_KEY` (required)
    pub token_signing_key: [u8; SIGNING_SEED_SIZE],

    /// Socket address for the HTTP API and the websocket hubs.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// How often a statistics snapshot is pushed to staff.
    /// Env: `STATS_INTERVAL_SECS`
    /// Default: 30 seconds
    pub stats_interval: Duration,

    /// Per-connection outbound event queue length. Events beyond it are dropped.
    /// Env: `CONNECTION_BUFFER`
    /// Default: 64
    pub connection_buffer: usize,

    /// `/api` paths that stay reachable during maintenance.
    /// Env: `MAINTENANCE_ALLOW_PATHS` (comma separated)
    /// Default: `/api/health,/api/auth/login`
    pub maintenance_allow_paths: Vec<String>,

    /// Sustained HTTP requests per second per client IP, and burst size.
    /// Env: `HTTP_RATE_LIMIT`, `HTTP_RATE_BURST`
    /// Default: 10/s, burst 30
    pub http_rate: f64,
    pub http_burst: f64,

    /// Sustained hub commands per second per user, and burst size.
    /// Env: `CHAT_RATE_LIMIT`, `CHAT_RATE_BURST`
    /// Default: 5/s, burst 20
    pub chat_rate: f64,
    pub chat_burst: f64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("database_url", &self.database_url)
            .field("token_signing_key", &"<redacted>")
            .field("http_addr", &self.http_addr)
            .field("stats_interval", &self.stats_interval)
            .field("connection_buffer", &self.connection_buffer)
            .field("maintenance_allow_paths", &self.maintenance_allow_paths)
            .field("http_rate", &self.http_rate)
            .field("http_burst", &self.http_burst)
            .field("chat_rate", &self.chat_rate)
            .field("chat_burst", &self.chat_burst)
            .finish()
    }
}

pub fn default_allow_paths() -> Vec<String> {
    vec!["/api/health".to_string(), "/api/auth/login".to_string()]
}

impl ServerConfig {
    /// Configuration with the required values set and defaults elsewhere.
    pub fn new(database_url: impl Into<String>, token_signing_key: [u8; SIGNING_SEED_SIZE]) -> Self {
        Self {
            database_url: database_url.into(),
            token_signing_key,
            http_addr: ([0, 0, 0, 0], rentline_shared::constants::DEFAULT_HTTP_PORT).into(),
            stats_interval: Duration::from_secs(30),
            connection_buffer: 64,
            maintenance_allow_paths: default_allow_paths(),
            http_rate: 10.0,
            http_burst: 30.0,
            chat_rate: 5.0,
            chat_burst: 20.0,
        }
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let key_hex = lookup("TOKEN_SIGNING_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("TOKEN_SIGNING_KEY"))?;
        let token_signing_key = parse_hex_key(&key_hex).map_err(|reason| ConfigError::Invalid {
            var: "TOKEN_SIGNING_KEY",
            reason,
        })?;

        let mut config = Self::new(database_url.trim(), token_signing_key);

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(val) = lookup("STATS_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.stats_interval = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid STATS_INTERVAL_SECS, using default"),
            }
        }

        if let Some(val) = lookup("CONNECTION_BUFFER") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.connection_buffer = n,
                _ => tracing::warn!(value = %val, "Invalid CONNECTION_BUFFER, using default"),
            }
        }

        if let Some(val) = lookup("MAINTENANCE_ALLOW_PATHS") {
            let paths: Vec<String> = val
                .split(',')
                .map(|p| p.trim().trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect();
            if !paths.is_empty() {
                config.maintenance_allow_paths = paths;
            }
        }

        read_rate(&lookup, "HTTP_RATE_LIMIT", &mut config.http_rate);
        read_rate(&lookup, "HTTP_RATE_BURST", &mut config.http_burst);
        read_rate(&lookup, "CHAT_RATE_LIMIT", &mut config.chat_rate);
        read_rate(&lookup, "CHAT_RATE_BURST", &mut config.chat_burst);

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        Ok(config)
    }
}

fn read_rate<F>(lookup: &F, var: &str, target: &mut f64)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup(var) {
        match val.parse::<f64>() {
            Ok(n) if n > 0.0 => *target = n,
            _ => tracing::warn!(var, value = %val, "Invalid rate limit value, using default"),
        }
    }
}

/// Parse a hex string into an Ed25519 seed.
fn parse_hex_key(hex_str: &str) -> Result<[u8; SIGNING_SEED_SIZE], String> {
    let hex_str = hex_str.trim();
    if hex_str.len() != SIGNING_SEED_SIZE * 2 {
        return Err(format!(
            "expected {} hex chars, got {}",
            SIGNING_SEED_SIZE * 2,
            hex_str.len()
        ));
    }
    let bytes = hex::decode(hex_str).map_err(|e| e.to_string())?;
    let mut key = [0u8; SIGNING_SEED_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}
