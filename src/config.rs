//! Configuration loading.
//!
//! Loads smsflow configuration from `./smsflow.toml` (or
//! `$SMSFLOW_CONFIG_PATH`). Environment variables override file values; file
//! values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::expiration::ExpirationTarget;

// ── Top-level config ────────────────────────────────────────────

/// Top-level smsflow configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SmsflowConfig {
    /// SQLite database settings.
    pub database: DatabaseConfig,
    /// Ingest server settings.
    pub server: ServerConfig,
    /// Delayed task scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Message expiration settings.
    pub expiration: ExpirationConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

impl SmsflowConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// If the file does not exist, defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("invalid config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config file path using a custom env resolver.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("SMSFLOW_CONFIG_PATH").map_or_else(|| PathBuf::from("smsflow.toml"), PathBuf::from)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests need not touch the process
    /// environment. Unparseable numbers are ignored with a warning.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("SMSFLOW_DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }

        if let Some(v) = env("SMSFLOW_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = env("SMSFLOW_AUTH_TOKEN") {
            self.server.auth_token = Some(v).filter(|t| !t.is_empty());
        }

        if let Some(v) = env("SMSFLOW_SCHEDULER_ENDPOINT") {
            self.scheduler.endpoint = v;
        }
        if let Some(n) = parse_override(&env, "SMSFLOW_SCHEDULER_TIMEOUT_SECS") {
            self.scheduler.timeout_secs = n;
        }

        if let Some(n) = parse_override(&env, "SMSFLOW_EXPIRATION_SECS") {
            self.expiration.default_duration_secs = n;
        }

        if let Some(v) = env("SMSFLOW_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("SMSFLOW_LOGS_DIR") {
            self.logging.logs_dir = Some(PathBuf::from(v));
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: SmsflowConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Where and how expiration checks are delivered.
    pub fn expiration_target(&self) -> ExpirationTarget {
        ExpirationTarget {
            endpoint: self.scheduler.endpoint.clone(),
            queue_name: self.scheduler.queue_name.clone(),
            auth_token: self.server.auth_token.clone(),
            default_duration: Duration::from_secs(self.expiration.default_duration_secs),
        }
    }
}

fn parse_override(env: &impl Fn(&str) -> Option<String>, key: &'static str) -> Option<u64> {
    let v = env(key)?;
    match v.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(var = key, value = %v, "ignoring invalid env override");
            None
        }
    }
}

// ── Sections ────────────────────────────────────────────────────

/// SQLite database settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("smsflow.db"),
        }
    }
}

/// Ingest server settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,
    /// Bearer token required on the events endpoint.
    pub auth_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            auth_token: None,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Delayed task scheduler settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// URL fired tasks are delivered to.
    pub endpoint: String,
    /// Upper bound for one fired request, in seconds.
    pub timeout_secs: u64,
    /// Queue name sent with every task.
    pub queue_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000/v1/events".to_string(),
            timeout_secs: crate::scheduler::DEFAULT_TIMEOUT_SECS,
            queue_name: "events".to_string(),
        }
    }
}

/// Message expiration settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExpirationConfig {
    /// Acknowledgement window when the notification does not carry one.
    pub default_duration_secs: u64,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: crate::expiration::DEFAULT_EXPIRATION.as_secs(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily-rotated JSON logs; console only when unset.
    pub logs_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            logs_dir: None,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
