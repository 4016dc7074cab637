//! Environment resolution.
//!
//! Process configuration arrives as flat key/value pairs. Two naming
//! conventions are accepted for the Firestore settings: the primary `APP_*`
//! keys and the legacy `FIREBASE_*` aliases. Both collapse into [`AppConfig`],
//! with the primary key winning when both are set.

use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_ENVIRONMENT: Environment = Environment::Development;
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DATABASE_ID: &str = "sports-data";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
#[error("Config validation error: {0}")]
pub struct ConfigValidationError(String);

impl ConfigValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<ConfigValidationError> for AppError {
    fn from(err: ConfigValidationError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            _ => Err(format!(
                "\"NODE_ENV\" must be one of [development, production, test], got \"{}\"",
                s
            )),
        }
    }
}

/// Validated, normalized process configuration. Read-only after startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub port: u16,
    pub host: String,
    pub version: Option<String>,
    pub project_id: Option<String>,
    pub database_id: String,
    pub service_account_email: Option<String>,
    /// May still contain literal `\n` sequences; unescaped at use.
    pub service_account_private_key: Option<Secret<String>>,
    pub credentials_file: Option<PathBuf>,
    /// `None` means no explicit list was configured.
    pub cors_origins: Option<Vec<String>>,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub firestore_emulator_host: Option<String>,
}

/// Accepted keys. Anything else in the environment is ignored.
#[derive(Default, Deserialize)]
#[serde(default)]
struct RawEnv {
    node_env: Option<String>,
    port: Option<String>,
    app_version: Option<String>,
    app_project_id: Option<String>,
    app_firestore_database_id: Option<String>,
    app_sa_client_email: Option<String>,
    app_sa_private_key: Option<String>,
    firebase_project_id: Option<String>,
    firebase_firestore_database_id: Option<String>,
    firebase_client_email: Option<String>,
    firebase_private_key: Option<String>,
    google_application_credentials: Option<String>,
    host: Option<String>,
    cors_origins: Option<String>,
    log_level: Option<String>,
    otlp_endpoint: Option<String>,
    firestore_emulator_host: Option<String>,
}

/// Validates raw key/value configuration and normalizes it into [`AppConfig`].
///
/// Stops at the first violation:
/// - `NODE_ENV` outside `development | production | test`
/// - `PORT` not an integer in `0..=65535`
/// - production without `APP_PROJECT_ID` / `FIREBASE_PROJECT_ID`
///
/// Empty values count as unset, except for `NODE_ENV` and `PORT`, where an
/// empty value is invalid.
pub fn resolve(raw: &HashMap<String, String>) -> Result<AppConfig, ConfigValidationError> {
    let env: RawEnv = core_config::from_key_values(raw)
        .map_err(|e| ConfigValidationError::new(e.to_string()))?;

    let node_env = env.node_env.or_else(|| blank(raw, "NODE_ENV"));
    let environment = match node_env.as_deref() {
        Some(value) => value.parse().map_err(ConfigValidationError::new)?,
        None => DEFAULT_ENVIRONMENT,
    };

    let port = env.port.or_else(|| blank(raw, "PORT"));
    let port = match port.as_deref() {
        Some(value) => parse_port(value)?,
        None => DEFAULT_PORT,
    };

    let config = AppConfig {
        environment,
        port,
        host: env.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
        version: env.app_version,
        project_id: env.app_project_id.or(env.firebase_project_id),
        database_id: env
            .app_firestore_database_id
            .or(env.firebase_firestore_database_id)
            .unwrap_or_else(|| DEFAULT_DATABASE_ID.to_string()),
        service_account_email: env.app_sa_client_email.or(env.firebase_client_email),
        service_account_private_key: env
            .app_sa_private_key
            .or(env.firebase_private_key)
            .map(Secret::new),
        credentials_file: env.google_application_credentials.map(PathBuf::from),
        cors_origins: env.cors_origins.map(|origins| {
            origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect()
        }),
        log_level: env
            .log_level
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        otlp_endpoint: env.otlp_endpoint,
        firestore_emulator_host: env.firestore_emulator_host,
    };

    if config.environment == Environment::Production && config.project_id.is_none() {
        return Err(ConfigValidationError::new(
            "APP_PROJECT_ID (or FIREBASE_PROJECT_ID) is required in production",
        ));
    }

    Ok(config)
}

/// `Some("")` when `key` is set to an empty value. The shared loader drops
/// empty values, so keys that must reject them are looked up here.
fn blank(raw: &HashMap<String, String>, key: &str) -> Option<String> {
    raw.iter()
        .any(|(k, v)| k.eq_ignore_ascii_case(key) && v.is_empty())
        .then(String::new)
}

fn parse_port(value: &str) -> Result<u16, ConfigValidationError> {
    let number: i64 = value.trim().parse().map_err(|_| {
        ConfigValidationError::new(format!("\"PORT\" must be a number, got \"{}\"", value))
    })?;

    u16::try_from(number).map_err(|_| {
        ConfigValidationError::new(format!("\"PORT\" must be a valid port, got {}", number))
    })
}

impl AppConfig {
    /// Loads `.env` (if present) and resolves the process environment.
    pub fn load() -> Result<Self, ConfigValidationError> {
        resolve(&core_config::snapshot_env())
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}
