//! Application Configuration Module
//!
//! This module centralizes the configuration for the interview service.
//! It loads settings from environment variables and provides a single
//! struct that is handed to the wiring in `main`.

use secrecy::SecretString;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

// --- Application Constants ---

/// How long the simulated render surface "plays" each clip.
pub const DEFAULT_CLIP_DURATION_MS: u64 = 4000;
/// Capacity of the runtime -> orchestrator event channel.
pub const EVENT_CHANNEL_SIZE: usize = 64;

/// Holds all configuration loaded from the environment.
#[derive(Debug)]
pub struct Config {
    pub backend_url: String,
    pub backend_api_key: Option<SecretString>,
    pub media_catalog_dir: PathBuf,
    pub clip_duration: Duration,
    /// Overrides the default session length when the backend sends none.
    pub session_duration: Option<Duration>,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `BACKEND_URL`: Base URL of the interview engine backend. Required.
    // *   `BACKEND_API_KEY`: (Optional) Bearer token for the backend.
    // *   `MEDIA_CATALOG_DIR`: (Optional) Directory of `<lang>.json` clip catalogs. Defaults to "media".
    // *   `CLIP_DURATION_MS`: (Optional) Simulated clip length. Defaults to 4000.
    // *   `SESSION_DURATION_SECS`: (Optional) Session length when the backend sends none.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend_url = lookup("BACKEND_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("BACKEND_URL".to_string()))?;

        let backend_api_key = lookup("BACKEND_API_KEY")
            .filter(|key| !key.is_empty())
            .map(SecretString::from);

        let media_catalog_dir =
            PathBuf::from(lookup("MEDIA_CATALOG_DIR").unwrap_or_else(|| "media".to_string()));

        let clip_duration = match lookup("CLIP_DURATION_MS") {
            Some(raw) => Duration::from_millis(parse_number("CLIP_DURATION_MS", &raw)?),
            None => Duration::from_millis(DEFAULT_CLIP_DURATION_MS),
        };

        let session_duration = lookup("SESSION_DURATION_SECS")
            .map(|raw| parse_number("SESSION_DURATION_SECS", &raw).map(Duration::from_secs))
            .transpose()?;

        // Configure logging level from RUST_LOG, with a sensible default.
        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidValue {
                name: "RUST_LOG".to_string(),
                value: log_level_str,
            })?;

        Ok(Self {
            backend_url,
            backend_api_key,
            media_catalog_dir,
            clip_duration,
            session_duration,
            log_level,
        })
    }
}

fn parse_number(name: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: raw.to_string(),
    })
}
