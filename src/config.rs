//! Application configuration.
//!
//! Loads the settings a voice client needs from environment variables (and a
//! `.env` file, if present) and turns them into the transport and session
//! configs.

use std::env;
use std::time::Duration;

use tracing::Level;

use crate::client::{Config, ConfigBuilder};
use crate::session::SessionSettings;

const DEFAULT_PROCESSING_TIMEOUT_MS: u64 = 15_000;

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ws_url: Option<String>,
    pub api_key: Option<String>,
    pub user_id: i64,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub log_level: Level,
    pub processing_timeout: Duration,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

impl AppConfig {
    /// Loads configuration from environment variables.
    ///
    // *   `SPEECHLINK_WS_URL`: (Optional) Backend endpoint. Defaults to `ws://127.0.0.1:8000/ai/stream`.
    // *   `SPEECHLINK_API_KEY`: (Optional) Sent as a bearer token when set.
    // *   `SPEECHLINK_USER_ID`: (Optional) Attached to text prompts. Defaults to 1.
    // *   `SPEECHLINK_INPUT_DEVICE` / `SPEECHLINK_OUTPUT_DEVICE`: (Optional) Device names. Default devices otherwise.
    // *   `SPEECHLINK_PROCESSING_TIMEOUT_MS`: (Optional) Wait for a spoken reply. Defaults to 15000.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let user_id = match non_empty("SPEECHLINK_USER_ID") {
            Some(value) => value
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidValue("SPEECHLINK_USER_ID", value))?,
            None => 1,
        };

        let processing_timeout_ms = match non_empty("SPEECHLINK_PROCESSING_TIMEOUT_MS") {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or(ConfigError::InvalidValue("SPEECHLINK_PROCESSING_TIMEOUT_MS", value))?,
            None => DEFAULT_PROCESSING_TIMEOUT_MS,
        };

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            ws_url: non_empty("SPEECHLINK_WS_URL"),
            api_key: non_empty("SPEECHLINK_API_KEY"),
            user_id,
            input_device: non_empty("SPEECHLINK_INPUT_DEVICE"),
            output_device: non_empty("SPEECHLINK_OUTPUT_DEVICE"),
            log_level,
            processing_timeout: Duration::from_millis(processing_timeout_ms),
        })
    }

    pub fn client_config(&self) -> Config {
        let mut builder = ConfigBuilder::new();
        if let Some(url) = &self.ws_url {
            builder = builder.with_base_url(url);
        }
        if let Some(key) = &self.api_key {
            builder = builder.with_api_key(key);
        }
        builder.build()
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            processing_timeout: self.processing_timeout,
            user_id: self.user_id,
        }
    }
}
