//! Application configuration management.
//!
//! Handles loading, saving, and validating the client configuration: the
//! backend address, the access token used at handshake time, reconnect
//! tuning, and logging. Configuration is persisted as TOML on disk.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{CrError, CrResult};
use crate::platform::Platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Tracking stream settings.
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Backend URL (e.g., "https://routes.example.com").
    #[serde(default)]
    pub address: String,

    /// Bearer access token. Usually supplied by the session at runtime
    /// rather than stored here.
    #[serde(default)]
    pub access_token: String,
}

/// Tracking stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Path of the push endpoint on the backend.
    #[serde(default = "default_tracking_path")]
    pub path: String,

    /// First reconnect delay in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Reconnect delay cap in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Jitter factor (0.0 to 1.0) applied to each waited delay.
    #[serde(default)]
    pub jitter_factor: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_tracking_path() -> String {
    constants::TRACKING_PATH.to_string()
}

fn default_base_delay() -> u64 {
    constants::DEFAULT_BASE_DELAY_MS
}

fn default_max_delay() -> u64 {
    constants::DEFAULT_MAX_DELAY_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            path: default_tracking_path(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_factor: 0.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl TrackingConfig {
    /// Check the reconnect bounds and jitter range.
    pub fn validate(&self) -> CrResult<()> {
        if self.base_delay_ms == 0 {
            return Err(CrError::Config("tracking.base_delay_ms must be positive".into()));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(CrError::Config(format!(
                "tracking.base_delay_ms ({}) exceeds tracking.max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(CrError::Config(format!(
                "tracking.jitter_factor must be within 0.0..=1.0, got {}",
                self.jitter_factor
            )));
        }
        if !self.path.starts_with('/') {
            return Err(CrError::Config(format!(
                "tracking.path must start with '/', got {:?}",
                self.path
            )));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> CrResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load and validate configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> CrResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> CrResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| CrError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> CrResult<PathBuf> {
        Ok(Platform::config_dir()?.join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> CrResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(Platform::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> CrResult<()> {
        self.tracking.validate()
    }

    /// The configured access token, if any.
    pub fn access_token(&self) -> Option<&str> {
        let token = self.server.access_token.trim();
        (!token.is_empty()).then_some(token)
    }

    /// Sanitize and normalize a server address.
    ///
    /// Ensures the address has a scheme and strips quotes and trailing
    /// slashes. Addresses without a scheme default to plain http; an
    /// existing scheme is kept as-is for the caller to judge.
    pub fn sanitize_server_address(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}
