//! Ordering engine configuration using Figment
//!
//! Sources are merged in precedence order (later sources override earlier ones):
//! 1. Default values (hardcoded)
//! 2. An optional configuration file (TOML, YAML or JSON, chosen by extension)
//! 3. Environment variables with the `KANBAN_ORDER_` prefix

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "KANBAN_ORDER_";

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration parsing failed
    #[error("Failed to parse configuration: {source}")]
    ParseError { source: Box<figment::Error> },

    /// Configuration file format not supported
    #[error("Unsupported configuration file format: {path}")]
    UnsupportedFormat { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value for key '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::ParseError {
            source: Box::new(error),
        }
    }
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Tunables for position allocation and move reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderingConfig {
    /// Increment for "above last" and decrement for "below first"
    pub append_step: f64,
    /// Neighbor gaps at or below this are too narrow to split
    pub min_gap: f64,
    /// Spacing between positions after a renumber
    pub renumber_spacing: f64,
    /// Buffer size of the change-notification channel
    pub notify_capacity: usize,
    /// Re-fetch affected columns after a confirmed move
    pub refresh_on_confirm: bool,
    /// Give up on a persist call after this many milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_timeout_ms: Option<u64>,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            append_step: 1.0,
            min_gap: 1e-9,
            renumber_spacing: 1000.0,
            notify_capacity: 256,
            refresh_on_confirm: false,
            persist_timeout_ms: None,
        }
    }
}

impl OrderingConfig {
    /// Load from defaults and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::base_figment().merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Load from defaults, a configuration file, and environment variables
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading ordering configuration file");

        let figment = Self::base_figment()
            .merge(Self::file_provider(path)?)
            .merge(Env::prefixed(ENV_PREFIX));
        Self::from_figment(figment)
    }

    /// Persist timeout as a duration
    pub fn persist_timeout(&self) -> Option<Duration> {
        self.persist_timeout_ms.map(Duration::from_millis)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("append_step", self.append_step),
            ("min_gap", self.min_gap),
            ("renumber_spacing", self.renumber_spacing),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::invalid(
                    key,
                    format!("must be a positive finite number, got {value}"),
                ));
            }
        }
        if self.min_gap >= self.append_step {
            return Err(ConfigError::invalid(
                "min_gap",
                "must be smaller than append_step",
            ));
        }
        if self.min_gap >= self.renumber_spacing {
            return Err(ConfigError::invalid(
                "min_gap",
                "must be smaller than renumber_spacing",
            ));
        }
        if self.notify_capacity == 0 {
            return Err(ConfigError::invalid("notify_capacity", "must be at least 1"));
        }
        Ok(())
    }

    fn base_figment() -> Figment {
        Figment::from(Serialized::defaults(OrderingConfig::default()))
    }

    fn file_provider(path: &Path) -> Result<Figment, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            Some("toml") => Ok(Figment::from(Toml::file(path))),
            Some("yaml") | Some("yml") => Ok(Figment::from(Yaml::file(path))),
            Some("json") => Ok(Figment::from(Json::file(path))),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: OrderingConfig = figment.extract()?;
        config.validate()?;
        trace!(?config, "Loaded ordering configuration");
        Ok(config)
    }
}
