//! Configuration for the core data layer
//!
//! Configuration is loaded from TOML files and environment variables. Every
//! section is optional in the file; missing sections and fields fall back to
//! their defaults.
//!
//! ```toml
//! [transport]
//! root_url = "http://localhost:8888/wp-json"
//! nonce = "abc123"
//! timeout_secs = 30
//!
//! [batch]
//! endpoint = "/batch/v1"
//! max_items = 25
//!
//! [logging]
//! level = "INFO"
//!
//! [logging.modules]
//! locks = "DEBUG"
//! ```

use crate::error::{CoreDataError, CoreDataResult};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Prefix shared by all environment overrides
const ENV_PREFIX: &str = "CORE_DATA_";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreDataConfig {
    /// REST transport settings
    pub transport: TransportConfig,
    /// Batch endpoint settings
    pub batch: BatchConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// REST transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Root of the REST API, request paths are appended to it
    pub root_url: String,
    /// Value sent in the `X-WP-Nonce` header
    pub nonce: Option<String>,
    /// Per-request timeout
    pub timeout_secs: u64,
}

/// Batch endpoint configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Batch endpoint path. When unset, batched requests are issued one by one.
    pub endpoint: Option<String>,
    /// Maximum requests per batch call. Discovered from the endpoint when unset.
    pub max_items: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the crate
    pub level: String,
    /// Module-specific log levels, keyed by module name (`locks`, `batch`, ...)
    pub modules: HashMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            root_url: "http://localhost:8888/wp-json".to_string(),
            nonce: None,
            timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            modules: HashMap::new(),
        }
    }
}

impl CoreDataConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoreDataResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CoreDataError::Config(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string without environment overrides
    pub fn from_toml_str(content: &str) -> CoreDataResult<Self> {
        let config: CoreDataConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> CoreDataResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `CORE_DATA_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply overrides from an arbitrary set of `(name, value)` pairs
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(setting) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match setting {
                "ROOT_URL" => self.transport.root_url = value,
                "NONCE" => self.transport.nonce = Some(value),
                "TIMEOUT_SECS" => {
                    if let Ok(secs) = value.parse() {
                        self.transport.timeout_secs = secs;
                    }
                }
                "BATCH_ENDPOINT" => self.batch.endpoint = Some(value),
                "BATCH_MAX_ITEMS" => self.batch.max_items = value.parse().ok(),
                "LOG_LEVEL" => self.logging.level = value,
                other => {
                    if let Some(module) = other.strip_prefix("LOG_MODULE_") {
                        self.logging.modules.insert(module.to_lowercase(), value);
                    }
                }
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> CoreDataResult<()> {
        if self.transport.root_url.trim().is_empty() {
            return Err(CoreDataError::Config(
                "transport.root_url must not be empty".to_string(),
            ));
        }
        if self.transport.timeout_secs == 0 {
            return Err(CoreDataError::Config(
                "transport.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if let Some(endpoint) = &self.batch.endpoint {
            if !endpoint.starts_with('/') {
                return Err(CoreDataError::Config(format!(
                    "batch.endpoint must start with '/': {}",
                    endpoint
                )));
            }
        }
        if self.batch.max_items == Some(0) {
            return Err(CoreDataError::Config(
                "batch.max_items must be at least 1".to_string(),
            ));
        }

        parse_level(&self.logging.level)?;
        for level in self.logging.modules.values() {
            parse_level(level)?;
        }
        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> CoreDataResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoreDataError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Parse a textual log level (case-insensitive)
pub fn parse_level(level: &str) -> CoreDataResult<LevelFilter> {
    level
        .parse::<LevelFilter>()
        .map_err(|_| CoreDataError::Config(format!("Invalid log level: {}", level)))
}
