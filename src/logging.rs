//! Logging bootstrap
//!
//! Library code logs through the `log` facade. Applications that do not bring
//! their own logger can call [`init_logging`] to install `env_logger` with the
//! levels from [`LoggingConfig`]. `RUST_LOG` still takes precedence when set.

use crate::config::{parse_level, LoggingConfig};
use crate::error::{CoreDataError, CoreDataResult};
use once_cell::sync::OnceCell;

/// Set once the logger has been installed
static LOGGER_INSTALLED: OnceCell<()> = OnceCell::new();

/// Install `env_logger` using the given configuration.
///
/// Module overrides are applied to `core_data::<module>`. Calling this twice
/// returns a configuration error.
pub fn init_logging(config: &LoggingConfig) -> CoreDataResult<()> {
    let mut builder = build_logger(config)?;

    LOGGER_INSTALLED
        .set(())
        .map_err(|_| CoreDataError::Config("Logging already initialized".to_string()))?;

    builder
        .try_init()
        .map_err(|e| CoreDataError::Config(format!("Failed to install logger: {}", e)))
}

/// Returns true once [`init_logging`] has succeeded
pub fn is_initialized() -> bool {
    LOGGER_INSTALLED.get().is_some()
}

fn build_logger(config: &LoggingConfig) -> CoreDataResult<env_logger::Builder> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(parse_level(&config.level)?);

    for (module, level) in &config.modules {
        builder.filter_module(&format!("core_data::{}", module), parse_level(level)?);
    }

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_invalid_module_level_is_rejected() {
        let config = LoggingConfig {
            level: "INFO".to_string(),
            modules: HashMap::from([("locks".to_string(), "CHATTY".to_string())]),
        };
        assert!(build_logger(&config).is_err());
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        let first = init_logging(&config);
        let second = init_logging(&config);

        // another test binary thread may have installed a logger already
        if first.is_ok() {
            assert!(is_initialized());
        }
        assert!(second.is_err());
    }
}
