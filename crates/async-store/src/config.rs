//! Store configuration
//!
//! Defaults are usable as-is. Configuration can additionally be read from a
//! TOML document and overridden from `ASYNC_STORE_*` environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::atomic_map::MapStrategy;
use crate::diagnostics::DiagnosticLevel;
use crate::distributor::BufferingPolicy;
use crate::errors::{StoreError, StoreResult};

/// Prefix of environment variables read by [`StoreConfig::merge_with_env`].
pub const ENV_PREFIX: &str = "ASYNC_STORE_";

/// Configuration for a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Mutual-exclusion strategy of the internal keyed maps (default: spin)
    pub map_strategy: MapStrategy,
    /// Buffering used by derived streams when the caller passes none
    /// (default: unbounded)
    pub default_buffering: BufferingPolicy,
    /// Minimum level forwarded to a configured diagnostic sink (default: debug)
    pub min_diagnostic_level: DiagnosticLevel,
    /// Report `receive` calls made outside the designated writer thread
    /// (default: true; no effect unless a writer thread is designated)
    pub warn_on_foreign_context: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            map_strategy: MapStrategy::Spin,
            default_buffering: BufferingPolicy::Unbounded,
            min_diagnostic_level: DiagnosticLevel::Debug,
            warn_on_foreign_context: true,
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn load_from_file(path: &Path) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Override fields from `ASYNC_STORE_*` environment variables
    pub fn merge_with_env(&mut self) -> StoreResult<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Override fields from an explicit set of `(key, value)` pairs.
    ///
    /// Keys without the [`ENV_PREFIX`] are ignored.
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(key) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match key {
                "MAP_STRATEGY" => self.map_strategy = value.parse()?,
                "DEFAULT_BUFFERING" => self.default_buffering = value.parse()?,
                "MIN_DIAGNOSTIC_LEVEL" => self.min_diagnostic_level = value.parse()?,
                "WARN_ON_FOREIGN_CONTEXT" => {
                    self.warn_on_foreign_context = parse_bool(value)?;
                }
                _ => {
                    tracing::debug!(key, "ignoring unknown store configuration variable");
                }
            }
        }
        self.validate()
    }

    /// Validate the configuration
    pub fn validate(&self) -> StoreResult<()> {
        if let BufferingPolicy::BufferNewest(0) = self.default_buffering {
            return Err(StoreError::config(
                "default_buffering: buffer_newest capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> StoreResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(StoreError::config(format!("expected a boolean, got '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.map_strategy, MapStrategy::Spin);
        assert_eq!(config.default_buffering, BufferingPolicy::Unbounded);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = StoreConfig::from_toml_str(
            r#"
            map_strategy = "locked"
            min_diagnostic_level = "warning"
            default_buffering = { buffer_newest = 4 }
            "#,
        )
        .unwrap();

        assert_eq!(config.map_strategy, MapStrategy::Locked);
        assert_eq!(config.min_diagnostic_level, DiagnosticLevel::Warning);
        assert_eq!(config.default_buffering, BufferingPolicy::BufferNewest(4));
        assert!(config.warn_on_foreign_context);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = StoreConfig::from_toml_str("default_buffering = { buffer_newest = 0 }");
        assert!(matches!(result, Err(StoreError::Config { .. })));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result = StoreConfig::from_toml_str(r#"map_strategy = "sharded""#);
        assert!(matches!(result, Err(StoreError::Config { .. })));
    }

    #[test]
    fn test_merge_with_vars() {
        let mut config = StoreConfig::default();
        config
            .merge_with_vars([
                ("ASYNC_STORE_MAP_STRATEGY", "locked"),
                ("ASYNC_STORE_DEFAULT_BUFFERING", "newest:2"),
                ("ASYNC_STORE_WARN_ON_FOREIGN_CONTEXT", "off"),
                ("UNRELATED", "value"),
            ])
            .unwrap();

        assert_eq!(config.map_strategy, MapStrategy::Locked);
        assert_eq!(config.default_buffering, BufferingPolicy::BufferNewest(2));
        assert!(!config.warn_on_foreign_context);
    }

    #[test]
    fn test_merge_with_invalid_var() {
        let mut config = StoreConfig::default();
        let result = config.merge_with_vars([("ASYNC_STORE_DEFAULT_BUFFERING", "newest:0")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "min_diagnostic_level = \"info\"").unwrap();

        let config = StoreConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.min_diagnostic_level, DiagnosticLevel::Info);
    }

    #[test]
    fn test_load_missing_file() {
        let result = StoreConfig::load_from_file(Path::new("/nonexistent/async-store.toml"));
        assert!(matches!(result, Err(StoreError::Config { .. })));
    }
}
