//! Interceptor configuration via `txguard.toml`
//!
//! Every setting has a default, so an empty file (or no file at all) is a
//! valid configuration. Settings apply to interceptors built afterwards.

use serde::{Deserialize, Serialize};
use std::path::Path;
use txguard_core::{IsolationLevel, Propagation, TxError, TxResult};

use crate::marker::Transactional;

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "txguard.toml";

/// Default nesting limit for intercepted calls on one thread.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Interceptor configuration loaded from `txguard.toml`.
///
/// # Example
///
/// ```toml
/// default_propagation = "REQUIRED"
/// default_isolation = "READ_COMMITTED"
/// max_depth = 64
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxConfig {
    /// Propagation of markers created from this config.
    #[serde(default)]
    pub default_propagation: Propagation,
    /// Isolation hint used when a marker declares none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_isolation: Option<IsolationLevel>,
    /// Maximum number of nested intercepted calls per thread.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            default_propagation: Propagation::default(),
            default_isolation: None,
            max_depth: default_max_depth(),
        }
    }
}

impl TxConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# txguard configuration
#
# Propagation for markers without an explicit one: "REQUIRED" (default)
# or "REQUIRES_NEW"
default_propagation = "REQUIRED"

# Isolation hint handed to local resources when the marker declares none.
# One of "READ_UNCOMMITTED", "READ_COMMITTED", "REPEATABLE_READ", "SERIALIZABLE".
# default_isolation = "READ_COMMITTED"

# Maximum nesting of intercepted calls on one thread (default: 64)
max_depth = 64
"#
    }

    /// Parse and validate config text.
    ///
    /// # Errors
    ///
    /// Returns `TxError::Config` if the text is not valid TOML for this
    /// config or a value is out of range.
    pub fn from_toml_str(content: &str) -> TxResult<Self> {
        let config: TxConfig = toml::from_str(content)
            .map_err(|e| TxError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> TxResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TxError::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: TxConfig = toml::from_str(&content).map_err(|e| {
            TxError::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> TxResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                TxError::config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> TxResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TxError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            TxError::config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Check value ranges.
    pub fn validate(&self) -> TxResult<()> {
        if self.max_depth == 0 {
            return Err(TxError::config("max_depth must be at least 1"));
        }
        Ok(())
    }

    /// Marker carrying this config's defaults.
    pub fn default_marker(&self) -> Transactional {
        Transactional {
            propagation: self.default_propagation,
            isolation: self.default_isolation,
            ..Transactional::default()
        }
    }
}
