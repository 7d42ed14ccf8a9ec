//! Relay configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file at all) is a valid configuration.
//!
//! # Example
//! ```
//! use tracerelay::config::{FailurePolicy, RelayConfig};
//!
//! let config = RelayConfig::from_toml_str(
//!     r#"
//!     failure_policy = "disable_thread"
//!
//!     [store]
//!     max_handles = 64
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.failure_policy, FailurePolicy::DisableThread);
//! assert_eq!(config.store.max_handles, Some(64));
//! ```

use crate::snapshot::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Values of the activation environment variable that mean "off"
pub const FALSY_STRINGS: [&str; 5] = ["", "0", "off", "false", "no"];

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// What the relay facade does after a relay fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log, count, keep relaying
    #[default]
    Continue,
    /// Stop relaying on this thread until failures are reset
    DisableThread,
}

/// Environment and command-line switch that turns profiling on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActivationConfig {
    /// Environment variable consulted first
    pub environ_flag: String,
    /// Any of these in argv also enables profiling
    pub cli_flags: Vec<String>,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        ActivationConfig {
            environ_flag: "LINE_PROFILE".to_string(),
            cli_flags: vec!["--line-profile".to_string(), "--line_profile".to_string()],
        }
    }
}

impl ActivationConfig {
    /// Decide from an explicit env value and argv
    pub fn is_enabled_by<S: AsRef<str>>(&self, env_value: Option<&str>, argv: &[S]) -> bool {
        let value = env_value.unwrap_or("").to_lowercase();
        let by_env = !FALSY_STRINGS.contains(&value.as_str());
        by_env
            || argv
                .iter()
                .any(|arg| self.cli_flags.iter().any(|flag| flag == arg.as_ref()))
    }

    /// Decide from the process environment and the given argv
    pub fn is_enabled<S: AsRef<str>>(&self, argv: &[S]) -> bool {
        let env_value = std::env::var(&self.environ_flag).ok();
        self.is_enabled_by(env_value.as_deref(), argv)
    }
}

/// Top-level relay configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub store: StoreConfig,
    pub failure_policy: FailurePolicy,
    pub activation: ActivationConfig,
}

impl RelayConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.max_handles == Some(0) {
            return Err(ConfigError::Invalid(
                "store.max_handles must be at least 1".to_string(),
            ));
        }
        if self.activation.environ_flag.is_empty() {
            return Err(ConfigError::Invalid(
                "activation.environ_flag must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
