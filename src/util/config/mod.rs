//! permflow configuration system
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high -> low):
//! 1. Environment variables (PERMFLOW_WORKERS, PERMFLOW_LOG,
//!    PERMFLOW_CHECK_WELLFORMEDNESS)
//! 2. RON file (path given explicitly or via PERMFLOW_CONFIG)
//! 3. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use permflow::util::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_ron_str("(scheduler: (num_workers: 2))").unwrap();
//! assert_eq!(config.scheduler.num_workers, 2);
//! assert!(config.check_wellformedness);
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::scheduler::SchedulerConfig;
use crate::util::logger::LogLevel;

/// Environment variable naming a RON config file.
pub const ENV_CONFIG: &str = "PERMFLOW_CONFIG";
/// Environment variable overriding `scheduler.num_workers`.
pub const ENV_WORKERS: &str = "PERMFLOW_WORKERS";
/// Environment variable overriding `log_level`.
pub const ENV_LOG: &str = "PERMFLOW_LOG";
/// Environment variable overriding `check_wellformedness`.
pub const ENV_CHECK_WELLFORMEDNESS: &str = "PERMFLOW_CHECK_WELLFORMEDNESS";

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker pool settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Level passed to the logger
    #[serde(default)]
    pub log_level: LogLevel,
    /// Check acyclicity and edge provenance on every `add_edge`
    #[serde(default = "default_check_wellformedness")]
    pub check_wellformedness: bool,
}

fn default_check_wellformedness() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            log_level: LogLevel::default(),
            check_wellformedness: default_check_wellformedness(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from RON text. Missing fields take defaults.
    pub fn from_ron_str(content: &str) -> Result<Self, ConfigError> {
        ron::from_str(content).map_err(ConfigError::Parse)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&content)
    }

    /// Load the file named by `PERMFLOW_CONFIG` (defaults if unset), then
    /// apply the environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = match std::env::var_os(ENV_CONFIG) {
            Some(path) => Self::load(PathBuf::from(path))?,
            None => Self::default(),
        };
        config.with_env_overrides()
    }

    /// Apply `PERMFLOW_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides looked up by variable name.
    pub fn with_overrides<F>(
        mut self,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_WORKERS) {
            self.scheduler.num_workers = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(ENV_WORKERS, &value))?;
        }
        if let Some(value) = lookup(ENV_LOG) {
            self.log_level = value.parse().map_err(|_| ConfigError::invalid(ENV_LOG, &value))?;
        }
        if let Some(value) = lookup(ENV_CHECK_WELLFORMEDNESS) {
            self.check_wellformedness = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::invalid(ENV_CHECK_WELLFORMEDNESS, &value)),
            };
        }
        Ok(self)
    }

    /// Write the configuration as pretty RON.
    pub fn save(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content =
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default()).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[source] ron::error::SpannedError),

    #[error("config serialize error: {0}")]
    Serialize(#[source] ron::Error),

    #[error("invalid value `{value}` for {var}")]
    InvalidValue { var: &'static str, value: String },
}

impl ConfigError {
    fn invalid(
        var: &'static str,
        value: &str,
    ) -> Self {
        ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests;
