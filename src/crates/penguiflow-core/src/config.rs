//! Process-wide defaults for a [`crate::runtime::Flow`] (SPEC_FULL.md §3.9).
//!
//! `FlowConfig` is optional: a runtime built with [`FlowConfig::default`]
//! behaves exactly like one loaded from a TOML file with every field at its
//! default. Loading mirrors the teacher's TOML-driven configuration layer,
//! generalized from graph topology to runtime defaults.

use crate::policy::NodePolicy;
use std::path::Path;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FlowConfig {
    #[serde(default = "default_capacity")]
    pub default_floe_capacity: usize,
    #[serde(default)]
    pub default_policy: NodePolicy,
    #[serde(default)]
    pub enforce_validation: bool,
    #[serde(default)]
    pub tracing_verbosity: TracingVerbosity,
}

fn default_capacity() -> usize {
    crate::floe::DEFAULT_CAPACITY
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracingVerbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            default_floe_capacity: crate::floe::DEFAULT_CAPACITY,
            default_policy: NodePolicy::default(),
            enforce_validation: false,
            tracing_verbosity: TracingVerbosity::default(),
        }
    }
}

impl FlowConfig {
    /// Load a `FlowConfig` from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e.to_string()))?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    Io(String, String),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = FlowConfig::default();
        assert_eq!(cfg.default_floe_capacity, 64);
        assert_eq!(cfg.default_policy.max_retries, 0);
        assert!(!cfg.enforce_validation);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = FlowConfig::from_toml_file("/nonexistent/penguiflow.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_, _)));
    }
}
