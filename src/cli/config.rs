use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::core::TestPlan;

/// Names of the two serial ports under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortNames {
    pub a: String,
    pub b: String,
}

impl Default for PortNames {
    fn default() -> Self {
        Self {
            a: "COM1".to_string(),
            b: "COM2".to_string(),
        }
    }
}

/// Timing of a test run, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub response_timeout_ms: u64,
    pub step_delay_ms: u64,
    pub pause_poll_ms: u64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 1000,
            step_delay_ms: 100,
            pause_poll_ms: 100,
        }
    }
}

impl PlanConfig {
    pub fn to_plan(&self) -> TestPlan {
        TestPlan {
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            step_delay: Duration::from_millis(self.step_delay_ms),
            pause_poll: Duration::from_millis(self.pause_poll_ms),
        }
    }
}

/// Root configuration, every field optional in the file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ports: PortNames,
    pub plan: PlanConfig,
}

impl AppConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid configuration")
    }

    /// Read configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.ports.a, "COM1");
        assert_eq!(config.plan.to_plan(), TestPlan::default());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [ports]
            b = "/dev/ttyUSB1"

            [plan]
            response_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.ports.a, "COM1");
        assert_eq!(config.ports.b, "/dev/ttyUSB1");
        assert_eq!(config.plan.response_timeout_ms, 250);
        assert_eq!(config.plan.step_delay_ms, 100);
    }

    #[test]
    fn serialized_config_parses_back() {
        let mut config = AppConfig::default();
        config.ports.a = "/dev/ttyS0".to_string();
        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let err = AppConfig::from_toml("[plan]\nstep_delay_ms = \"soon\"").unwrap_err();
        assert!(err.to_string().contains("Invalid configuration"));
    }
}
