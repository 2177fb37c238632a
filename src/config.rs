//! Engine Configuration
//!
//! Pool sizes for parallel fan-out and the default per-attempt timeout.
//! Configuration can be built in code or loaded from YAML:
//!
//! ```yaml
//! thread_pool_size: 8
//! process_pool_size: 2
//! default_timeout_ms: 30000
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings shared by every run of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum members of one THREAD-mode group running at once
    pub thread_pool_size: usize,

    /// Maximum child processes of one PROCESS-mode group running at once
    pub process_pool_size: usize,

    /// Per-attempt timeout for steps that set none of their own
    #[serde(rename = "default_timeout_ms", with = "optional_millis")]
    pub default_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            thread_pool_size: cpus,
            process_pool_size: cpus,
            default_timeout: None,
        }
    }
}

impl EngineConfig {
    pub fn with_thread_pool_size(mut self, size: usize) -> Self {
        self.thread_pool_size = size;
        self
    }

    pub fn with_process_pool_size(mut self, size: usize) -> Self {
        self.process_pool_size = size;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "thread_pool_size must be at least 1".to_string(),
            ));
        }
        if self.process_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "process_pool_size must be at least 1".to_string(),
            ));
        }
        if self.default_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid(
                "default_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads engine configuration from a YAML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    info!("Loading engine config from: {}", path.display());

    let yaml = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    debug!("Config content loaded ({} bytes)", yaml.len());

    EngineConfig::from_yaml_str(&yaml)
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
