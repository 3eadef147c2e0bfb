//! Core Configuration
//!
//! Loads the daemon configuration from an optional TOML file and merges
//! `CORE_*` environment variable overrides on top. Nesting in the override
//! name uses a double underscore (`CORE_QUEUE__BACKEND`); the flat spellings
//! for common keys (`CORE_LOG_LEVEL`) are accepted as well.
//!
//! Configuration is captured by value at startup; there is no live reload.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Which queue backend the daemon runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Memory,
    Stream,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
    pub format: String,
    pub file: Option<String>,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub backend: QueueBackend,
    pub redis_url: String,
    pub consumer_group: String,
    /// Pending-entry cap per consumer before reads pause
    pub max_pending: usize,
    /// Blocking-read interval for the stream backend, milliseconds
    pub block_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            consumer_group: "fraudsift".to_string(),
            max_pending: 1000,
            block_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub max_retries: u32,
    pub listing_deadline_secs: u64,
    pub scoring_deadline_secs: u64,
    pub confidence_threshold: f64,
    /// Interval between source-plugin sweeps
    pub source_poll_secs: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            listing_deadline_secs: 60,
            scoring_deadline_secs: 10,
            confidence_threshold: 0.5,
            source_poll_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PluginSection {
    pub directory: PathBuf,
    pub shutdown_deadline_secs: u64,
    pub hook_timeout_secs: u64,
}

impl Default for PluginSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("plugins"),
            shutdown_deadline_secs: 5,
            hook_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub host: String,
    pub port: u16,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8420,
        }
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub log: LogSection,
    pub queue: QueueSection,
    pub pipeline: PipelineSection,
    pub plugins: PluginSection,
    pub api: ApiSection,
}

/// Configuration loading failures; the field that failed is always named.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {cause}")]
    Io { path: String, cause: String },

    #[error("invalid TOML in '{path}': {cause}")]
    Parse { path: String, cause: String },

    #[error("invalid value for {key}: {cause}")]
    InvalidValue { key: String, cause: String },
}

impl CoreConfig {
    /// Load configuration: file first (when present), then environment
    /// overrides from `std::env::vars()`.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                    path: path.display().to_string(),
                    cause: e.to_string(),
                })?;
                toml::from_str(&raw).map_err(|e| ConfigError::Parse {
                    path: path.display().to_string(),
                    cause: e.to_string(),
                })?
            }
            None => Self::default(),
        };

        config.apply_env_overrides(std::env::vars())?;
        Ok(config)
    }

    /// Merge `CORE_*` overrides from an explicit variable iterator. Split
    /// out from `load` so tests do not have to mutate the process
    /// environment.
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(rest) = name.strip_prefix("CORE_") else {
                continue;
            };
            // CORE_QUEUE__BACKEND and CORE_QUEUE_BACKEND both address
            // queue.backend; normalise to a single underscore key.
            let key = rest.replace("__", "_").to_lowercase();
            self.apply_override(&key, &value)?;
        }
        Ok(())
    }

    fn apply_override(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "log_level" => self.log.level = value.to_string(),
            "log_format" => self.log.format = value.to_string(),
            "log_file" => self.log.file = Some(value.to_string()),
            "queue_backend" => {
                self.queue.backend = match value.to_lowercase().as_str() {
                    "memory" => QueueBackend::Memory,
                    "stream" => QueueBackend::Stream,
                    other => {
                        return Err(ConfigError::InvalidValue {
                            key: "queue.backend".to_string(),
                            cause: format!("unknown backend '{}'", other),
                        })
                    }
                }
            }
            "queue_redis_url" => self.queue.redis_url = value.to_string(),
            "queue_consumer_group" => self.queue.consumer_group = value.to_string(),
            "queue_max_pending" => self.queue.max_pending = parse_num(key, value)?,
            "queue_block_ms" => self.queue.block_ms = parse_num(key, value)?,
            "pipeline_max_retries" => self.pipeline.max_retries = parse_num(key, value)?,
            "pipeline_listing_deadline_secs" => {
                self.pipeline.listing_deadline_secs = parse_num(key, value)?
            }
            "pipeline_scoring_deadline_secs" => {
                self.pipeline.scoring_deadline_secs = parse_num(key, value)?
            }
            "pipeline_confidence_threshold" => {
                self.pipeline.confidence_threshold =
                    value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: key.to_string(),
                        cause: format!("'{}' is not a number", value),
                    })?
            }
            "pipeline_source_poll_secs" => self.pipeline.source_poll_secs = parse_num(key, value)?,
            "plugins_directory" => self.plugins.directory = PathBuf::from(value),
            "plugins_shutdown_deadline_secs" => {
                self.plugins.shutdown_deadline_secs = parse_num(key, value)?
            }
            "plugins_hook_timeout_secs" => self.plugins.hook_timeout_secs = parse_num(key, value)?,
            "api_host" => self.api.host = value.to_string(),
            "api_port" => self.api.port = parse_num(key, value)?,
            // Unknown CORE_* variables are ignored; operators routinely
            // export unrelated CORE_ prefixed values in shared environments.
            _ => {}
        }
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        cause: format!("'{}' is not a valid number", value),
    })
}
