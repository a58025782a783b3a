//! Engine configuration.
//!
//! Configuration is plain data deserialized from TOML. Every section has
//! defaults, so an empty document is a valid configuration.
//!
//! ```toml
//! [core_thread]
//! name = "render"
//! queue_capacity = 4096
//!
//! [logging]
//! filter = "keel=debug"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use keel_core::CoreThreadConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML document could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Settings for the core thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreThreadSettings {
    /// OS thread name.
    pub name: String,
    /// Stack size in bytes. Unset uses the platform default.
    pub stack_size: Option<usize>,
    /// Capacity of the command queue.
    pub queue_capacity: usize,
}

impl Default for CoreThreadSettings {
    fn default() -> Self {
        let defaults = CoreThreadConfig::default();
        Self {
            name: defaults.name,
            stack_size: defaults.stack_size,
            queue_capacity: defaults.queue_capacity,
        }
    }
}

impl From<&CoreThreadSettings> for CoreThreadConfig {
    fn from(settings: &CoreThreadSettings) -> Self {
        Self {
            name: settings.name.clone(),
            stack_size: settings.stack_size,
            queue_capacity: settings.queue_capacity,
        }
    }
}

/// Settings for the optional logging subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// An `EnvFilter` directive string.
    pub filter: String,
    /// Include thread names in log lines.
    pub thread_names: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "keel=info,keel_core=info".to_string(),
            thread_names: true,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub core_thread: CoreThreadSettings,
    pub logging: LoggingSettings,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Serialize to a TOML document.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        fs::write(path, self.to_toml_string()?).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core_thread.name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "core_thread.name",
                reason: "thread name must not be empty".to_string(),
            });
        }
        if self.core_thread.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "core_thread.queue_capacity",
                reason: "queue capacity must be at least 1".to_string(),
            });
        }
        if self.core_thread.stack_size == Some(0) {
            return Err(ConfigError::Invalid {
                field: "core_thread.stack_size",
                reason: "stack size must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// The core thread configuration derived from these settings.
    pub fn core_thread_config(&self) -> CoreThreadConfig {
        CoreThreadConfig::from(&self.core_thread)
    }
}
