//! Logging setup.
//!
//! Keel only emits `tracing` events; the application decides where they go.
//! With the `subscriber` feature, [`install_subscriber`] installs a
//! `tracing-subscriber` formatter configured from [`LoggingSettings`]:
//!
//! ```ignore
//! let config = keel::EngineConfig::load("engine.toml")?;
//! keel::logging::install_subscriber(&config.logging)?;
//! ```
//!
//! [`LoggingSettings`]: crate::config::LoggingSettings

pub use keel_core::logging::{PerfSpan, span_names, targets};

#[cfg(feature = "subscriber")]
use crate::config::{ConfigError, LoggingSettings};

/// Build the `EnvFilter` described by the settings.
#[cfg(feature = "subscriber")]
pub fn env_filter(settings: &LoggingSettings) -> Result<tracing_subscriber::EnvFilter, ConfigError> {
    tracing_subscriber::EnvFilter::try_new(&settings.filter).map_err(|err| ConfigError::Invalid {
        field: "logging.filter",
        reason: err.to_string(),
    })
}

/// Install a global formatting subscriber.
///
/// Returns `Ok(false)` if a global subscriber was already installed.
#[cfg(feature = "subscriber")]
pub fn install_subscriber(settings: &LoggingSettings) -> Result<bool, ConfigError> {
    use tracing_subscriber::prelude::*;

    let filter = env_filter(settings)?;
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_names(settings.thread_names);

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_ok())
}

#[cfg(all(test, feature = "subscriber"))]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_a_config_error() {
        let settings = LoggingSettings {
            filter: "keel=loudest".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            env_filter(&settings),
            Err(ConfigError::Invalid {
                field: "logging.filter",
                ..
            })
        ));
    }

    #[test]
    fn test_install_twice() {
        let settings = LoggingSettings::default();
        install_subscriber(&settings).unwrap();
        // A global subscriber is in place now, whoever installed it.
        assert!(!install_subscriber(&settings).unwrap());
    }
}
