//! Diagnostic logging for the host process
//!
//! Logs go to stderr; stdout belongs to the RPC stream.

use hostgate_core::LoggingConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Subscriber could not be installed
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter '{directive}': {reason}")]
    Filter { directive: String, reason: String },

    #[error("a global subscriber is already installed")]
    AlreadyInstalled,
}

/// Build the filter: `RUST_LOG` wins over the configured level
///
/// # Errors
/// Returns [`TelemetryError::Filter`] for an unparsable configured level
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| TelemetryError::Filter {
        directive: config.level.clone(),
        reason: e.to_string(),
    })
}

/// Install the global subscriber
///
/// # Errors
/// Returns an error for a bad filter or if called twice
pub fn init(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|_| TelemetryError::AlreadyInstalled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_directive() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: "hostgate=loudest".to_string(),
            json: false,
        };
        assert!(matches!(env_filter(&config), Err(TelemetryError::Filter { .. })));
    }

    #[test]
    fn accepts_module_directives() {
        let config = LoggingConfig {
            level: "info,hostgate_release=debug".to_string(),
            json: true,
        };
        assert!(env_filter(&config).is_ok());
    }
}
