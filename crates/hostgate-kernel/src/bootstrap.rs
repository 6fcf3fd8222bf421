//! Process startup: configuration, audit trail, dispatcher

use hostgate_audit::{AuditError, AuditLogger, FileAuditSink};
use hostgate_core::{ConfigError, Dispatcher, HostConfig, HostServices, SchemaError};
use hostgate_guard::GuardError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Startup failure
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid managed root: {0}")]
    Guard(#[from] GuardError),

    #[error("cannot open audit trail: {0}")]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("cannot create managed root {path}: {source}")]
    ManagedRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read the config file if given, then apply environment overrides
///
/// # Errors
/// Returns a [`ConfigError`] for an unreadable file or a bad override
pub fn load_config(path: Option<&Path>) -> Result<HostConfig, ConfigError> {
    let config = match path {
        Some(path) => HostConfig::from_file(path)?,
        None => HostConfig::default(),
    };
    config.apply_env()
}

/// Validate `config` and assemble a dispatcher driving the real tools
///
/// # Errors
/// Returns a [`BootstrapError`] if validation fails or the managed root or
/// audit trail cannot be prepared
pub async fn build_dispatcher(config: HostConfig) -> Result<Dispatcher, BootstrapError> {
    config.validate()?;

    tokio::fs::create_dir_all(&config.managed_root)
        .await
        .map_err(|source| BootstrapError::ManagedRoot {
            path: config.managed_root.clone(),
            source,
        })?;
    let sink = FileAuditSink::open(&config.audit_log).await?;
    tracing::info!(
        managed_root = %config.managed_root.display(),
        audit_log = %config.audit_log.display(),
        "host initialized"
    );

    let audit = AuditLogger::new(Arc::new(sink));
    let services = HostServices::with_cli_drivers(config)?;
    Ok(Dispatcher::new(services, audit)?)
}
