//! Host configuration
//!
//! Loaded once at startup from a TOML file, overridden by `HOSTGATE_*`
//! environment variables, validated, and then shared read-only through
//! [`ExecutionContext`](crate::ExecutionContext).

use hostgate_audit::strip_url_credentials;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "HOSTGATE_";

/// Configuration loading or validation failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {reason}")]
    Env { var: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Locations of the external tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BinaryPaths {
    pub git: PathBuf,
    pub docker: PathBuf,
    pub psql: PathBuf,
    pub pg_dump: PathBuf,
    pub supabase: PathBuf,
}

impl Default for BinaryPaths {
    fn default() -> Self {
        Self {
            git: PathBuf::from("git"),
            docker: PathBuf::from("docker"),
            psql: PathBuf::from("psql"),
            pg_dump: PathBuf::from("pg_dump"),
            supabase: PathBuf::from("supabase"),
        }
    }
}

/// Diagnostic log output of the process itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `hostgate_release=debug`
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Everything the host process needs to know about its environment
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Directory holding one subdirectory per application
    pub managed_root: PathBuf,
    /// Append-only audit trail; must live outside `managed_root`
    pub audit_log: PathBuf,
    /// Hostname used in URLs handed back to callers
    pub public_host: String,
    /// Database server URL without a database path
    pub database_url: String,
    pub binaries: BinaryPaths,
    pub logging: LoggingConfig,
}

impl fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostConfig")
            .field("managed_root", &self.managed_root)
            .field("audit_log", &self.audit_log)
            .field("public_host", &self.public_host)
            .field("database_url", &strip_url_credentials(&self.database_url))
            .field("binaries", &self.binaries)
            .field("logging", &self.logging)
            .finish()
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            managed_root: PathBuf::from("/srv/hostgate/apps"),
            audit_log: PathBuf::from("/var/log/hostgate/audit.log"),
            public_host: "localhost".to_string(),
            database_url: "postgresql://postgres@127.0.0.1:5432".to_string(),
            binaries: BinaryPaths::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HostConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_managed_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.managed_root = root.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log = path.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_public_host(mut self, host: impl Into<String>) -> Self {
        self.public_host = host.into();
        self
    }

    /// Parse a TOML document; absent keys take their defaults
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&source)
    }

    /// Apply overrides from the process environment
    ///
    /// # Errors
    /// Returns [`ConfigError::Env`] for a value that cannot be interpreted
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup`, keyed by full variable name
    ///
    /// # Errors
    /// Returns [`ConfigError::Env`] for a value that cannot be interpreted
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("MANAGED_ROOT") {
            self.managed_root = PathBuf::from(v);
        }
        if let Some(v) = var("AUDIT_LOG") {
            self.audit_log = PathBuf::from(v);
        }
        if let Some(v) = var("PUBLIC_HOST") {
            self.public_host = v;
        }
        if let Some(v) = var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = var("LOG_JSON") {
            self.logging.json = parse_bool(&v).ok_or_else(|| ConfigError::Env {
                var: format!("{ENV_PREFIX}LOG_JSON"),
                reason: format!("expected true or false, got '{v}'"),
            })?;
        }
        Ok(self)
    }

    /// Check cross-field rules
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first broken rule
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.managed_root.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "managed_root must be absolute, got {}",
                self.managed_root.display()
            )));
        }
        if !self.audit_log.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "audit_log must be absolute, got {}",
                self.audit_log.display()
            )));
        }
        if self.audit_log.starts_with(&self.managed_root) {
            return Err(ConfigError::Invalid(
                "audit_log must not live inside managed_root".to_string(),
            ));
        }
        let host_ok = !self.public_host.is_empty()
            && self
                .public_host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ':'));
        if !host_ok {
            return Err(ConfigError::Invalid(format!(
                "public_host '{}' is not a hostname",
                self.public_host
            )));
        }
        if !(self.database_url.starts_with("postgresql://")
            || self.database_url.starts_with("postgres://"))
        {
            return Err(ConfigError::Invalid(
                "database_url must be a postgresql:// URL".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        HostConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = HostConfig::from_toml(
            r#"
            managed_root = "/data/apps"
            public_host = "apps.example.com"

            [logging]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.managed_root, PathBuf::from("/data/apps"));
        assert_eq!(config.public_host, "apps.example.com");
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.binaries, BinaryPaths::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = HostConfig::from_toml("managed_rot = \"/x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("HOSTGATE_MANAGED_ROOT", "/env/apps"),
            ("HOSTGATE_LOG_JSON", "yes"),
            ("HOSTGATE_LOG_LEVEL", "debug"),
        ]);
        let config = HostConfig::default()
            .apply_overrides(|k| env.get(k).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.managed_root, PathBuf::from("/env/apps"));
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.public_host, "localhost");
    }

    #[test]
    fn bad_boolean_names_the_variable() {
        let err = HostConfig::default()
            .apply_overrides(|k| (k == "HOSTGATE_LOG_JSON").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("HOSTGATE_LOG_JSON"));
    }

    #[test]
    fn validation_rules() {
        let relative = HostConfig::default().with_managed_root("apps");
        assert!(relative.validate().is_err());

        let nested = HostConfig::default()
            .with_managed_root("/srv/apps")
            .with_audit_log("/srv/apps/audit.log");
        assert!(nested.validate().is_err());

        let host = HostConfig::default().with_public_host("evil/host");
        assert!(host.validate().is_err());

        let mut db = HostConfig::default();
        db.database_url = "mysql://x".to_string();
        assert!(db.validate().is_err());
    }

    #[test]
    fn debug_hides_database_password() {
        let mut config = HostConfig::default();
        config.database_url = "postgresql://postgres:hunter2@db:5432".to_string();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
