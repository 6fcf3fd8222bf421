//! Uniform result of a pipeline stage
//!
//! Provides [`ReleaseEnvelope`], the machine-readable [`ErrorCode`]
//! taxonomy, and [`EnvelopeBuilder`] which stamps start/end times and
//! redacts artifacts.

use chrono::{DateTime, Utc};
use hostgate_audit::mask_secret_keys;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};

/// Stable, machine-readable failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RepoCloneFailed,
    SupabaseBootFailed,
    DbMigrationFailed,
    EnvMissingKeys,
    AppDeployFailed,
    PermissionDenied,
    ValidationError,
    PathViolation,
    UnknownCapability,
    InvalidRole,
    DriverFailed,
    NotFound,
    ExecutionFailed,
}

impl ErrorCode {
    /// Wire form, e.g. `ENV_MISSING_KEYS`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::RepoCloneFailed => "REPO_CLONE_FAILED",
            ErrorCode::SupabaseBootFailed => "SUPABASE_BOOT_FAILED",
            ErrorCode::DbMigrationFailed => "DB_MIGRATION_FAILED",
            ErrorCode::EnvMissingKeys => "ENV_MISSING_KEYS",
            ErrorCode::AppDeployFailed => "APP_DEPLOY_FAILED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::PathViolation => "PATH_VIOLATION",
            ErrorCode::UnknownCapability => "UNKNOWN_CAPABILITY",
            ErrorCode::InvalidRole => "INVALID_ROLE",
            ErrorCode::DriverFailed => "DRIVER_FAILED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ExecutionFailed => "EXECUTION_FAILED",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure detail carried by a failed envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Result of one pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseEnvelope {
    pub ok: bool,
    pub release_id: String,
    pub action: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub summary: String,
    pub warnings: Vec<String>,
    pub artifacts: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
}

impl ReleaseEnvelope {
    /// Error code if the stage failed
    #[inline]
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    /// Artifact by name
    #[inline]
    #[must_use]
    pub fn artifact(&self, key: &str) -> Option<&Value> {
        self.artifacts.get(key)
    }
}

/// Accumulates warnings and artifacts while a stage runs
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    release_id: String,
    action: String,
    started_at: DateTime<Utc>,
    warnings: Vec<String>,
    artifacts: IndexMap<String, Value>,
}

impl EnvelopeBuilder {
    /// Start timing a stage
    #[must_use]
    pub fn start(release_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            release_id: release_id.into(),
            action: action.into(),
            started_at: Utc::now(),
            warnings: Vec::new(),
            artifacts: IndexMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Add a warning
    pub fn warn(&mut self, warning: impl Into<String>) -> &mut Self {
        self.warnings.push(warning.into());
        self
    }

    /// Add an artifact; secret-looking keys inside it are masked
    pub fn artifact(&mut self, key: impl Into<String>, value: impl Serialize) -> &mut Self {
        let key = key.into();
        let value = match serde_json::to_value(value) {
            Ok(v) => mask_secret_keys(&v),
            Err(e) => {
                tracing::warn!(artifact = %key, error = %e, "artifact not serializable");
                Value::Null
            }
        };
        let value = if hostgate_audit::is_secret_like(&key) {
            Value::String(hostgate_audit::REDACTED.to_string())
        } else {
            value
        };
        self.artifacts.insert(key, value);
        self
    }

    /// Finish successfully
    #[must_use]
    pub fn succeed(self, summary: impl Into<String>) -> ReleaseEnvelope {
        self.finish(true, summary.into(), None)
    }

    /// Finish with a failure
    #[must_use]
    pub fn fail(self, code: ErrorCode, message: impl Into<String>, hint: Option<String>) -> ReleaseEnvelope {
        let message = message.into();
        let summary = format!("{} failed: {message}", self.action);
        self.finish(
            false,
            summary,
            Some(EnvelopeError {
                code,
                message,
                hint,
            }),
        )
    }

    fn finish(self, ok: bool, summary: String, error: Option<EnvelopeError>) -> ReleaseEnvelope {
        ReleaseEnvelope {
            ok,
            release_id: self.release_id,
            action: self.action,
            started_at: self.started_at,
            ended_at: Utc::now(),
            summary,
            warnings: self.warnings,
            artifacts: self.artifacts,
            error,
        }
    }
}
