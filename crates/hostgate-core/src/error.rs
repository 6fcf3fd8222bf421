//! Capability failures and their wire codes

use crate::schema::SchemaViolation;
use hostgate_guard::{GuardError, Role};
use hostgate_release::{DriverError, EnvFileError, ErrorCode, PipelineError};

/// Why an invocation did not succeed
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("unknown capability '{0}'")]
    UnknownCapability(String),

    #[error("invalid role '{0}'")]
    InvalidRole(String),

    #[error("'{capability}' requires role {required}, caller is {actual}")]
    PermissionDenied {
        capability: String,
        required: Role,
        actual: Role,
    },

    /// Argument refused by the schema or by handler-level rules
    #[error("{reason}")]
    Validation {
        field: Option<String>,
        reason: String,
    },

    #[error("path violation: {0}")]
    Path(#[from] GuardError),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Handler failed for a reason that is not the caller's to fix
    #[error("{0}")]
    Execution(String),
}

impl CapabilityError {
    /// Argument error naming `field`
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: Some(field.to_string()),
            reason: reason.into(),
        }
    }

    /// Wrap an I/O error with what was being attempted
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }

    /// Stable wire code
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownCapability(_) => ErrorCode::UnknownCapability,
            Self::InvalidRole(_) => ErrorCode::InvalidRole,
            Self::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::Path(_) => ErrorCode::PathViolation,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Driver(_) => ErrorCode::DriverFailed,
            Self::Io { .. } | Self::Execution(_) => ErrorCode::ExecutionFailed,
        }
    }

    /// Remediation hint, when one is known
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::UnknownCapability(_) => Some("list capabilities to see what is available".to_string()),
            Self::InvalidRole(_) => Some("role must be one of observer, operator, builder, admin".to_string()),
            Self::PermissionDenied { required, .. } => Some(format!("invoke as {required} or higher")),
            Self::Path(_) => Some("paths must stay inside the application directory".to_string()),
            _ => None,
        }
    }
}

impl From<SchemaViolation> for CapabilityError {
    fn from(violation: SchemaViolation) -> Self {
        Self::Validation {
            field: violation.field,
            reason: violation.message,
        }
    }
}

impl From<EnvFileError> for CapabilityError {
    fn from(err: EnvFileError) -> Self {
        Self::invalid("values", err.to_string())
    }
}

impl From<PipelineError> for CapabilityError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Path(e) => Self::Path(e),
            PipelineError::Driver(e) => Self::Driver(e),
            PipelineError::Io { context, source } => Self::Io { context, source },
            PipelineError::InvalidReleaseId(_) => Self::invalid("release_id", err.to_string()),
            PipelineError::InvalidInput(reason) => Self::Validation { field: None, reason },
            other => Self::Execution(other.to_string()),
        }
    }
}
