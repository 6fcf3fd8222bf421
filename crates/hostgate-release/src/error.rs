//! Pipeline failures and their mapping onto envelope codes

use crate::driver::DriverError;
use crate::envelope::ErrorCode;
use crate::stage::StageAction;
use hostgate_guard::GuardError;

/// Why a stage did not complete
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Path confinement rejected a path
    #[error("path violation: {0}")]
    Path(#[from] GuardError),

    /// Release id is not a safe directory name
    #[error("invalid release id '{0}'")]
    InvalidReleaseId(String),

    /// Source URL is not the allowed origin
    #[error("source url is not an allowed origin: {url}")]
    OriginRejected { url: String },

    /// Existing checkout was cloned from a different origin
    #[error("source directory is a checkout of {existing}, not {requested}")]
    OriginMismatch { existing: String, requested: String },

    /// Ref name could be mistaken for an option or a range
    #[error("invalid ref '{0}'")]
    InvalidRef(String),

    /// Caller-supplied project path is not the application's source dir
    #[error("project path '{given}' does not match expected '{expected}'")]
    ProjectPathMismatch { given: String, expected: String },

    /// Required environment keys absent from `.env`
    #[error("missing required environment keys: {}", keys.join(", "))]
    EnvMissingKeys { keys: Vec<String> },

    /// Stage input that passed the schema but not the stage's rules
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Something the stage depends on is not in place
    #[error("{0}")]
    Precondition(String),

    /// Stack definition could not be read or written
    #[error("stack definition is invalid: {0}")]
    StackDefinition(String),

    /// External driver failed
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Filesystem operation failed
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Wrap an I/O error with what was being attempted
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }

    /// Envelope code for this failure inside `action`
    #[must_use]
    pub fn code(&self, action: StageAction) -> ErrorCode {
        match self {
            Self::Path(_) => ErrorCode::PathViolation,
            Self::EnvMissingKeys { .. } => ErrorCode::EnvMissingKeys,
            Self::InvalidReleaseId(_) | Self::InvalidInput(_) => ErrorCode::ValidationError,
            _ => action.failure_code(),
        }
    }

    /// Remediation hint, when one is known
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::OriginRejected { .. } => {
                Some("use https://github.com/<owner>/<repo> without credentials".to_string())
            }
            Self::OriginMismatch { existing, .. } => Some(format!(
                "clone from {existing}, or remove the application and initialize it again"
            )),
            Self::ProjectPathMismatch { expected, .. } => {
                Some(format!("pass project_path = {expected}"))
            }
            Self::EnvMissingKeys { .. } => {
                Some("set the keys with apps.env.set and retry".to_string())
            }
            Self::Path(_) => Some("paths must stay inside the application directory".to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_stage_unless_specific() {
        let err = PipelineError::OriginRejected {
            url: "https://evil.example/x".to_string(),
        };
        assert_eq!(err.code(StageAction::RepoClone), ErrorCode::RepoCloneFailed);

        let err = PipelineError::OriginMismatch {
            existing: "https://github.com/org/repo".to_string(),
            requested: "https://github.com/other/unrelated".to_string(),
        };
        assert_eq!(err.code(StageAction::RepoClone), ErrorCode::RepoCloneFailed);
        assert!(err.hint().unwrap().contains("https://github.com/org/repo"));

        let err = PipelineError::EnvMissingKeys {
            keys: vec!["A".to_string()],
        };
        assert_eq!(err.code(StageAction::ReleaseDeploy), ErrorCode::EnvMissingKeys);

        let err = PipelineError::Path(GuardError::Traversal {
            path: "/x/../y".to_string(),
        });
        assert_eq!(err.code(StageAction::SupabaseApply), ErrorCode::PathViolation);

        let err = PipelineError::ProjectPathMismatch {
            given: "/a".to_string(),
            expected: "/b".to_string(),
        };
        assert_eq!(err.code(StageAction::SupabaseApply), ErrorCode::DbMigrationFailed);
        assert_eq!(err.code(StageAction::ReleaseDeploy), ErrorCode::AppDeployFailed);
    }

    #[test]
    fn missing_keys_message_names_every_key() {
        let err = PipelineError::EnvMissingKeys {
            keys: vec!["FIRST".to_string(), "SECOND".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("FIRST"));
        assert!(message.contains("SECOND"));
    }
}
