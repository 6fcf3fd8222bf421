//! Per-release stage marker
//!
//! The marker at `state/<release_id>.json` records the last stage that
//! completed for a release. It only moves on success, so a crashed or
//! failed stage leaves the previous value in place.

use crate::envelope::ErrorCode;
use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::path::Path;

/// Coarse progression of one release
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Uninitialized,
    SourceReady,
    StackReady,
    Migrated,
    Deployed,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Uninitialized => "UNINITIALIZED",
            Stage::SourceReady => "SOURCE_READY",
            Stage::StackReady => "STACK_READY",
            Stage::Migrated => "MIGRATED",
            Stage::Deployed => "DEPLOYED",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four pipeline actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageAction {
    RepoClone,
    SupabaseEnsure,
    SupabaseApply,
    ReleaseDeploy,
}

impl StageAction {
    /// Pipeline order
    pub const ALL: [StageAction; 4] = [
        StageAction::RepoClone,
        StageAction::SupabaseEnsure,
        StageAction::SupabaseApply,
        StageAction::ReleaseDeploy,
    ];

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    /// Capability name, also used as the log file stem
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            StageAction::RepoClone => "repo.clone",
            StageAction::SupabaseEnsure => "supabase.ensure",
            StageAction::SupabaseApply => "supabase.apply",
            StageAction::ReleaseDeploy => "release.deploy",
        }
    }

    /// Code reported when this action fails for a stage-specific reason
    #[must_use]
    pub const fn failure_code(self) -> ErrorCode {
        match self {
            StageAction::RepoClone => ErrorCode::RepoCloneFailed,
            StageAction::SupabaseEnsure => ErrorCode::SupabaseBootFailed,
            StageAction::SupabaseApply => ErrorCode::DbMigrationFailed,
            StageAction::ReleaseDeploy => ErrorCode::AppDeployFailed,
        }
    }

    /// Stage reached when this action succeeds
    #[must_use]
    pub const fn completes(self) -> Stage {
        match self {
            StageAction::RepoClone => Stage::SourceReady,
            StageAction::SupabaseEnsure => Stage::StackReady,
            StageAction::SupabaseApply => Stage::Migrated,
            StageAction::ReleaseDeploy => Stage::Deployed,
        }
    }
}

/// One successful stage completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub action: String,
    pub stage: Stage,
    pub at: DateTime<Utc>,
}

/// Persisted progress of one release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMarker {
    pub release_id: String,
    pub stage: Stage,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<StageTransition>,
}

impl StageMarker {
    /// Marker of a release nothing has happened to yet
    #[must_use]
    pub fn new(release_id: impl Into<String>) -> Self {
        Self {
            release_id: release_id.into(),
            stage: Stage::Uninitialized,
            updated_at: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Read a marker; a missing file is `None`
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed
    pub async fn load(path: &Path) -> Result<Option<Self>, PipelineError> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::io("reading stage marker")(e)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| PipelineError::Precondition(format!("stage marker is corrupt: {e}")))
    }

    /// Record a completed action
    pub fn advance(&mut self, action: StageAction) {
        let now = Utc::now();
        self.stage = action.completes();
        self.updated_at = now;
        self.history.push(StageTransition {
            action: action.name().to_string(),
            stage: self.stage,
            at: now,
        });
    }

    /// Write via a temporary file and rename
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be written
    pub async fn store(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(PipelineError::io("creating state directory"))?;
        }
        let body = serde_json::to_vec_pretty(self)
            .map_err(|e| PipelineError::Precondition(format!("stage marker not serializable: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(PipelineError::io("writing stage marker"))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(PipelineError::io("replacing stage marker"))
    }
}
