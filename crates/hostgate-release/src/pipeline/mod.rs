//! The four release stages
//!
//! Each stage follows the same shape:
//!
//! 1. fail-closed checks that touch nothing (ids, paths, origin, env keys)
//! 2. take the application lock
//! 3. open `logs/<release_id>/<action>.log`
//! 4. do the work
//! 5. on success advance `state/<release_id>.json`
//!
//! Failures at any step become a failed [`ReleaseEnvelope`]; nothing is
//! raised to the caller.

mod deploy;
mod migrate;
mod source;
mod stack;

pub use deploy::{DeployRequest, DeployType};
pub use migrate::ApplyRequest;
pub use source::CloneRequest;
pub use stack::{EnsureRequest, ServiceDefinition, StackDefinition, StackPorts};

use crate::action_log::ActionLog;
use crate::driver::Drivers;
use crate::envelope::{EnvelopeBuilder, ReleaseEnvelope};
use crate::error::PipelineError;
use crate::layout::{AppLayout, ReleaseId};
use crate::locks::AppLocks;
use crate::stage::{StageAction, StageMarker};
use hostgate_guard::PathGuard;
use std::path::Path;

/// Host-level values the stages need
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Hostname used in URLs when no domain is given
    pub public_host: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            public_host: "localhost".to_string(),
        }
    }
}

/// Runs release stages against one managed root
#[derive(Debug, Clone)]
pub struct ReleasePipeline {
    guard: PathGuard,
    drivers: Drivers,
    locks: AppLocks,
    settings: PipelineSettings,
}

impl ReleasePipeline {
    /// Create new pipeline
    ///
    /// `locks` should be shared with any other component that mutates
    /// application trees.
    #[must_use]
    pub fn new(guard: PathGuard, drivers: Drivers, locks: AppLocks, settings: PipelineSettings) -> Self {
        Self {
            guard,
            drivers,
            locks,
            settings,
        }
    }

    #[inline]
    #[must_use]
    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    #[inline]
    #[must_use]
    pub fn drivers(&self) -> &Drivers {
        &self.drivers
    }

    #[inline]
    #[must_use]
    pub fn locks(&self) -> &AppLocks {
        &self.locks
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Layout for a caller-supplied application name
    ///
    /// # Errors
    /// Returns [`PipelineError::Path`] if the name has no usable characters
    pub fn layout(&self, app_slug: &str) -> Result<AppLayout, PipelineError> {
        let slug = self.guard.sanitize(app_slug)?;
        Ok(AppLayout::new(self.guard.clone(), slug))
    }

    /// Stage marker of a release; a release never touched is `UNINITIALIZED`
    ///
    /// # Errors
    /// Returns an error for an invalid id or slug or an unreadable marker
    pub async fn release_status(&self, app_slug: &str, release_id: &str) -> Result<StageMarker, PipelineError> {
        let release_id = ReleaseId::parse(release_id)?;
        let layout = self.layout(app_slug)?;
        let path = layout.state_file(&release_id)?;
        Ok(StageMarker::load(&path)
            .await?
            .unwrap_or_else(|| StageMarker::new(release_id.as_str())))
    }

    async fn open_log(
        &self,
        layout: &AppLayout,
        release_id: &ReleaseId,
        action: StageAction,
    ) -> Result<ActionLog, PipelineError> {
        let mut log = ActionLog::open(layout.log_file(release_id, action.name())?).await?;
        log.line(&format!("{} started for {}", action.name(), layout.slug()))
            .await;
        Ok(log)
    }

    /// Log the outcome, advance the marker on success, close the log
    async fn conclude(
        &self,
        layout: &AppLayout,
        release_id: &ReleaseId,
        action: StageAction,
        mut log: ActionLog,
        outcome: Result<String, PipelineError>,
        envelope: &mut EnvelopeBuilder,
    ) -> Result<String, PipelineError> {
        match &outcome {
            Ok(summary) => {
                log.line(&format!("completed: {summary}")).await;
                if let Err(e) = advance_marker(layout, release_id, action).await {
                    tracing::warn!(app = %layout.slug(), release = %release_id, error = %e, "stage marker not updated");
                    envelope.warn(format!("stage marker not updated: {e}"));
                }
            }
            Err(e) => log.line(&format!("failed: {e}")).await,
        }
        if let Some(warning) = log.finish().await {
            envelope.warn(warning);
        }
        outcome
    }
}

async fn advance_marker(layout: &AppLayout, release_id: &ReleaseId, action: StageAction) -> Result<(), PipelineError> {
    let path = layout.state_file(release_id)?;
    let mut marker = StageMarker::load(&path)
        .await?
        .unwrap_or_else(|| StageMarker::new(release_id.as_str()));
    marker.advance(action);
    marker.store(&path).await
}

/// Turn a stage result into its envelope
fn seal(envelope: EnvelopeBuilder, action: StageAction, app: &str, result: Result<String, PipelineError>) -> ReleaseEnvelope {
    match result {
        Ok(summary) => {
            tracing::info!(app, action = action.name(), "stage succeeded");
            envelope.succeed(summary)
        }
        Err(e) => {
            let code = e.code(action);
            tracing::warn!(app, action = action.name(), %code, error = %e, "stage failed");
            envelope.fail(code, e.to_string(), e.hint())
        }
    }
}

/// Caller-supplied project path must name the application's source dir
fn ensure_project_path(given: &str, expected: &Path) -> Result<(), PipelineError> {
    if Path::new(given) == expected {
        Ok(())
    } else {
        Err(PipelineError::ProjectPathMismatch {
            given: given.to_string(),
            expected: expected.display().to_string(),
        })
    }
}
