//! `supabase.apply`: schema migration pass-through

use super::{ensure_project_path, seal, ReleasePipeline};
use crate::action_log::ActionLog;
use crate::cli::is_function_name;
use crate::envelope::{EnvelopeBuilder, ReleaseEnvelope};
use crate::error::PipelineError;
use crate::layout::ReleaseId;
use crate::stage::StageAction;
use schemars::JsonSchema;
use serde::Deserialize;
use std::path::Path;

const ACTION: StageAction = StageAction::SupabaseApply;

/// Arguments of `supabase.apply`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ApplyRequest {
    /// Release the migration run is logged under
    pub release_id: String,
    /// Application slug, sanitized before use
    pub app_slug: String,
    /// Must equal the application's `src` directory
    pub project_path: String,
    /// Edge functions to deploy after the migrations
    #[serde(default)]
    pub functions: Vec<String>,
}

impl ReleasePipeline {
    /// Apply pending migrations from `<app>/src` and deploy named functions
    pub async fn supabase_apply(&self, request: &ApplyRequest) -> ReleaseEnvelope {
        let mut envelope = EnvelopeBuilder::start(&request.release_id, ACTION.name());
        let result = self.apply_migrations(request, &mut envelope).await;
        seal(envelope, ACTION, &request.app_slug, result)
    }

    async fn apply_migrations(
        &self,
        request: &ApplyRequest,
        envelope: &mut EnvelopeBuilder,
    ) -> Result<String, PipelineError> {
        let release_id = ReleaseId::parse(&request.release_id)?;
        let layout = self.layout(&request.app_slug)?;
        let project_dir = layout.src()?;
        ensure_project_path(&request.project_path, &project_dir)?;
        if let Some(bad) = request.functions.iter().find(|f| !is_function_name(f)) {
            return Err(PipelineError::InvalidInput(format!("invalid function name '{bad}'")));
        }

        let _lock = self.locks.acquire(layout.slug()).await;
        let mut log = self.open_log(&layout, &release_id, ACTION).await?;
        let outcome = self
            .run_migrations(&project_dir, &request.functions, &mut log, envelope)
            .await;
        self.conclude(&layout, &release_id, ACTION, log, outcome, envelope)
            .await
    }

    async fn run_migrations(
        &self,
        project_dir: &Path,
        functions: &[String],
        log: &mut ActionLog,
        envelope: &mut EnvelopeBuilder,
    ) -> Result<String, PipelineError> {
        let is_dir = tokio::fs::metadata(project_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(PipelineError::Precondition(format!(
                "no source checkout at {}; run repo.clone first",
                project_dir.display()
            )));
        }

        log.line(&format!("applying migrations in {}", project_dir.display()))
            .await;
        let report = self.drivers.migrations.apply(project_dir, functions).await?;
        if !report.output.trim().is_empty() {
            log.line(&report.output).await;
        }

        let summary = format!(
            "applied {} migration(s), deployed {} function(s)",
            report.applied.len(),
            report.functions.len()
        );
        envelope
            .artifact("migrations", &report.applied)
            .artifact("functions", &report.functions)
            .artifact("project_path", project_dir.display().to_string());
        Ok(summary)
    }
}
