//! `repo.clone`: source acquisition

use super::{seal, ReleasePipeline};
use crate::action_log::ActionLog;
use crate::envelope::{EnvelopeBuilder, ReleaseEnvelope};
use crate::error::PipelineError;
use crate::layout::ReleaseId;
use crate::origin::{check_origin, check_ref, same_origin, DEFAULT_REF};
use crate::stage::StageAction;
use schemars::JsonSchema;
use serde::Deserialize;
use std::path::Path;

const ACTION: StageAction = StageAction::RepoClone;

/// Arguments of `repo.clone`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CloneRequest {
    /// Release the clone is logged under
    pub release_id: String,
    /// Application slug, sanitized before use
    pub app_slug: String,
    /// `https://github.com/<owner>/<repo>` URL without credentials
    pub git_url: String,
    /// Branch or tag; `main` when absent
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
}

impl ReleasePipeline {
    /// Clone or fast-forward `<app>/src` to the requested ref
    pub async fn repo_clone(&self, request: &CloneRequest) -> ReleaseEnvelope {
        let mut envelope = EnvelopeBuilder::start(&request.release_id, ACTION.name());
        let result = self.acquire_source(request, &mut envelope).await;
        seal(envelope, ACTION, &request.app_slug, result)
    }

    async fn acquire_source(
        &self,
        request: &CloneRequest,
        envelope: &mut EnvelopeBuilder,
    ) -> Result<String, PipelineError> {
        check_origin(&request.git_url)?;
        let release_id = ReleaseId::parse(&request.release_id)?;
        let layout = self.layout(&request.app_slug)?;
        let reference = request.reference.as_deref().unwrap_or(DEFAULT_REF);
        check_ref(reference)?;
        let target = layout.src()?;

        let _lock = self.locks.acquire(layout.slug()).await;
        let mut log = self.open_log(&layout, &release_id, ACTION).await?;
        let outcome = self
            .sync_checkout(&target, &request.git_url, reference, &mut log, envelope)
            .await;
        self.conclude(&layout, &release_id, ACTION, log, outcome, envelope)
            .await
    }

    async fn sync_checkout(
        &self,
        target: &Path,
        url: &str,
        reference: &str,
        log: &mut ActionLog,
        envelope: &mut EnvelopeBuilder,
    ) -> Result<String, PipelineError> {
        let git = &self.drivers.source;

        let verb = if git.is_work_tree(target).await {
            let existing = git.origin_url(target).await?;
            if !same_origin(&existing, url) {
                return Err(PipelineError::OriginMismatch {
                    existing: hostgate_audit::strip_url_credentials(&existing),
                    requested: hostgate_audit::strip_url_credentials(url),
                });
            }
            log.line(&format!("updating existing checkout to {reference}"))
                .await;
            git.fast_forward(target, reference).await?;
            "updated"
        } else {
            if !dir_is_empty(target).await? {
                return Err(PipelineError::Precondition(format!(
                    "{} exists but is not a working copy",
                    target.display()
                )));
            }
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(PipelineError::io("creating application directory"))?;
            }
            log.line(&format!("cloning {url} at {reference}")).await;
            git.clone_at(url, reference, target).await?;
            "cloned"
        };

        let commit = git.head_revision(target).await?;
        log.line(&format!("checked out {commit}")).await;

        envelope
            .artifact("commit_hash", &commit)
            .artifact("ref", reference)
            .artifact("source_path", target.display().to_string());
        let short = commit.get(..12).unwrap_or(&commit);
        Ok(format!("{verb} {url} at {reference} ({short})"))
    }
}

/// Missing or empty directories may be cloned into
async fn dir_is_empty(dir: &Path) -> Result<bool, PipelineError> {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => Ok(entries
            .next_entry()
            .await
            .map_err(PipelineError::io("reading source directory"))?
            .is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(PipelineError::io("reading source directory")(e)),
    }
}
