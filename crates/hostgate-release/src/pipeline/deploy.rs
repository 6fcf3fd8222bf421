//! `release.deploy`: materialize a release and move `current` onto it
//!
//! Ordering:
//! 1. project path equality and `.env` completeness (no mutation yet)
//! 2. copy `src/` into `releases/.<id>.partial`, then rename to `releases/<id>`
//! 3. point `current` at the release with a temporary link renamed over it
//! 4. start or restart the service; on failure `current` is put back

use super::{ensure_project_path, seal, ReleasePipeline};
use crate::action_log::ActionLog;
use crate::driver::DriverError;
use crate::env_file::{missing_keys, read_env};
use crate::envelope::{EnvelopeBuilder, ReleaseEnvelope};
use crate::error::PipelineError;
use crate::layout::{AppLayout, ReleaseId};
use crate::stage::StageAction;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

const ACTION: StageAction = StageAction::ReleaseDeploy;

/// How the release is served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeployType {
    /// Service from the application's `docker-compose.yml`
    Compose,
    /// Single-container service, also declared in `docker-compose.yml`
    Docker,
    /// Files served by the host's web server straight from `current`
    Static,
}

impl DeployType {
    const fn runs_service(self) -> bool {
        !matches!(self, DeployType::Static)
    }
}

/// Arguments of `release.deploy`
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DeployRequest {
    /// Directory name of the release under `releases/`
    pub release_id: String,
    /// Application slug, sanitized before use
    pub app_slug: String,
    /// Must equal the application's `src` directory
    pub project_path: String,
    /// How the release is served
    #[serde(rename = "type")]
    pub deploy_type: DeployType,
    /// Compose service to start or restart
    pub service: String,
    /// Port the service listens on
    pub port: u16,
    /// Keys that must be set in `.env` before anything is touched
    pub env_required: Vec<String>,
    /// Public host name; derived from the configured public host when absent
    #[serde(default)]
    pub domain: Option<String>,
    /// Opaque health check settings, recorded with the release
    #[serde(default)]
    #[schemars(with = "Option<BTreeMap<String, Value>>")]
    pub healthcheck: Option<Value>,
}

impl DeployRequest {
    fn check(&self) -> Result<(), PipelineError> {
        let service_ok = !self.service.is_empty()
            && !self.service.starts_with('-')
            && self
                .service
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !service_ok {
            return Err(PipelineError::InvalidInput(format!("invalid service name '{}'", self.service)));
        }
        if self.port == 0 {
            return Err(PipelineError::InvalidInput("port must be non-zero".to_string()));
        }
        if let Some(domain) = &self.domain {
            let domain_ok = !domain.is_empty()
                && domain.len() <= 253
                && !domain.starts_with(['-', '.'])
                && domain.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.'));
            if !domain_ok {
                return Err(PipelineError::InvalidInput(format!("invalid domain '{domain}'")));
            }
        }
        Ok(())
    }
}

/// Paths one deploy touches, all resolved before the lock is taken
struct DeployPaths {
    src: PathBuf,
    env_file: PathBuf,
    compose_file: PathBuf,
    releases: PathBuf,
    release: PathBuf,
    partial: PathBuf,
    current: PathBuf,
}

impl DeployPaths {
    fn resolve(layout: &AppLayout, id: &ReleaseId) -> Result<Self, PipelineError> {
        Ok(Self {
            src: layout.src()?,
            env_file: layout.env_file()?,
            compose_file: layout.compose_file()?,
            releases: layout.releases_dir()?,
            release: layout.release_dir(id)?,
            partial: layout.partial_release_dir(id)?,
            current: layout.current()?,
        })
    }
}

impl ReleasePipeline {
    /// Deploy `<app>/src` as release `release_id`
    pub async fn release_deploy(&self, request: &DeployRequest) -> ReleaseEnvelope {
        let mut envelope = EnvelopeBuilder::start(&request.release_id, ACTION.name());
        let result = self.deploy_release(request, &mut envelope).await;
        seal(envelope, ACTION, &request.app_slug, result)
    }

    async fn deploy_release(
        &self,
        request: &DeployRequest,
        envelope: &mut EnvelopeBuilder,
    ) -> Result<String, PipelineError> {
        let release_id = ReleaseId::parse(&request.release_id)?;
        let layout = self.layout(&request.app_slug)?;
        let paths = DeployPaths::resolve(&layout, &release_id)?;
        ensure_project_path(&request.project_path, &paths.src)?;
        request.check()?;

        let _lock = self.locks.acquire(layout.slug()).await;

        let env = read_env(&paths.env_file)
            .await
            .map_err(PipelineError::io("reading .env"))?;
        let missing = missing_keys(&env, &request.env_required);
        if !missing.is_empty() {
            return Err(PipelineError::EnvMissingKeys { keys: missing });
        }

        let mut log = self.open_log(&layout, &release_id, ACTION).await?;
        log.line(&format!(
            "environment complete ({} required key(s))",
            request.env_required.len()
        ))
        .await;
        let outcome = self
            .cut_over(&layout, &release_id, &paths, request, &mut log, envelope)
            .await;
        self.conclude(&layout, &release_id, ACTION, log, outcome, envelope)
            .await
    }

    async fn cut_over(
        &self,
        layout: &AppLayout,
        release_id: &ReleaseId,
        paths: &DeployPaths,
        request: &DeployRequest,
        log: &mut ActionLog,
        envelope: &mut EnvelopeBuilder,
    ) -> Result<String, PipelineError> {
        if !is_dir(&paths.src).await {
            return Err(PipelineError::Precondition(format!(
                "no source checkout at {}; run repo.clone first",
                paths.src.display()
            )));
        }
        if request.deploy_type.runs_service() && !is_file(&paths.compose_file).await {
            return Err(PipelineError::Precondition(format!(
                "no service definition at {}; run apps.init first",
                paths.compose_file.display()
            )));
        }

        self.materialize(release_id, paths, log, envelope).await?;

        let previous = tokio::fs::read_link(&paths.current).await.ok();
        let target = Path::new("releases").join(release_id.as_str());
        swap_pointer(layout, &paths.current, &target).await?;
        log.line(&format!("current -> {}", target.display())).await;

        if request.deploy_type.runs_service() {
            if let Err(e) = self.start_service(&paths.compose_file, &request.service, log).await {
                log.line(&format!("service start failed: {e}")).await;
                match restore_pointer(layout, &paths.current, previous.as_deref()).await {
                    Ok(()) => log.line("current restored").await,
                    Err(restore) => {
                        tracing::error!(app = %layout.slug(), error = %restore, "could not restore current");
                        envelope.warn(format!("current could not be restored: {restore}"));
                    }
                }
                return Err(e.into());
            }
        } else {
            log.line("static release; no service to start").await;
        }

        let url = match &request.domain {
            Some(domain) => format!("https://{domain}"),
            None => format!("http://{}:{}", self.settings.public_host, request.port),
        };
        let healthcheck = match &request.healthcheck {
            Some(descriptor) => json!({"status": "not_checked", "descriptor": descriptor}),
            None => json!({"status": "skipped"}),
        };

        envelope
            .artifact("url", &url)
            .artifact("healthcheck", healthcheck)
            .artifact("release_path", paths.release.display().to_string())
            .artifact("current_path", paths.current.display().to_string());
        Ok(format!("release {release_id} is live at {url}"))
    }

    /// Copy the source into an immutable release dir unless it already exists
    async fn materialize(
        &self,
        release_id: &ReleaseId,
        paths: &DeployPaths,
        log: &mut ActionLog,
        envelope: &mut EnvelopeBuilder,
    ) -> Result<(), PipelineError> {
        if is_dir(&paths.release).await {
            log.line(&format!("release {release_id} already materialized; reusing it"))
                .await;
            envelope.warn(format!("release {release_id} already existed and was reused"));
            return Ok(());
        }

        if tokio::fs::try_exists(&paths.partial).await.unwrap_or(false) {
            log.line("removing partial copy left by an earlier attempt").await;
            tokio::fs::remove_dir_all(&paths.partial)
                .await
                .map_err(PipelineError::io("removing partial release"))?;
        }
        tokio::fs::create_dir_all(&paths.releases)
            .await
            .map_err(PipelineError::io("creating releases directory"))?;

        let (src, partial) = (paths.src.clone(), paths.partial.clone());
        let report = tokio::task::spawn_blocking(move || copy_tree(&src, &partial))
            .await
            .map_err(|e| PipelineError::Precondition(format!("copy task failed: {e}")))?
            .map_err(PipelineError::io("copying release"))?;

        for skipped in &report.skipped_links {
            envelope.warn(format!("symlink {skipped} was not copied"));
        }
        tokio::fs::rename(&paths.partial, &paths.release)
            .await
            .map_err(PipelineError::io("finalizing release directory"))?;

        log.line(&format!(
            "copied {} file(s), {} byte(s) into {}",
            report.files,
            report.bytes,
            paths.release.display()
        ))
        .await;
        Ok(())
    }

    async fn start_service(&self, compose_file: &Path, service: &str, log: &mut ActionLog) -> Result<(), DriverError> {
        let containers = &self.drivers.containers;
        if containers.is_running(compose_file, Some(service)).await? {
            log.line(&format!("restarting {service}")).await;
            containers.restart(compose_file, Some(service)).await
        } else {
            log.line(&format!("starting {service}")).await;
            containers.up(compose_file, Some(service)).await
        }
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

/// Replace `current` with a link to `target` in one rename
async fn swap_pointer(layout: &AppLayout, current: &Path, target: &Path) -> Result<(), PipelineError> {
    let tmp = layout.resolve(&format!(".current.{}.tmp", uuid::Uuid::new_v4().simple()))?;
    create_link(target, &tmp)
        .await
        .map_err(PipelineError::io("creating pointer"))?;
    if let Err(e) = tokio::fs::rename(&tmp, current).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(PipelineError::io("swapping current")(e));
    }
    Ok(())
}

async fn restore_pointer(layout: &AppLayout, current: &Path, previous: Option<&Path>) -> Result<(), PipelineError> {
    match previous {
        Some(previous) => swap_pointer(layout, current, previous).await,
        None => tokio::fs::remove_file(current)
            .await
            .map_err(PipelineError::io("removing current")),
    }
}

#[cfg(unix)]
async fn create_link(target: &Path, link: &Path) -> io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn create_link(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "release pointers require symlink support",
    ))
}

#[derive(Debug, Default)]
struct CopyReport {
    files: u64,
    bytes: u64,
    skipped_links: Vec<String>,
}

/// Recursive copy that leaves out `.git` and does not follow symlinks
fn copy_tree(src: &Path, dst: &Path) -> io::Result<CopyReport> {
    let mut report = CopyReport::default();
    std::fs::create_dir_all(dst)?;
    copy_dir(src, dst, Path::new(""), &mut report)?;
    Ok(report)
}

fn copy_dir(src: &Path, dst: &Path, relative: &Path, report: &mut CopyReport) -> io::Result<()> {
    let mut entries = std::fs::read_dir(src)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let rel = relative.join(&name);
        let file_type = entry.file_type()?;
        let to = dst.join(&name);

        if file_type.is_symlink() {
            report.skipped_links.push(rel.display().to_string());
        } else if file_type.is_dir() {
            std::fs::create_dir(&to)?;
            copy_dir(&entry.path(), &to, &rel, report)?;
        } else if file_type.is_file() {
            report.bytes += std::fs::copy(entry.path(), &to)?;
            report.files += 1;
        }
    }
    Ok(())
}
