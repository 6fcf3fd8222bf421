//! Per-application directory layout
//!
//! ```text
//! <root>/<slug>/
//!   src/                         working checkout
//!   supabase/docker-compose.yml  backing stack definition
//!   releases/<release_id>/       immutable snapshots
//!   current -> releases/<id>     live release
//!   logs/<release_id>/<action>.log
//!   state/<release_id>.json      stage marker
//!   backups/                     database dumps
//!   .env
//!   docker-compose.yml           application service definition
//! ```
//!
//! Every accessor goes through [`PathGuard::resolve`].

use crate::error::PipelineError;
use hostgate_guard::{AppSlug, GuardError, PathGuard};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

const MAX_RELEASE_ID_LEN: usize = 64;

/// Release identifier usable as a directory name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReleaseId(String);

impl ReleaseId {
    /// Accept `[A-Za-z0-9._-]{1,64}` not starting with `.`
    ///
    /// # Errors
    /// Returns [`PipelineError::InvalidReleaseId`] otherwise
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_RELEASE_ID_LEN
            && !raw.starts_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(PipelineError::InvalidReleaseId(raw.to_string()))
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ReleaseId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ReleaseId {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ReleaseId> for String {
    fn from(id: ReleaseId) -> Self {
        id.0
    }
}

/// Guarded paths of one application
#[derive(Debug, Clone)]
pub struct AppLayout {
    guard: PathGuard,
    slug: AppSlug,
}

impl AppLayout {
    /// Create new layout for `slug` under the guard's root
    #[must_use]
    pub fn new(guard: PathGuard, slug: AppSlug) -> Self {
        Self { guard, slug }
    }

    #[inline]
    #[must_use]
    pub fn slug(&self) -> &AppSlug {
        &self.slug
    }

    #[inline]
    #[must_use]
    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// `<root>/<slug>`
    #[must_use]
    pub fn app_dir(&self) -> PathBuf {
        self.guard.app_dir(&self.slug)
    }

    /// Resolve a path relative to the app dir
    ///
    /// # Errors
    /// Returns a [`GuardError`] if the result escapes the app dir
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, GuardError> {
        self.guard.resolve(&self.slug, relative)
    }

    /// `<app>/src`, the working copy
    pub fn src(&self) -> Result<PathBuf, GuardError> {
        self.resolve("src")
    }

    /// `<app>/supabase`, home of the backing stack
    pub fn stack_dir(&self) -> Result<PathBuf, GuardError> {
        self.resolve("supabase")
    }

    /// Compose file of the backing stack
    pub fn stack_file(&self) -> Result<PathBuf, GuardError> {
        self.resolve("supabase/docker-compose.yml")
    }

    /// Compose file of the application's own services
    pub fn compose_file(&self) -> Result<PathBuf, GuardError> {
        self.resolve("docker-compose.yml")
    }

    /// `<app>/.env`
    pub fn env_file(&self) -> Result<PathBuf, GuardError> {
        self.resolve(".env")
    }

    /// `<app>/releases`
    pub fn releases_dir(&self) -> Result<PathBuf, GuardError> {
        self.resolve("releases")
    }

    /// Materialized release `id`
    pub fn release_dir(&self, id: &ReleaseId) -> Result<PathBuf, GuardError> {
        self.resolve(&format!("releases/{id}"))
    }

    /// Staging directory a release is copied into before it is renamed
    pub fn partial_release_dir(&self, id: &ReleaseId) -> Result<PathBuf, GuardError> {
        self.resolve(&format!("releases/.{id}.partial"))
    }

    /// The live pointer
    pub fn current(&self) -> Result<PathBuf, GuardError> {
        self.resolve("current")
    }

    /// Log of `action` within release `id`
    pub fn log_file(&self, id: &ReleaseId, action: &str) -> Result<PathBuf, GuardError> {
        self.resolve(&format!("logs/{id}/{action}.log"))
    }

    /// `<app>/logs`
    pub fn logs_dir(&self) -> Result<PathBuf, GuardError> {
        self.resolve("logs")
    }

    /// Stage marker of release `id`
    pub fn state_file(&self, id: &ReleaseId) -> Result<PathBuf, GuardError> {
        self.resolve(&format!("state/{id}.json"))
    }

    /// `<app>/backups`, target of database dumps
    pub fn backups_dir(&self) -> Result<PathBuf, GuardError> {
        self.resolve("backups")
    }
}
