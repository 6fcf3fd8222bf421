//! hostgate Release
//!
//! The four-stage release pipeline and the seams to the tools it drives.
//!
//! # Stages
//!
//! | action | reaches | failure code |
//! |---|---|---|
//! | `repo.clone` | `SOURCE_READY` | `REPO_CLONE_FAILED` |
//! | `supabase.ensure` | `STACK_READY` | `SUPABASE_BOOT_FAILED` |
//! | `supabase.apply` | `MIGRATED` | `DB_MIGRATION_FAILED` |
//! | `release.deploy` | `DEPLOYED` | `APP_DEPLOY_FAILED` |
//!
//! Every stage returns a [`ReleaseEnvelope`], serializes with other stages
//! of the same application through [`AppLocks`], and writes
//! `logs/<release_id>/<action>.log`.
//!
//! # Example
//!
//! ```rust,ignore
//! let pipeline = ReleasePipeline::new(guard, drivers, AppLocks::new(), PipelineSettings::default());
//! let envelope = pipeline.repo_clone(&CloneRequest {
//!     release_id: "rel-1".into(),
//!     app_slug: "demo".into(),
//!     git_url: "https://github.com/org/repo".into(),
//!     reference: None,
//! }).await;
//! assert!(envelope.ok);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod action_log;
pub mod cli;
mod driver;
mod env_file;
mod envelope;
mod error;
mod layout;
mod locks;
mod origin;
mod pipeline;
mod stage;

pub use action_log::ActionLog;
pub use driver::{
    ContainerOrchestrator, DatabaseDriver, DriverError, Drivers, MigrationReport, MigrationRunner,
    SourceControl,
};
pub use env_file::{is_valid_key, merge_env, missing_keys, read_env, EnvFileError};
pub use envelope::{EnvelopeBuilder, EnvelopeError, ErrorCode, ReleaseEnvelope};
pub use error::PipelineError;
pub use layout::{AppLayout, ReleaseId};
pub use locks::{AppLockGuard, AppLocks};
pub use origin::{check_origin, check_ref, same_origin, DEFAULT_REF};
pub use pipeline::{
    ApplyRequest, CloneRequest, DeployRequest, DeployType, EnsureRequest, PipelineSettings,
    ReleasePipeline, ServiceDefinition, StackDefinition, StackPorts,
};
pub use stage::{Stage, StageAction, StageMarker, StageTransition};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
