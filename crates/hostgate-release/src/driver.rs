//! Seams to the external collaborators the pipeline orchestrates
//!
//! Every trait here is implemented twice: by the CLI bindings in
//! [`crate::cli`] for production and by in-memory fakes for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Failure reported by an external driver
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Program could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Program ran and exited unsuccessfully
    #[error("{program} exited with status {status}: {stderr}")]
    Failed {
        program: String,
        status: i32,
        stderr: String,
    },

    /// Input refused before anything was executed
    #[error("invalid input for {program}: {reason}")]
    InvalidInput { program: String, reason: String },

    /// Program output could not be interpreted
    #[error("unexpected output from {program}: {reason}")]
    Output { program: String, reason: String },
}

impl DriverError {
    /// Create new invalid input error
    #[must_use]
    pub fn invalid_input(program: &str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            program: program.to_string(),
            reason: reason.into(),
        }
    }
}

/// Version control operations on an application checkout
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// `true` if `dir` already holds a working copy
    async fn is_work_tree(&self, dir: &Path) -> bool;

    /// Fresh checkout of `url` at `reference` into `dir`
    async fn clone_at(&self, url: &str, reference: &str, dir: &Path) -> Result<(), DriverError>;

    /// Fetch and fast-forward an existing working copy to `reference`
    async fn fast_forward(&self, dir: &Path, reference: &str) -> Result<(), DriverError>;

    /// Revision currently checked out
    async fn head_revision(&self, dir: &Path) -> Result<String, DriverError>;

    /// URL the working copy's `origin` remote points at
    async fn origin_url(&self, dir: &Path) -> Result<String, DriverError>;
}

/// Compose-style stack control
#[async_trait]
pub trait ContainerOrchestrator: Send + Sync {
    /// `true` if the stack (or one service of it) has running containers
    async fn is_running(&self, compose_file: &Path, service: Option<&str>)
        -> Result<bool, DriverError>;

    async fn up(&self, compose_file: &Path, service: Option<&str>) -> Result<(), DriverError>;

    async fn stop(&self, compose_file: &Path) -> Result<(), DriverError>;

    async fn restart(&self, compose_file: &Path, service: Option<&str>) -> Result<(), DriverError>;

    /// Stop and remove the stack's containers
    async fn down(&self, compose_file: &Path) -> Result<(), DriverError>;
}

/// Relational database administration
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    async fn create_database(&self, name: &str) -> Result<(), DriverError>;

    async fn drop_database(&self, name: &str) -> Result<(), DriverError>;

    /// Run one statement and return its textual result
    async fn execute(&self, database: &str, sql: &str) -> Result<String, DriverError>;

    /// Tables in the public schema, sorted
    async fn list_tables(&self, database: &str) -> Result<Vec<String>, DriverError>;

    /// Write a dump to `destination` and return its size in bytes
    async fn dump(&self, database: &str, destination: &Path) -> Result<u64, DriverError>;
}

/// Outcome of applying migrations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Migrations applied by this run
    pub applied: Vec<String>,
    /// Functions deployed by this run
    pub functions: Vec<String>,
    /// Combined tool output
    pub output: String,
}

/// Schema migration pass-through
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    async fn apply(&self, project_dir: &Path, functions: &[String])
        -> Result<MigrationReport, DriverError>;
}

/// All drivers a host needs
#[derive(Clone)]
pub struct Drivers {
    pub source: Arc<dyn SourceControl>,
    pub containers: Arc<dyn ContainerOrchestrator>,
    pub database: Arc<dyn DatabaseDriver>,
    pub migrations: Arc<dyn MigrationRunner>,
}

impl fmt::Debug for Drivers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drivers").finish_non_exhaustive()
    }
}
