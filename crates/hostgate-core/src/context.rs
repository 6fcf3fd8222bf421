//! Per-invocation context and the long-lived services handlers use

use crate::config::HostConfig;
use chrono::{DateTime, Utc};
use hostgate_guard::{PathGuard, Role};
use hostgate_release::{
    cli::{DockerCompose, GitCli, PsqlDriver, SupabaseCli},
    AppLocks, Drivers, PipelineSettings, ReleasePipeline,
};
use std::sync::Arc;
use uuid::Uuid;

/// Identity of one invocation, created by the dispatcher under the request
/// id it already logged and will answer with
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub role: Role,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub config: Arc<HostConfig>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(role: Role, request_id: Uuid, config: Arc<HostConfig>) -> Self {
        Self {
            role,
            request_id,
            timestamp: Utc::now(),
            config,
        }
    }
}

/// Shared state behind every handler
#[derive(Debug, Clone)]
pub struct HostServices {
    config: Arc<HostConfig>,
    pipeline: ReleasePipeline,
}

impl HostServices {
    /// Assemble services around explicit drivers
    ///
    /// # Errors
    /// Returns a [`hostgate_guard::GuardError`] if the managed root is not
    /// an absolute, traversal-free path
    pub fn new(config: HostConfig, drivers: Drivers) -> Result<Self, hostgate_guard::GuardError> {
        let guard = PathGuard::new(&config.managed_root)?;
        let settings = PipelineSettings {
            public_host: config.public_host.clone(),
        };
        let pipeline = ReleasePipeline::new(guard, drivers, AppLocks::new(), settings);
        Ok(Self {
            config: Arc::new(config),
            pipeline,
        })
    }

    /// Assemble services driving the real command-line tools
    ///
    /// # Errors
    /// See [`HostServices::new`]
    pub fn with_cli_drivers(config: HostConfig) -> Result<Self, hostgate_guard::GuardError> {
        let bins = &config.binaries;
        let drivers = Drivers {
            source: Arc::new(GitCli::new(&bins.git)),
            containers: Arc::new(DockerCompose::new(&bins.docker)),
            database: Arc::new(
                PsqlDriver::new(config.database_url.clone()).with_programs(&bins.psql, &bins.pg_dump),
            ),
            migrations: Arc::new(SupabaseCli::new(&bins.supabase)),
        };
        Self::new(config, drivers)
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &Arc<HostConfig> {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> &ReleasePipeline {
        &self.pipeline
    }

    #[inline]
    #[must_use]
    pub fn guard(&self) -> &PathGuard {
        self.pipeline.guard()
    }

    #[inline]
    #[must_use]
    pub fn drivers(&self) -> &Drivers {
        self.pipeline.drivers()
    }

    #[inline]
    #[must_use]
    pub fn locks(&self) -> &AppLocks {
        self.pipeline.locks()
    }
}
