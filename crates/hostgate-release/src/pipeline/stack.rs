//! `supabase.ensure`: backing stack readiness

use super::{seal, ReleasePipeline};
use crate::action_log::ActionLog;
use crate::envelope::{EnvelopeBuilder, ReleaseEnvelope};
use crate::error::PipelineError;
use crate::layout::{AppLayout, ReleaseId};
use crate::stage::StageAction;
use hostgate_guard::AppSlug;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

const ACTION: StageAction = StageAction::SupabaseEnsure;

const BASE_PORT: u16 = 20000;
const PORT_SLOTS: u16 = 3000;

/// Arguments of `supabase.ensure`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EnsureRequest {
    /// Release the stack check is logged under
    pub release_id: String,
    /// Application slug, sanitized before use
    pub app_slug: String,
}

/// Host ports of a default stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackPorts {
    pub api: u16,
    pub db: u16,
    pub studio: u16,
}

impl StackPorts {
    /// Stable ports for `slug`, three consecutive in `20000..29000`
    #[must_use]
    pub fn for_slug(slug: &AppSlug) -> Self {
        let digest = Sha256::digest(slug.as_str().as_bytes());
        let slot = u16::from_be_bytes([digest[0], digest[1]]) % PORT_SLOTS;
        let api = BASE_PORT + slot * 3;
        Self {
            api,
            db: api + 1,
            studio: api + 2,
        }
    }
}

/// One service of a compose file; unknown keys are ignored on read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Container image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Restart policy, e.g. `unless-stopped`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    /// `host:container` port mappings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    /// Env files, relative to the compose file
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_file: Vec<String>,
    /// Inline environment, in insertion order
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub environment: IndexMap<String, String>,
    /// Volume mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Services that must start first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ServiceDefinition {
    /// Host side of the first port mapping
    #[must_use]
    pub fn host_port(&self) -> Option<u16> {
        let mapping = self.ports.first()?;
        let mut parts = mapping.rsplit(':');
        parts.next()?;
        parts.next()?.parse().ok()
    }
}

/// Compose-style definition of the backing stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub services: IndexMap<String, ServiceDefinition>,
}

impl StackDefinition {
    /// Minimal stack: database, REST API and studio
    ///
    /// Credentials are not written here; the services read them from the
    /// application's `.env`.
    #[must_use]
    pub fn default_for(slug: &AppSlug) -> Self {
        let ports = StackPorts::for_slug(slug);
        let env_file = vec!["../.env".to_string()];
        let restart = Some("unless-stopped".to_string());

        let mut services = IndexMap::new();
        services.insert(
            "db".to_string(),
            ServiceDefinition {
                image: Some("supabase/postgres:15.6.1.146".to_string()),
                restart: restart.clone(),
                ports: vec![format!("{}:5432", ports.db)],
                env_file: env_file.clone(),
                environment: IndexMap::from([("POSTGRES_DB".to_string(), slug.database_name())]),
                volumes: Vec::new(),
                depends_on: Vec::new(),
            },
        );
        services.insert(
            "api".to_string(),
            ServiceDefinition {
                image: Some("postgrest/postgrest:v12.2.3".to_string()),
                restart: restart.clone(),
                ports: vec![format!("{}:3000", ports.api)],
                env_file: env_file.clone(),
                environment: IndexMap::from([("PGRST_DB_SCHEMAS".to_string(), "public".to_string())]),
                volumes: Vec::new(),
                depends_on: vec!["db".to_string()],
            },
        );
        services.insert(
            "studio".to_string(),
            ServiceDefinition {
                image: Some("supabase/studio:20240729-ce42139".to_string()),
                restart,
                ports: vec![format!("{}:3000", ports.studio)],
                env_file,
                environment: IndexMap::new(),
                volumes: Vec::new(),
                depends_on: vec!["api".to_string()],
            },
        );

        Self {
            name: Some(format!("{slug}-stack")),
            services,
        }
    }

    /// Parse a definition file
    ///
    /// # Errors
    /// Returns [`PipelineError::StackDefinition`] on unreadable or invalid YAML
    pub async fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::StackDefinition(format!("{}: {e}", path.display())))?;
        serde_yaml::from_str(&raw).map_err(|e| PipelineError::StackDefinition(e.to_string()))
    }

    /// Write this definition as YAML
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails
    pub async fn store(&self, path: &Path) -> Result<(), PipelineError> {
        let yaml =
            serde_yaml::to_string(self).map_err(|e| PipelineError::StackDefinition(e.to_string()))?;
        tokio::fs::write(path, yaml)
            .await
            .map_err(PipelineError::io("writing stack definition"))
    }

    fn service_port(&self, service: &str) -> Result<u16, PipelineError> {
        self.services
            .get(service)
            .and_then(ServiceDefinition::host_port)
            .ok_or_else(|| {
                PipelineError::StackDefinition(format!("service '{service}' has no published port"))
            })
    }
}

/// Externally reachable endpoints of a stack
#[derive(Debug, Clone, PartialEq, Eq)]
struct StackEndpoints {
    api_url: String,
    db_url: String,
    studio_url: Option<String>,
}

impl StackEndpoints {
    fn from_definition(def: &StackDefinition, host: &str, slug: &AppSlug) -> Result<Self, PipelineError> {
        let api = def.service_port("api")?;
        let db = def.service_port("db")?;
        let studio = def.service_port("studio").ok();
        Ok(Self {
            api_url: format!("http://{host}:{api}"),
            db_url: format!("postgresql://postgres@{host}:{db}/{}", slug.database_name()),
            studio_url: studio.map(|p| format!("http://{host}:{p}")),
        })
    }
}

impl ReleasePipeline {
    /// Make sure the stack definition exists and the stack is running
    ///
    /// A running stack is left alone.
    pub async fn supabase_ensure(&self, request: &EnsureRequest) -> ReleaseEnvelope {
        let mut envelope = EnvelopeBuilder::start(&request.release_id, ACTION.name());
        let result = self.ensure_stack(request, &mut envelope).await;
        seal(envelope, ACTION, &request.app_slug, result)
    }

    async fn ensure_stack(
        &self,
        request: &EnsureRequest,
        envelope: &mut EnvelopeBuilder,
    ) -> Result<String, PipelineError> {
        let release_id = ReleaseId::parse(&request.release_id)?;
        let layout = self.layout(&request.app_slug)?;
        let stack_dir = layout.stack_dir()?;
        let stack_file = layout.stack_file()?;

        let _lock = self.locks.acquire(layout.slug()).await;
        let mut log = self.open_log(&layout, &release_id, ACTION).await?;
        let outcome = self
            .boot_stack(&layout, &stack_dir, &stack_file, &mut log, envelope)
            .await;
        self.conclude(&layout, &release_id, ACTION, log, outcome, envelope)
            .await
    }

    async fn boot_stack(
        &self,
        layout: &AppLayout,
        stack_dir: &Path,
        stack_file: &Path,
        log: &mut ActionLog,
        envelope: &mut EnvelopeBuilder,
    ) -> Result<String, PipelineError> {
        let exists = tokio::fs::try_exists(stack_file)
            .await
            .map_err(PipelineError::io("checking stack definition"))?;
        if !exists {
            tokio::fs::create_dir_all(stack_dir)
                .await
                .map_err(PipelineError::io("creating stack directory"))?;
            StackDefinition::default_for(layout.slug())
                .store(stack_file)
                .await?;
            log.line(&format!("wrote default stack definition {}", stack_file.display()))
                .await;
        }

        let definition = StackDefinition::load(stack_file).await?;
        let endpoints =
            StackEndpoints::from_definition(&definition, &self.settings.public_host, layout.slug())?;

        let containers = &self.drivers.containers;
        let started = if containers.is_running(stack_file, None).await? {
            log.line("stack already running").await;
            false
        } else {
            log.line("starting stack").await;
            containers.up(stack_file, None).await?;
            true
        };

        envelope
            .artifact("api_url", &endpoints.api_url)
            .artifact("db_url", &endpoints.db_url);
        if let Some(studio) = &endpoints.studio_url {
            envelope.artifact("studio_url", studio);
        }
        envelope
            .artifact("compose_file", stack_file.display().to_string())
            .artifact("started", started);

        Ok(if started {
            format!("stack started at {}", endpoints.api_url)
        } else {
            format!("stack already running at {}", endpoints.api_url)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn slug(s: &str) -> AppSlug {
        AppSlug::parse(s).unwrap()
    }

    #[test]
    fn ports_are_stable_and_in_range() {
        let a = StackPorts::for_slug(&slug("demo"));
        assert_eq!(a, StackPorts::for_slug(&slug("demo")));
        assert!(a.api >= BASE_PORT && a.studio < BASE_PORT + PORT_SLOTS * 3);
        assert_eq!(a.db, a.api + 1);
        assert_eq!(a.studio, a.api + 2);
    }

    #[test]
    fn host_port_parsing() {
        let service = |ports: &[&str]| ServiceDefinition {
            ports: ports.iter().map(ToString::to_string).collect(),
            ..ServiceDefinition::default()
        };
        assert_eq!(service(&["20001:5432"]).host_port(), Some(20001));
        assert_eq!(service(&["127.0.0.1:20001:5432"]).host_port(), Some(20001));
        assert_eq!(service(&["5432"]).host_port(), None);
        assert_eq!(service(&[]).host_port(), None);
    }

    #[test]
    fn default_definition_roundtrips_through_yaml() {
        let def = StackDefinition::default_for(&slug("my-app"));
        let yaml = serde_yaml::to_string(&def).unwrap();
        assert!(yaml.contains("env_file"));
        assert!(!yaml.to_lowercase().contains("password"));

        let parsed: StackDefinition = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, def);
        assert_eq!(parsed.services["db"].environment["POSTGRES_DB"], "my_app");
    }

    #[test]
    fn digit_leading_slug_gets_a_valid_database_name() {
        let slug = AppSlug::parse("2048-game").unwrap();
        let def = StackDefinition::default_for(&slug);
        assert_eq!(def.services["db"].environment["POSTGRES_DB"], "app_2048_game");
    }

    #[test]
    fn foreign_compose_keys_are_tolerated() {
        let yaml = "services:\n  api:\n    image: x\n    ports: [\"8000:3000\"]\n    healthcheck:\n      test: [\"CMD\", \"true\"]\n  db:\n    image: y\n    ports: [\"8001:5432\"]\n";
        let def: StackDefinition = serde_yaml::from_str(yaml).unwrap();
        let endpoints = StackEndpoints::from_definition(&def, "host", &slug("demo")).unwrap();
        assert_eq!(endpoints.api_url, "http://host:8000");
        assert_eq!(endpoints.db_url, "postgresql://postgres@host:8001/demo");
        assert_eq!(endpoints.studio_url, None);
    }
}
