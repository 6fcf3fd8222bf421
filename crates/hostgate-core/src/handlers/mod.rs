//! Capability implementations
//!
//! Handlers receive arguments that already passed the capability's schema.
//! Every path is resolved through the application's [`AppLayout`] before
//! any I/O happens.

mod apps;
mod db;
mod release;

use crate::capability::Capability;
use crate::context::{ExecutionContext, HostServices};
use crate::error::CapabilityError;
use crate::response::CapabilityOutput;
use crate::schema::{InputSchema, SchemaError};
use hostgate_release::{AppLayout, ApplyRequest, CloneRequest, DeployRequest, EnsureRequest};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

/// Run the handler of `capability`
pub(crate) async fn run(
    capability: Capability,
    ctx: &ExecutionContext,
    services: &HostServices,
    arguments: Value,
) -> Result<CapabilityOutput, CapabilityError> {
    match capability {
        Capability::AppsList => {
            let NoArgs {} = parse(arguments)?;
            apps::list(services).await
        }
        Capability::AppsStatus => apps::status(services, parse(arguments)?).await,
        Capability::AppsLogs => apps::logs(services, parse(arguments)?).await,
        Capability::ReleaseStatus => release::status(services, parse(arguments)?).await,
        Capability::DbTables => db::tables(services, parse(arguments)?).await,
        Capability::AppsStart => apps::control(services, parse(arguments)?, apps::Control::Start).await,
        Capability::AppsStop => apps::control(services, parse(arguments)?, apps::Control::Stop).await,
        Capability::AppsRestart => {
            apps::control(services, parse(arguments)?, apps::Control::Restart).await
        }
        Capability::DbBackup => db::backup(ctx, services, parse(arguments)?).await,
        Capability::AppsInit => apps::init(services, parse(arguments)?).await,
        Capability::AppsEnvSet => apps::env_set(services, parse(arguments)?).await,
        Capability::DbCreate => db::create(services, parse(arguments)?).await,
        Capability::DbQuery => db::query(services, parse(arguments)?).await,
        Capability::RepoClone => release::repo_clone(services, parse(arguments)?).await,
        Capability::SupabaseEnsure => release::supabase_ensure(services, parse(arguments)?).await,
        Capability::SupabaseApply => release::supabase_apply(services, parse(arguments)?).await,
        Capability::ReleaseDeploy => release::release_deploy(services, parse(arguments)?).await,
        Capability::AppsRemove => apps::remove(services, parse(arguments)?).await,
        Capability::DbDrop => db::drop_database(services, parse(arguments)?).await,
    }
}

/// Schema of the struct the handler of `capability` parses its arguments into
pub(crate) fn input_schema(capability: Capability) -> Result<InputSchema, SchemaError> {
    let name = capability.name();
    match capability {
        Capability::AppsList => InputSchema::of::<NoArgs>(name),
        Capability::AppsStatus
        | Capability::DbTables
        | Capability::AppsStart
        | Capability::AppsStop
        | Capability::AppsRestart
        | Capability::DbBackup
        | Capability::AppsInit
        | Capability::DbCreate => InputSchema::of::<AppArgs>(name),
        Capability::AppsLogs => InputSchema::of::<apps::LogsArgs>(name),
        Capability::ReleaseStatus => InputSchema::of::<release::StatusArgs>(name),
        Capability::AppsEnvSet => InputSchema::of::<apps::EnvSetArgs>(name),
        Capability::DbQuery => InputSchema::of::<db::QueryArgs>(name),
        Capability::RepoClone => InputSchema::of::<CloneRequest>(name),
        Capability::SupabaseEnsure => InputSchema::of::<EnsureRequest>(name),
        Capability::SupabaseApply => InputSchema::of::<ApplyRequest>(name),
        Capability::ReleaseDeploy => InputSchema::of::<DeployRequest>(name),
        Capability::AppsRemove | Capability::DbDrop => InputSchema::of::<ConfirmArgs>(name),
    }
}

/// Typed view of schema-checked arguments
fn parse<T: DeserializeOwned>(arguments: Value) -> Result<T, CapabilityError> {
    let arguments = if arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| CapabilityError::Validation {
        field: None,
        reason: format!("invalid arguments: {e}"),
    })
}

/// Capabilities that take no arguments
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub(crate) struct NoArgs {}

/// Arguments naming just an application
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub(crate) struct AppArgs {
    /// Application slug, sanitized before use
    app_slug: String,
}

/// Arguments of destructive capabilities
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub(crate) struct ConfirmArgs {
    /// Application slug, sanitized before use
    app_slug: String,
    /// Must repeat the sanitized slug
    confirm: String,
}

fn layout(services: &HostServices, app_slug: &str) -> Result<AppLayout, CapabilityError> {
    Ok(services.pipeline().layout(app_slug)?)
}

/// The caller must repeat the sanitized slug to confirm
fn require_confirmation(layout: &AppLayout, confirm: &str) -> Result<(), CapabilityError> {
    if confirm == layout.slug().as_str() {
        Ok(())
    } else {
        Err(CapabilityError::invalid(
            "confirm",
            format!("confirm must equal the application slug '{}'", layout.slug()),
        ))
    }
}

async fn require_app(layout: &AppLayout) -> Result<(), CapabilityError> {
    if exists(&layout.app_dir()).await? {
        Ok(())
    } else {
        Err(CapabilityError::NotFound(format!(
            "application '{}' does not exist",
            layout.slug()
        )))
    }
}

async fn exists(path: &Path) -> Result<bool, CapabilityError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(CapabilityError::io(format!("checking {}", path.display())))
}

/// Release `current` points at, if any
async fn current_release(layout: &AppLayout) -> Result<Option<String>, CapabilityError> {
    let current = layout.current()?;
    match tokio::fs::read_link(&current).await {
        Ok(target) => Ok(target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())),
        Err(e) if matches!(e.kind(), std::io::ErrorKind::NotFound | std::io::ErrorKind::InvalidInput) => {
            Ok(None)
        }
        Err(e) => Err(CapabilityError::io("reading current pointer")(e)),
    }
}
