//! Application lifecycle: listing, inspection, service control, setup and teardown

use super::{current_release, exists, layout, require_app, require_confirmation, AppArgs, ConfirmArgs};
use crate::context::HostServices;
use crate::error::CapabilityError;
use crate::response::CapabilityOutput;
use hostgate_guard::AppSlug;
use hostgate_release::{
    merge_env, read_env, AppLayout, ReleaseId, ServiceDefinition, StackDefinition, StackPorts,
    StageAction,
};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;

const DEFAULT_LOG_LINES: usize = 200;
const MAX_LOG_LINES: usize = 5000;

/// Web port of the default compose file sits this far above the stack's API port
const WEB_PORT_OFFSET: u16 = 10000;

/// Directories `apps.init` creates under the application directory
const APP_DIRS: [&str; 4] = ["releases", "logs", "state", "backups"];

pub(super) async fn list(services: &HostServices) -> Result<CapabilityOutput, CapabilityError> {
    let root = services.guard().root();
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(CapabilityOutput::Data(json!({ "apps": [] })));
        }
        Err(e) => return Err(CapabilityError::io("reading managed root")(e)),
    };

    let mut slugs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(CapabilityError::io("reading managed root"))?
    {
        let is_dir = entry
            .file_type()
            .await
            .map_err(CapabilityError::io("reading managed root"))?
            .is_dir();
        let name = entry.file_name();
        // Anything that is not exactly a slug was not created by us.
        if let (true, Ok(slug)) = (is_dir, AppSlug::parse(&name.to_string_lossy())) {
            slugs.push(slug);
        }
    }
    slugs.sort();

    let mut apps = Vec::with_capacity(slugs.len());
    for slug in slugs {
        let layout = AppLayout::new(services.guard().clone(), slug);
        apps.push(json!({
            "app_slug": layout.slug().as_str(),
            "current_release": current_release(&layout).await?,
        }));
    }
    Ok(CapabilityOutput::Data(json!({ "apps": apps })))
}

pub(super) async fn status(
    services: &HostServices,
    args: AppArgs,
) -> Result<CapabilityOutput, CapabilityError> {
    let layout = layout(services, &args.app_slug)?;
    require_app(&layout).await?;

    let compose_file = layout.compose_file()?;
    let stack_file = layout.stack_file()?;
    let containers = &services.drivers().containers;
    let services_running = if exists(&compose_file).await? {
        Some(containers.is_running(&compose_file, None).await?)
    } else {
        None
    };
    let stack_running = if exists(&stack_file).await? {
        Some(containers.is_running(&stack_file, None).await?)
    } else {
        None
    };

    Ok(CapabilityOutput::Data(json!({
        "app_slug": layout.slug().as_str(),
        "current_release": current_release(&layout).await?,
        "releases": releases(&layout).await?,
        "services_running": services_running,
        "stack_running": stack_running,
    })))
}

/// Completed release directories, sorted
async fn releases(layout: &AppLayout) -> Result<Vec<String>, CapabilityError> {
    let dir = layout.releases_dir()?;
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CapabilityError::io("reading releases")(e)),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(CapabilityError::io("reading releases"))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub(crate) struct LogsArgs {
    app_slug: String,
    release_id: String,
    /// Pipeline action whose log to read; all of them when absent
    #[serde(default)]
    action: Option<String>,
    /// Tail length per log
    #[serde(default)]
    lines: Option<i64>,
}

pub(super) async fn logs(
    services: &HostServices,
    args: LogsArgs,
) -> Result<CapabilityOutput, CapabilityError> {
    let layout = layout(services, &args.app_slug)?;
    let release_id = ReleaseId::parse(&args.release_id)?;
    let lines = match args.lines {
        None => DEFAULT_LOG_LINES,
        Some(n) => usize::try_from(n)
            .ok()
            .filter(|n| (1..=MAX_LOG_LINES).contains(n))
            .ok_or_else(|| {
                CapabilityError::invalid("lines", format!("lines must be between 1 and {MAX_LOG_LINES}"))
            })?,
    };
    let actions = match args.action.as_deref() {
        None => StageAction::ALL.to_vec(),
        Some(name) => vec![StageAction::from_name(name).ok_or_else(|| {
            CapabilityError::invalid("action", format!("'{name}' is not a release action"))
        })?],
    };

    let mut logs = IndexMap::new();
    for action in actions {
        let path = layout.log_file(&release_id, action.name())?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                logs.insert(action.name(), tail(&contents, lines));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CapabilityError::io(format!("reading {}", path.display()))(e)),
        }
    }
    if logs.is_empty() {
        return Err(CapabilityError::NotFound(format!(
            "no logs for release '{release_id}' of '{}'",
            layout.slug()
        )));
    }

    Ok(CapabilityOutput::Data(json!({
        "app_slug": layout.slug().as_str(),
        "release_id": release_id.as_str(),
        "logs": logs,
    })))
}

fn tail(contents: &str, lines: usize) -> Vec<String> {
    let all: Vec<&str> = contents.lines().collect();
    all[all.len().saturating_sub(lines)..]
        .iter()
        .map(ToString::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub(super) enum Control {
    Start,
    Stop,
    Restart,
}

pub(super) async fn control(
    services: &HostServices,
    args: AppArgs,
    control: Control,
) -> Result<CapabilityOutput, CapabilityError> {
    let layout = layout(services, &args.app_slug)?;
    let compose_file = layout.compose_file()?;
    if !exists(&compose_file).await? {
        return Err(CapabilityError::NotFound(format!(
            "application '{}' has no docker-compose.yml; run apps.init first",
            layout.slug()
        )));
    }

    let _lock = services.locks().acquire(layout.slug()).await;
    let containers = &services.drivers().containers;
    let state = match control {
        Control::Start => {
            containers.up(&compose_file, None).await?;
            "started"
        }
        Control::Stop => {
            containers.stop(&compose_file).await?;
            "stopped"
        }
        Control::Restart => {
            containers.restart(&compose_file, None).await?;
            "restarted"
        }
    };
    tracing::info!(app = %layout.slug(), state, "application services changed state");

    Ok(CapabilityOutput::Data(json!({
        "app_slug": layout.slug().as_str(),
        "state": state,
    })))
}

pub(super) async fn init(
    services: &HostServices,
    args: AppArgs,
) -> Result<CapabilityOutput, CapabilityError> {
    let layout = layout(services, &args.app_slug)?;
    let _lock = services.locks().acquire(layout.slug()).await;
    let mut created = Vec::new();

    for name in APP_DIRS {
        let dir = layout.resolve(name)?;
        if !exists(&dir).await? {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(CapabilityError::io(format!("creating {name}")))?;
            created.push(format!("{name}/"));
        }
    }

    let env_file = layout.env_file()?;
    if !exists(&env_file).await? {
        tokio::fs::write(&env_file, "")
            .await
            .map_err(CapabilityError::io("creating .env"))?;
        restrict_permissions(&env_file).await?;
        created.push(".env".to_string());
    }

    let web_port = web_port(layout.slug());
    let compose_file = layout.compose_file()?;
    if !exists(&compose_file).await? {
        default_compose(layout.slug(), web_port)
            .store(&compose_file)
            .await?;
        created.push("docker-compose.yml".to_string());
    }

    tracing::info!(app = %layout.slug(), created = created.len(), "application initialized");
    Ok(CapabilityOutput::Data(json!({
        "app_slug": layout.slug().as_str(),
        "app_dir": layout.app_dir().display().to_string(),
        "created": created,
        "web_port": web_port,
    })))
}

fn web_port(slug: &AppSlug) -> u16 {
    StackPorts::for_slug(slug).api + WEB_PORT_OFFSET
}

/// Static web server over `current`
fn default_compose(slug: &AppSlug, port: u16) -> StackDefinition {
    let web = ServiceDefinition {
        image: Some("nginx:1.27-alpine".to_string()),
        restart: Some("unless-stopped".to_string()),
        ports: vec![format!("{port}:80")],
        env_file: vec![".env".to_string()],
        volumes: vec!["./current:/usr/share/nginx/html:ro".to_string()],
        ..ServiceDefinition::default()
    };
    StackDefinition {
        name: Some(slug.to_string()),
        services: IndexMap::from([("web".to_string(), web)]),
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), CapabilityError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(CapabilityError::io(format!("restricting {}", path.display())))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), CapabilityError> {
    Ok(())
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub(crate) struct EnvSetArgs {
    app_slug: String,
    /// Keys to upsert, written in the given order
    values: IndexMap<String, String>,
}

pub(super) async fn env_set(
    services: &HostServices,
    args: EnvSetArgs,
) -> Result<CapabilityOutput, CapabilityError> {
    if args.values.is_empty() {
        return Err(CapabilityError::invalid("values", "at least one key is required"));
    }
    let layout = layout(services, &args.app_slug)?;
    require_app(&layout).await?;
    let env_file = layout.env_file()?;
    let staging = layout.resolve(".env.tmp")?;

    let _lock = services.locks().acquire(layout.slug()).await;
    let existing = read_env(&env_file)
        .await
        .map_err(CapabilityError::io("reading .env"))?;
    let merged = merge_env(&existing, &args.values)?;

    tokio::fs::write(&staging, merged)
        .await
        .map_err(CapabilityError::io("writing .env"))?;
    restrict_permissions(&staging).await?;
    tokio::fs::rename(&staging, &env_file)
        .await
        .map_err(CapabilityError::io("replacing .env"))?;

    let keys: Vec<&str> = args.values.keys().map(String::as_str).collect();
    tracing::info!(app = %layout.slug(), keys = ?keys, "environment updated");
    // Values never leave this function.
    Ok(CapabilityOutput::Data(json!({
        "app_slug": layout.slug().as_str(),
        "keys": keys,
    })))
}

pub(super) async fn remove(
    services: &HostServices,
    args: ConfirmArgs,
) -> Result<CapabilityOutput, CapabilityError> {
    let layout = layout(services, &args.app_slug)?;
    require_confirmation(&layout, &args.confirm)?;
    require_app(&layout).await?;
    let compose_file = layout.compose_file()?;
    let stack_file = layout.stack_file()?;
    let app_dir = layout.app_dir();

    let _lock = services.locks().acquire(layout.slug()).await;
    let drivers = services.drivers();
    let mut warnings: Vec<String> = Vec::new();

    for file in [&compose_file, &stack_file] {
        if exists(file).await? {
            drivers.containers.down(file).await?;
        }
    }
    let database = layout.slug().database_name();
    if let Err(e) = drivers.database.drop_database(&database).await {
        tracing::warn!(app = %layout.slug(), error = %e, "database not dropped");
        warnings.push(format!("database '{database}' was not dropped: {e}"));
    }
    tokio::fs::remove_dir_all(&app_dir)
        .await
        .map_err(CapabilityError::io(format!("removing {}", app_dir.display())))?;

    tracing::warn!(app = %layout.slug(), "application removed");
    Ok(CapabilityOutput::Data(json!({
        "app_slug": layout.slug().as_str(),
        "removed": true,
        "warnings": warnings,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\n", 2), vec!["b", "c"]);
        assert_eq!(tail("a\nb\n", 10), vec!["a", "b"]);
        assert!(tail("", 5).is_empty());
    }

    #[test]
    fn default_compose_serves_current() {
        let slug = AppSlug::parse("demo").unwrap();
        let port = web_port(&slug);
        let def = default_compose(&slug, port);
        let web = &def.services["web"];
        assert_eq!(web.host_port(), Some(port));
        assert!(web.volumes[0].starts_with("./current:"));
        assert!(port >= 30000);
    }
}
