//! Per-application database provisioning

use super::{layout, require_confirmation, AppArgs, ConfirmArgs};
use crate::context::{ExecutionContext, HostServices};
use crate::error::CapabilityError;
use crate::response::CapabilityOutput;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

const MAX_SQL_LEN: usize = 64 * 1024;

pub(super) async fn tables(
    services: &HostServices,
    args: AppArgs,
) -> Result<CapabilityOutput, CapabilityError> {
    let layout = layout(services, &args.app_slug)?;
    let database = layout.slug().database_name();
    let tables = services.drivers().database.list_tables(&database).await?;
    Ok(CapabilityOutput::Data(json!({
        "database": database,
        "tables": tables,
    })))
}

pub(super) async fn backup(
    ctx: &ExecutionContext,
    services: &HostServices,
    args: AppArgs,
) -> Result<CapabilityOutput, CapabilityError> {
    let layout = layout(services, &args.app_slug)?;
    let database = layout.slug().database_name();
    let file_name = format!("{database}-{}.dump", ctx.timestamp.format("%Y%m%dT%H%M%SZ"));
    let backups = layout.backups_dir()?;
    let destination = layout.resolve(&format!("backups/{file_name}"))?;

    tokio::fs::create_dir_all(&backups)
        .await
        .map_err(CapabilityError::io("creating backups directory"))?;
    let bytes = services
        .drivers()
        .database
        .dump(&database, &destination)
        .await?;
    tracing::info!(app = %layout.slug(), %database, bytes, "database backed up");

    Ok(CapabilityOutput::Data(json!({
        "database": database,
        "path": destination.display().to_string(),
        "bytes": bytes,
    })))
}

pub(super) async fn create(
    services: &HostServices,
    args: AppArgs,
) -> Result<CapabilityOutput, CapabilityError> {
    let layout = layout(services, &args.app_slug)?;
    let database = layout.slug().database_name();
    services.drivers().database.create_database(&database).await?;
    tracing::info!(app = %layout.slug(), %database, "database created");
    Ok(CapabilityOutput::Data(json!({
        "database": database,
        "created": true,
    })))
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub(crate) struct QueryArgs {
    app_slug: String,
    /// A single SQL statement
    sql: String,
}

pub(super) async fn query(
    services: &HostServices,
    args: QueryArgs,
) -> Result<CapabilityOutput, CapabilityError> {
    let sql = args.sql.trim();
    if sql.is_empty() {
        return Err(CapabilityError::invalid("sql", "statement is empty"));
    }
    if sql.len() > MAX_SQL_LEN {
        return Err(CapabilityError::invalid(
            "sql",
            format!("statement exceeds {MAX_SQL_LEN} bytes"),
        ));
    }
    let layout = layout(services, &args.app_slug)?;
    let database = layout.slug().database_name();
    let output = services.drivers().database.execute(&database, sql).await?;
    Ok(CapabilityOutput::Data(json!({
        "database": database,
        "output": output,
    })))
}

pub(super) async fn drop_database(
    services: &HostServices,
    args: ConfirmArgs,
) -> Result<CapabilityOutput, CapabilityError> {
    let layout = layout(services, &args.app_slug)?;
    require_confirmation(&layout, &args.confirm)?;
    let database = layout.slug().database_name();
    services.drivers().database.drop_database(&database).await?;
    tracing::warn!(app = %layout.slug(), %database, "database dropped");
    Ok(CapabilityOutput::Data(json!({
        "database": database,
        "dropped": true,
    })))
}
