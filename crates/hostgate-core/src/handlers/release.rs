//! Release pipeline capabilities

use super::{current_release, layout};
use crate::context::HostServices;
use crate::error::CapabilityError;
use crate::response::CapabilityOutput;
use hostgate_release::{ApplyRequest, CloneRequest, DeployRequest, EnsureRequest};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub(crate) struct StatusArgs {
    app_slug: String,
    release_id: String,
}

pub(super) async fn status(
    services: &HostServices,
    args: StatusArgs,
) -> Result<CapabilityOutput, CapabilityError> {
    let layout = layout(services, &args.app_slug)?;
    let marker = services
        .pipeline()
        .release_status(&args.app_slug, &args.release_id)
        .await?;
    let is_current = current_release(&layout).await?.as_deref() == Some(marker.release_id.as_str());

    Ok(CapabilityOutput::Data(json!({
        "app_slug": layout.slug().as_str(),
        "release_id": marker.release_id,
        "stage": marker.stage,
        "updated_at": marker.updated_at,
        "history": marker.history,
        "current": is_current,
    })))
}

pub(super) async fn repo_clone(
    services: &HostServices,
    request: CloneRequest,
) -> Result<CapabilityOutput, CapabilityError> {
    Ok(CapabilityOutput::Release(
        services.pipeline().repo_clone(&request).await,
    ))
}

pub(super) async fn supabase_ensure(
    services: &HostServices,
    request: EnsureRequest,
) -> Result<CapabilityOutput, CapabilityError> {
    Ok(CapabilityOutput::Release(
        services.pipeline().supabase_ensure(&request).await,
    ))
}

pub(super) async fn supabase_apply(
    services: &HostServices,
    request: ApplyRequest,
) -> Result<CapabilityOutput, CapabilityError> {
    Ok(CapabilityOutput::Release(
        services.pipeline().supabase_apply(&request).await,
    ))
}

pub(super) async fn release_deploy(
    services: &HostServices,
    request: DeployRequest,
) -> Result<CapabilityOutput, CapabilityError> {
    Ok(CapabilityOutput::Release(
        services.pipeline().release_deploy(&request).await,
    ))
}
