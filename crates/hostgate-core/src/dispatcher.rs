//! Single entry point from transport adapters into capabilities
//!
//! Steps, in order:
//!
//! 1. parse the role claim (`INVALID_ROLE`)
//! 2. look up the capability (`UNKNOWN_CAPABILITY`)
//! 3. authorize (`PERMISSION_DENIED`, carrying both roles)
//! 4. validate arguments against the schema (`VALIDATION_ERROR`)
//! 5. run the handler under the audit wrapper
//!
//! Steps 1-4 reject without auditing; they are logged with `warn!`. Every
//! invocation that reaches step 5 produces exactly one audit record, also
//! when the handler panics.

use crate::context::{ExecutionContext, HostServices};
use crate::error::CapabilityError;
use crate::handlers;
use crate::registry::{CapabilityDescriptor, CapabilityRegistry};
use crate::response::{DispatchResponse, Handled, ResponseError};
use crate::schema::SchemaError;
use hostgate_audit::{AuditLogger, AuditedCall};
use hostgate_guard::{Role, RoleError};
use hostgate_release::ErrorCode;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Routes invocations to handlers
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    services: HostServices,
    audit: AuditLogger,
}

impl Dispatcher {
    /// Build the registry and wire it to `services` and `audit`
    ///
    /// # Errors
    /// Returns a [`SchemaError`] if an argument schema does not compile
    pub fn new(services: HostServices, audit: AuditLogger) -> Result<Self, SchemaError> {
        Ok(Self {
            registry: Arc::new(CapabilityRegistry::new()?),
            services,
            audit,
        })
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    #[inline]
    #[must_use]
    pub fn services(&self) -> &HostServices {
        &self.services
    }

    /// Handle one invocation; never fails, errors are part of the response
    pub async fn dispatch(&self, role_claim: &str, capability: &str, arguments: Value) -> DispatchResponse {
        let request_id = Uuid::new_v4();
        match self.admit(role_claim, capability, &arguments) {
            Ok((role, descriptor)) => self.invoke(request_id, role, descriptor, arguments).await,
            Err(err) => {
                tracing::warn!(%request_id, role = role_claim, capability, error = %err, "invocation rejected");
                DispatchResponse::from_error(request_id, capability, &err)
            }
        }
    }

    /// Steps 1-4
    fn admit(
        &self,
        role_claim: &str,
        capability: &str,
        arguments: &Value,
    ) -> Result<(Role, &CapabilityDescriptor), CapabilityError> {
        let role: Role = role_claim.parse().map_err(|e: RoleError| match e {
            RoleError::Invalid(claim) => CapabilityError::InvalidRole(claim),
            RoleError::Insufficient { .. } => CapabilityError::InvalidRole(role_claim.to_string()),
        })?;

        let descriptor = self
            .registry
            .lookup(capability)
            .ok_or_else(|| CapabilityError::UnknownCapability(capability.to_string()))?;

        self.registry
            .authorizer()
            .authorize(role, descriptor.required_role)
            .map_err(|_| CapabilityError::PermissionDenied {
                capability: descriptor.name.to_string(),
                required: descriptor.required_role,
                actual: role,
            })?;

        descriptor.schema.validate(arguments)?;
        Ok((role, descriptor))
    }

    /// Step 5
    async fn invoke(
        &self,
        request_id: Uuid,
        role: Role,
        descriptor: &CapabilityDescriptor,
        arguments: Value,
    ) -> DispatchResponse {
        let ctx = ExecutionContext::new(role, request_id, Arc::clone(self.services.config()));
        let call = AuditedCall {
            request_id: ctx.request_id,
            capability: descriptor.name,
            role,
            timestamp: ctx.timestamp,
            arguments: &arguments,
        };

        let handler = async {
            Handled(handlers::run(descriptor.capability, &ctx, &self.services, arguments.clone()).await)
        };
        let audited = self.audit.audited(call, handler).await;

        let mut response = match audited.outcome {
            Ok(Handled(Ok(output))) => {
                let response = DispatchResponse::from_output(request_id, descriptor.name, output);
                tracing::info!(%request_id, capability = descriptor.name, %role, ok = response.ok, "invocation completed");
                response
            }
            Ok(Handled(Err(err))) => {
                tracing::info!(%request_id, capability = descriptor.name, %role, error = %err, "invocation failed");
                DispatchResponse::from_error(request_id, descriptor.name, &err)
            }
            Err(panic) => {
                tracing::error!(%request_id, capability = descriptor.name, %role, error = %panic, "handler panicked");
                // The panic message may carry internals; callers get a generic one.
                DispatchResponse {
                    ok: false,
                    request_id,
                    capability: descriptor.name.to_string(),
                    data: None,
                    error: Some(ResponseError {
                        code: ErrorCode::ExecutionFailed,
                        message: "capability execution failed".to_string(),
                        hint: None,
                        field: None,
                    }),
                    audit_error: None,
                }
            }
        };

        if let Err(e) = audited.audit {
            response.audit_error = Some(e.to_string());
        }
        response
    }
}
