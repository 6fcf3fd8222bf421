//! Uniform result of a dispatched invocation

use crate::error::CapabilityError;
use hostgate_audit::Auditable;
use hostgate_release::{ErrorCode, ReleaseEnvelope};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What a handler produced
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityOutput {
    /// Plain data for the caller
    Data(Value),
    /// Release stage result; a failed envelope is a failed invocation
    Release(ReleaseEnvelope),
}

impl CapabilityOutput {
    fn into_value(self) -> Value {
        match self {
            CapabilityOutput::Data(value) => value,
            CapabilityOutput::Release(envelope) => {
                serde_json::to_value(envelope).unwrap_or(Value::Null)
            }
        }
    }
}

/// Handler result in the shape the audit wrapper understands
#[derive(Debug)]
pub struct Handled(pub Result<CapabilityOutput, CapabilityError>);

impl Auditable for Handled {
    fn audit_outcome(&self) -> Result<(), String> {
        match &self.0 {
            Ok(CapabilityOutput::Data(_)) => Ok(()),
            Ok(CapabilityOutput::Release(envelope)) => match &envelope.error {
                None => Ok(()),
                Some(error) => Err(format!("{}: {}", error.code, error.message)),
            },
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Machine-readable failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Offending argument, for validation errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl From<&CapabilityError> for ResponseError {
    fn from(err: &CapabilityError) -> Self {
        let field = match err {
            CapabilityError::Validation { field, .. } => field.clone(),
            _ => None,
        };
        Self {
            code: err.code(),
            message: err.to_string(),
            hint: err.hint(),
            field,
        }
    }
}

/// Response handed back to the transport adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub ok: bool,
    pub request_id: Uuid,
    pub capability: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    /// Set when the audit record could not be written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_error: Option<String>,
}

impl DispatchResponse {
    pub(crate) fn from_output(request_id: Uuid, capability: &str, output: CapabilityOutput) -> Self {
        // A release envelope carries its own error; surface it at the top
        // level too so callers can branch on one field.
        let error = match &output {
            CapabilityOutput::Release(envelope) => envelope.error.as_ref().map(|e| ResponseError {
                code: e.code,
                message: e.message.clone(),
                hint: e.hint.clone(),
                field: None,
            }),
            CapabilityOutput::Data(_) => None,
        };
        Self {
            ok: error.is_none(),
            request_id,
            capability: capability.to_string(),
            data: Some(output.into_value()),
            error,
            audit_error: None,
        }
    }

    pub(crate) fn from_error(request_id: Uuid, capability: &str, err: &CapabilityError) -> Self {
        Self {
            ok: false,
            request_id,
            capability: capability.to_string(),
            data: None,
            error: Some(ResponseError::from(err)),
            audit_error: None,
        }
    }

    /// Failure code, if the invocation failed
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostgate_release::EnvelopeBuilder;
    use serde_json::json;

    #[test]
    fn failed_envelope_is_a_failed_invocation() {
        let envelope = EnvelopeBuilder::start("r1", "release.deploy").fail(
            ErrorCode::EnvMissingKeys,
            "missing required environment keys: A",
            None,
        );
        let handled = Handled(Ok(CapabilityOutput::Release(envelope.clone())));
        assert!(handled.audit_outcome().unwrap_err().starts_with("ENV_MISSING_KEYS"));

        let response = DispatchResponse::from_output(Uuid::nil(), "release.deploy", CapabilityOutput::Release(envelope));
        assert!(!response.ok);
        assert_eq!(response.error_code(), Some(ErrorCode::EnvMissingKeys));
        assert_eq!(response.data.unwrap()["ok"], false);
    }

    #[test]
    fn wire_shape() {
        let response = DispatchResponse::from_output(
            Uuid::nil(),
            "apps.list",
            CapabilityOutput::Data(json!({"apps": []})),
        );
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["ok"], true);
        assert_eq!(wire["requestId"], Uuid::nil().to_string());
        assert!(wire.get("error").is_none());
        assert!(wire.get("auditError").is_none());
    }
}
