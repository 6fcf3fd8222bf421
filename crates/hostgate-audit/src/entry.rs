//! Audit records and the hash chain linking them

use chrono::{DateTime, Utc};
use hostgate_guard::Role;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hash used as `prevHash` of the first record in a trail
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Outcome of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Error,
}

/// Audit record before it is linked into the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAuditEntry {
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    pub capability: String,
    pub role: Role,
    /// Arguments after redaction
    pub arguments: serde_json::Value,
    pub result: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Duration in milliseconds
    pub duration: u64,
}

impl PendingAuditEntry {
    /// Link this entry after `prev_hash`
    #[must_use]
    pub fn seal(self, prev_hash: &str) -> AuditEntry {
        let hash = chain_hash(prev_hash, &self);
        AuditEntry {
            body: self,
            prev_hash: prev_hash.to_string(),
            hash,
        }
    }
}

/// One line of the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    #[serde(flatten)]
    pub body: PendingAuditEntry,
    pub prev_hash: String,
    pub hash: String,
}

impl AuditEntry {
    /// Recompute the hash and compare with the stored one
    #[must_use]
    pub fn verify(&self) -> bool {
        chain_hash(&self.prev_hash, &self.body) == self.hash
    }

    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.body.result == AuditOutcome::Success
    }
}

/// SHA-256 over the previous hash and the canonical JSON of the body
fn chain_hash(prev_hash: &str, body: &PendingAuditEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update([0]);
    // Serializing a plain struct of strings, numbers and a JSON value cannot fail.
    let canonical = serde_json::to_vec(body).unwrap_or_default();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn pending() -> PendingAuditEntry {
        PendingAuditEntry {
            timestamp: Utc::now(),
            request_id: Uuid::new_v4(),
            capability: "apps.init".to_string(),
            role: Role::Builder,
            arguments: json!({"app_slug": "demo"}),
            result: AuditOutcome::Success,
            error: None,
            duration: 12,
        }
    }

    #[test]
    fn sealed_entry_verifies() {
        let entry = pending().seal(GENESIS_HASH);
        assert!(entry.verify());
        assert_eq!(entry.prev_hash, GENESIS_HASH);
        assert_eq!(entry.hash.len(), 64);
    }

    #[test]
    fn tampering_breaks_verification() {
        let mut entry = pending().seal(GENESIS_HASH);
        entry.body.result = AuditOutcome::Error;
        assert!(!entry.verify());
    }

    #[test]
    fn chain_depends_on_previous_hash() {
        let body = pending();
        let a = body.clone().seal(GENESIS_HASH);
        let b = body.seal(&a.hash);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let mut body = pending();
        body.result = AuditOutcome::Error;
        body.error = Some("boom".to_string());
        let value = serde_json::to_value(body.seal(GENESIS_HASH)).unwrap();

        for field in [
            "timestamp", "requestId", "capability", "role", "arguments", "result", "error",
            "duration", "prevHash", "hash",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["result"], "error");
        assert_eq!(value["role"], "builder");
    }

    #[test]
    fn error_field_omitted_on_success() {
        let value = serde_json::to_value(pending().seal(GENESIS_HASH)).unwrap();
        assert!(value.get("error").is_none());
    }

    #[test]
    fn roundtrip_preserves_hash_validity() {
        let entry = pending().seal(GENESIS_HASH);
        let line = serde_json::to_string(&entry).unwrap();
        let parsed: AuditEntry = serde_json::from_str(&line).unwrap();
        assert!(parsed.verify());
    }
}
