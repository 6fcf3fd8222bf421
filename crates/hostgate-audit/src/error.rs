//! Error types for the audit trail

/// Audit trail errors
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Underlying file I/O failed
    #[error("audit I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Entry could not be serialized
    #[error("audit serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A line in the trail is not a valid entry
    #[error("malformed audit line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    /// Hash chain verification failed
    #[error("audit chain broken at entry {index}: {reason}")]
    ChainBroken { index: usize, reason: String },
}
