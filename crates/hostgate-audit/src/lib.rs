//! hostgate Audit
//!
//! The append-only record of who invoked what, when, and with what outcome.
//!
//! # Core Concepts
//!
//! - [`AuditEntry`]: one JSON line, linked to its predecessor by SHA-256
//! - [`AuditSink`]: where entries go ([`FileAuditSink`], [`MemoryAuditSink`])
//! - [`AuditLogger::audited`]: wraps a handler call and records exactly once,
//!   including when the handler panics
//! - [`Redactor`]: default-deny filtering of argument snapshots
//!
//! # Example
//!
//! ```rust,ignore
//! let sink = Arc::new(FileAuditSink::open("/var/lib/hostgate/audit.log").await?);
//! let logger = AuditLogger::new(sink);
//! let audited = logger.audited(call, handler(args)).await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod entry;
mod error;
mod logger;
mod redact;
mod sink;

pub use entry::{AuditEntry, AuditOutcome, PendingAuditEntry, GENESIS_HASH};
pub use error::AuditError;
pub use logger::{Auditable, Audited, AuditLogger, AuditedCall, HandlerPanic};
pub use redact::{
    is_secret_like, mask_secret_keys, strip_url_credentials, Redactor, DEFAULT_SAFE_FIELDS,
    REDACTED,
};
pub use sink::{AuditSink, FileAuditSink, MemoryAuditSink};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
