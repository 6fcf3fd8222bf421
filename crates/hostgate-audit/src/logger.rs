//! Audit logger and the instrumentation wrapper around handler calls
//!
//! Ordering is act-then-record: the handler runs to completion (or panics),
//! then exactly one entry is written. A failed write is reported to the
//! caller but cannot undo what the handler already did.

use crate::entry::{AuditEntry, AuditOutcome, PendingAuditEntry};
use crate::error::AuditError;
use crate::redact::Redactor;
use crate::sink::AuditSink;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use hostgate_guard::Role;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Classifies a handler result for the trail
pub trait Auditable {
    /// `Err(message)` when the invocation should be recorded as failed
    fn audit_outcome(&self) -> Result<(), String>;
}

impl<T, E: Display> Auditable for Result<T, E> {
    fn audit_outcome(&self) -> Result<(), String> {
        match self {
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Identity of one invocation
#[derive(Debug, Clone, Copy)]
pub struct AuditedCall<'a> {
    pub request_id: Uuid,
    pub capability: &'a str,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    /// Raw arguments; redacted before persisting
    pub arguments: &'a serde_json::Value,
}

/// Handler panicked instead of returning
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("handler panicked: {0}")]
pub struct HandlerPanic(pub String);

/// Result of an audited call
#[derive(Debug)]
pub struct Audited<T> {
    /// What the handler produced
    pub outcome: Result<T, HandlerPanic>,
    /// What the audit write produced
    pub audit: Result<AuditEntry, AuditError>,
}

/// Writes one record per invocation to a sink
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    redactor: Redactor,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("redactor", &self.redactor)
            .finish_non_exhaustive()
    }
}

impl AuditLogger {
    /// Create logger with the default allow-list
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            redactor: Redactor::default(),
        }
    }

    /// Replace the redactor
    #[must_use]
    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    #[inline]
    #[must_use]
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Append one record
    ///
    /// # Errors
    /// Returns the sink's error; it is also logged here
    pub async fn record(&self, entry: PendingAuditEntry) -> Result<AuditEntry, AuditError> {
        let request_id = entry.request_id;
        let capability = entry.capability.clone();
        self.sink.append(entry).await.map_err(|e| {
            tracing::error!(%request_id, %capability, error = %e, "audit record could not be written");
            e
        })
    }

    /// Run `fut`, then record its outcome exactly once
    ///
    /// Panics inside `fut` are caught, recorded as errors and returned as
    /// [`HandlerPanic`].
    pub async fn audited<F, T>(&self, call: AuditedCall<'_>, fut: F) -> Audited<T>
    where
        F: Future<Output = T>,
        T: Auditable,
    {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(fut)
            .catch_unwind()
            .await
            .map_err(|payload| HandlerPanic(panic_message(payload.as_ref())));
        let duration = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (result, error) = match &outcome {
            Ok(value) => match value.audit_outcome() {
                Ok(()) => (AuditOutcome::Success, None),
                Err(message) => (AuditOutcome::Error, Some(message)),
            },
            Err(panic) => (AuditOutcome::Error, Some(panic.to_string())),
        };

        let entry = PendingAuditEntry {
            timestamp: call.timestamp,
            request_id: call.request_id,
            capability: call.capability.to_string(),
            role: call.role,
            arguments: self.redactor.redact_arguments(call.arguments),
            result,
            error,
            duration,
        };

        let audit = self.record(entry).await;
        Audited { outcome, audit }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redact::REDACTED;
    use crate::sink::MemoryAuditSink;
    use async_trait::async_trait;
    use serde_json::json;

    fn call<'a>(args: &'a serde_json::Value) -> AuditedCall<'a> {
        AuditedCall {
            request_id: Uuid::new_v4(),
            capability: "db.query",
            role: Role::Builder,
            timestamp: Utc::now(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn records_success() {
        let sink = Arc::new(MemoryAuditSink::new());
        let logger = AuditLogger::new(sink.clone());
        let args = json!({"app_slug": "demo", "sql": "select 1"});

        let audited = logger
            .audited(call(&args), async { Ok::<_, String>(42) })
            .await;

        assert_eq!(audited.outcome.unwrap().unwrap(), 42);
        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_success());
        assert_eq!(entries[0].body.arguments["sql"], REDACTED);
        assert_eq!(entries[0].body.arguments["app_slug"], "demo");
    }

    #[tokio::test]
    async fn records_handler_error() {
        let sink = Arc::new(MemoryAuditSink::new());
        let logger = AuditLogger::new(sink.clone());
        let args = json!({});

        let audited = logger
            .audited(call(&args), async { Err::<(), _>("driver failed") })
            .await;

        assert!(audited.outcome.unwrap().is_err());
        let entry = &sink.entries()[0];
        assert_eq!(entry.body.result, AuditOutcome::Error);
        assert_eq!(entry.body.error.as_deref(), Some("driver failed"));
    }

    #[tokio::test]
    async fn records_panicking_handler() {
        let sink = Arc::new(MemoryAuditSink::new());
        let logger = AuditLogger::new(sink.clone());
        let args = json!({});

        let audited = logger
            .audited(call(&args), async {
                if args.is_object() {
                    panic!("boom");
                }
                Ok::<(), String>(())
            })
            .await;

        assert_eq!(audited.outcome.unwrap_err(), HandlerPanic("boom".to_string()));
        assert!(audited.audit.is_ok());
        let entry = &sink.entries()[0];
        assert_eq!(entry.body.result, AuditOutcome::Error);
        assert!(entry.body.error.as_deref().unwrap().contains("boom"));
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn append(&self, _entry: PendingAuditEntry) -> Result<AuditEntry, AuditError> {
            Err(AuditError::Io(std::io::Error::other("disk full")))
        }

        async fn entry_count(&self) -> Result<u64, AuditError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn sink_failure_does_not_hide_handler_result() {
        let logger = AuditLogger::new(Arc::new(FailingSink));
        let args = json!({});

        let audited = logger
            .audited(call(&args), async { Ok::<_, String>("done") })
            .await;

        assert_eq!(audited.outcome.unwrap().unwrap(), "done");
        assert!(matches!(audited.audit, Err(AuditError::Io(_))));
    }
}
