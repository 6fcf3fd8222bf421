//! Audit sinks for storing audit entries

use crate::entry::{AuditEntry, PendingAuditEntry, GENESIS_HASH};
use crate::error::AuditError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Destination of the audit trail
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Link and persist one entry
    async fn append(&self, entry: PendingAuditEntry) -> Result<AuditEntry, AuditError>;

    /// Number of entries in the trail
    async fn entry_count(&self) -> Result<u64, AuditError>;
}

/// In-memory audit sink for testing
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    inner: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    /// Create a new memory sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all entries
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().clone()
    }

    /// Check the chain of all stored entries
    ///
    /// # Errors
    /// Returns [`AuditError::ChainBroken`] at the first bad link
    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        verify_chain(self.inner.lock().iter())
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, pending: PendingAuditEntry) -> Result<AuditEntry, AuditError> {
        let mut guard = self.inner.lock();
        let prev = guard.last().map_or(GENESIS_HASH, |e| e.hash.as_str()).to_string();
        let entry = pending.seal(&prev);
        guard.push(entry.clone());
        Ok(entry)
    }

    async fn entry_count(&self) -> Result<u64, AuditError> {
        Ok(self.inner.lock().len() as u64)
    }
}

struct FileState {
    file: File,
    head: String,
    count: u64,
}

/// Append-only JSON-lines audit file
///
/// Hashing and writing happen under one lock so the line order on disk is
/// the chain order.
pub struct FileAuditSink {
    path: PathBuf,
    state: tokio::sync::Mutex<FileState>,
}

impl FileAuditSink {
    /// Open (or create) the trail and recover the chain head
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or its last line is
    /// not a valid entry
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (head, count) = if tokio::fs::try_exists(&path).await? {
            let entries = read_entries(&path).await?;
            let head = entries
                .last()
                .map_or_else(|| GENESIS_HASH.to_string(), |e| e.hash.clone());
            (head, entries.len() as u64)
        } else {
            (GENESIS_HASH.to_string(), 0)
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        tracing::debug!(path = %path.display(), entries = count, "audit trail opened");
        Ok(Self {
            path,
            state: tokio::sync::Mutex::new(FileState { file, head, count }),
        })
    }

    /// Get the file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all entries from file
    ///
    /// # Errors
    /// Returns an error on I/O failure or a malformed line
    pub async fn read_all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        read_entries(&self.path).await
    }

    /// Re-read the trail and check every link
    ///
    /// # Errors
    /// Returns [`AuditError::ChainBroken`] at the first bad link
    pub async fn verify(&self) -> Result<u64, AuditError> {
        let entries = self.read_all().await?;
        verify_chain(entries.iter())?;
        Ok(entries.len() as u64)
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn append(&self, pending: PendingAuditEntry) -> Result<AuditEntry, AuditError> {
        let mut state = self.state.lock().await;
        let entry = pending.seal(&state.head);
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        state.file.write_all(&line).await?;
        state.file.flush().await?;
        state.file.sync_data().await?;

        state.head.clone_from(&entry.hash);
        state.count += 1;
        Ok(entry)
    }

    async fn entry_count(&self) -> Result<u64, AuditError> {
        Ok(self.state.lock().await.count)
    }
}

async fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, AuditError> {
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut entries = Vec::new();
    let mut number = 0usize;

    while let Some(line) = lines.next_line().await? {
        number += 1;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry =
            serde_json::from_str(&line).map_err(|e| AuditError::Malformed {
                line: number,
                reason: e.to_string(),
            })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn verify_chain<'a>(entries: impl Iterator<Item = &'a AuditEntry>) -> Result<(), AuditError> {
    let mut prev = GENESIS_HASH.to_string();
    for (index, entry) in entries.enumerate() {
        if entry.prev_hash != prev {
            return Err(AuditError::ChainBroken {
                index,
                reason: "previous hash mismatch".to_string(),
            });
        }
        if !entry.verify() {
            return Err(AuditError::ChainBroken {
                index,
                reason: "entry hash mismatch".to_string(),
            });
        }
        prev.clone_from(&entry.hash);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditOutcome;
    use chrono::Utc;
    use hostgate_guard::Role;
    use serde_json::json;
    use uuid::Uuid;

    fn pending(capability: &str) -> PendingAuditEntry {
        PendingAuditEntry {
            timestamp: Utc::now(),
            request_id: Uuid::new_v4(),
            capability: capability.to_string(),
            role: Role::Operator,
            arguments: json!({}),
            result: AuditOutcome::Success,
            error: None,
            duration: 1,
        }
    }

    #[tokio::test]
    async fn memory_sink_links_entries() {
        let sink = MemoryAuditSink::new();
        let a = sink.append(pending("apps.start")).await.unwrap();
        let b = sink.append(pending("apps.stop")).await.unwrap();

        assert_eq!(a.prev_hash, GENESIS_HASH);
        assert_eq!(b.prev_hash, a.hash);
        assert_eq!(sink.entry_count().await.unwrap(), 2);
        assert!(sink.verify_integrity().is_ok());
    }

    #[tokio::test]
    async fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit/audit.log");
        let sink = FileAuditSink::open(&path).await.unwrap();

        sink.append(pending("apps.start")).await.unwrap();
        sink.append(pending("apps.stop")).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert_eq!(sink.verify().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn file_sink_resumes_chain_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");

        let first = {
            let sink = FileAuditSink::open(&path).await.unwrap();
            sink.append(pending("apps.init")).await.unwrap()
        };

        let sink = FileAuditSink::open(&path).await.unwrap();
        assert_eq!(sink.entry_count().await.unwrap(), 1);
        let second = sink.append(pending("apps.start")).await.unwrap();
        assert_eq!(second.prev_hash, first.hash);
        assert_eq!(sink.verify().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn verify_detects_edited_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = FileAuditSink::open(&path).await.unwrap();
        sink.append(pending("db.drop")).await.unwrap();
        sink.append(pending("apps.stop")).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, raw.replacen("db.drop", "db.tables", 1)).unwrap();

        let err = sink.verify().await.unwrap_err();
        assert!(matches!(err, AuditError::ChainBroken { index: 0, .. }));
    }

    #[tokio::test]
    async fn verify_detects_deleted_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = FileAuditSink::open(&path).await.unwrap();
        for cap in ["apps.init", "apps.start", "apps.stop"] {
            sink.append(pending(cap)).await.unwrap();
        }

        let raw = std::fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = raw.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        std::fs::write(&path, kept.join("\n") + "\n").unwrap();

        let err = sink.verify().await.unwrap_err();
        assert!(matches!(err, AuditError::ChainBroken { index: 1, .. }));
    }
}
