//! Per-release, per-action log files

use crate::error::PipelineError;
use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Appends timestamped lines to `logs/<release_id>/<action>.log`
///
/// Opening the file is a stage precondition. A later write failure does not
/// fail the stage; it is kept and surfaced as a warning.
#[derive(Debug)]
pub struct ActionLog {
    path: PathBuf,
    file: File,
    write_error: Option<String>,
}

impl ActionLog {
    /// Open (or create) the log in append mode
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be created
    pub async fn open(path: PathBuf) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(PipelineError::io("creating log directory"))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(PipelineError::io("opening action log"))?;
        Ok(Self {
            path,
            file,
            write_error: None,
        })
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line; multi-line messages are indented under the stamp
    pub async fn line(&mut self, message: &str) {
        if self.write_error.is_some() {
            return;
        }
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let body = message.trim_end().replace('\n', "\n    ");
        let entry = format!("[{stamp}] {body}\n");
        if let Err(e) = self.file.write_all(entry.as_bytes()).await {
            tracing::warn!(path = %self.path.display(), error = %e, "action log write failed");
            self.write_error = Some(e.to_string());
        }
    }

    /// Flush and return the warning to report, if any write failed
    pub async fn finish(mut self) -> Option<String> {
        if self.write_error.is_none() {
            if let Err(e) = self.file.flush().await {
                self.write_error = Some(e.to_string());
            }
        }
        self.write_error
            .map(|e| format!("action log {} is incomplete: {e}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/rel-1/repo.clone.log");

        let mut log = ActionLog::open(path.clone()).await.unwrap();
        log.line("cloning").await;
        log.line("done\nwith detail").await;
        assert!(log.finish().await.is_none());

        let mut log = ActionLog::open(path.clone()).await.unwrap();
        log.line("second run").await;
        assert!(log.finish().await.is_none());

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] cloning"));
        assert_eq!(lines[2], "    with detail");
        assert!(lines[3].ends_with("second run"));
    }
}
