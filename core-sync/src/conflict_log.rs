//! # Conflict Log
//!
//! Append-only NDJSON audit trail. Each conflict is one JSON object per line;
//! each run also appends a `{"kind":"summary", ...}` line.

use crate::error::{Result, SyncError};
use crate::reconcile::{Conflict, Resolution};
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub resolution: Resolution,
    pub local_modified_at: i64,
    pub remote_modified_at: i64,
}

impl ConflictRecord {
    pub fn from_conflict(conflict: &Conflict, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            path: conflict.path.clone(),
            resolution: conflict.resolution,
            local_modified_at: conflict.local_modified_at,
            remote_modified_at: conflict.remote_modified_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct SummaryLine<'a> {
    kind: &'static str,
    timestamp: DateTime<Utc>,
    uploaded: usize,
    downloaded: usize,
    failed: usize,
    message: &'a str,
}

pub struct ConflictLog {
    fs: Arc<dyn FileSystemAccess>,
    path: PathBuf,
}

impl ConflictLog {
    pub fn new(fs: Arc<dyn FileSystemAccess>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append_conflicts(&self, records: &[ConflictRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|e| SyncError::ConflictLog(e.to_string()))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        self.append(buf).await?;
        debug!(count = records.len(), "Appended conflict records");
        Ok(())
    }

    pub async fn append_summary(
        &self,
        timestamp: DateTime<Utc>,
        uploaded: usize,
        downloaded: usize,
        failed: usize,
    ) -> Result<()> {
        let message = format!(
            "SUMMARY: uploaded={} downloaded={} failed={}",
            uploaded, downloaded, failed
        );
        let line = serde_json::to_string(&SummaryLine {
            kind: "summary",
            timestamp,
            uploaded,
            downloaded,
            failed,
            message: &message,
        })
        .map_err(|e| SyncError::ConflictLog(e.to_string()))?;
        self.append(format!("{}\n", line)).await
    }

    /// Conflict entries in file order. Summary and malformed lines are skipped.
    pub async fn read_records(&self) -> Result<Vec<ConflictRecord>> {
        if !self.fs.exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let data = self.fs.read_file(&self.path).await?;
        let text = String::from_utf8_lossy(&data);

        let mut records = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value: serde_json::Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    warn!(line = index + 1, error = %e, "Skipping malformed log line");
                    continue;
                }
            };
            if value.get("kind").and_then(|k| k.as_str()) == Some("summary") {
                continue;
            }
            match serde_json::from_value::<ConflictRecord>(value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(line = index + 1, error = %e, "Skipping unrecognized log line"),
            }
        }
        Ok(records)
    }

    async fn append(&self, text: String) -> Result<()> {
        self.fs
            .append_file(&self.path, Bytes::from(text))
            .await
            .map_err(|e| SyncError::ConflictLog(e.to_string()))
    }
}

impl std::fmt::Debug for ConflictLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictLog").field("path", &self.path).finish()
    }
}
