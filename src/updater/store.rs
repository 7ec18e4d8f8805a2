//! Persistent update history and model performance.
//!
//! The whole document is rewritten on every append through a temp file and
//! rename, so a crash mid-write leaves the previous version intact.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome recorded for one update or rollback attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Failed,
    Rollback,
}

/// One audit-log entry. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub timestamp: DateTime<Utc>,
    pub status: RecordStatus,
    pub old_hash: String,
    pub new_hash: String,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// Latest evaluation of the active model.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub accuracy: f64,
    pub recall: f64,
    pub f1_score: f64,
}

/// On-disk layout of the metrics file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsFile {
    #[serde(default)]
    pub total_updates: u64,
    #[serde(default)]
    pub failed_updates: u64,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updates: Vec<MetricsRecord>,
    #[serde(default)]
    pub model_performance: PerformanceSnapshot,
}

/// Counters without the full history, for status payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_updates: u64,
    pub failed_updates: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub history_len: usize,
    pub model_performance: PerformanceSnapshot,
}

/// JSON-file backed metrics store.
pub struct MetricsStore {
    path: PathBuf,
    data: MetricsFile,
}

impl MetricsStore {
    /// Open the store at `path`, starting empty if the file is missing or corrupt.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match Self::load(&path) {
            Ok(Some(data)) => data,
            Ok(None) => MetricsFile::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "metrics file unreadable, starting fresh");
                MetricsFile::default()
            }
        };
        Self { path, data }
    }

    /// Read the metrics file. `Ok(None)` if it does not exist.
    pub fn load(path: &Path) -> Result<Option<MetricsFile>, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &MetricsFile {
        &self.data
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_updates: self.data.total_updates,
            failed_updates: self.data.failed_updates,
            last_update: self.data.last_update,
            history_len: self.data.updates.len(),
            model_performance: self.data.model_performance,
        }
    }

    /// Most recent `limit` records in chronological order (all if `None`).
    pub fn history(&self, limit: Option<usize>) -> Vec<MetricsRecord> {
        let updates = &self.data.updates;
        let skip = limit.map_or(0, |n| updates.len().saturating_sub(n));
        updates[skip..].to_vec()
    }

    pub fn last_record(&self) -> Option<&MetricsRecord> {
        self.data.updates.last()
    }

    /// Replace the performance snapshot. Persisted with the next append.
    pub fn set_performance(&mut self, performance: PerformanceSnapshot) {
        self.data.model_performance = performance;
    }

    /// Append a record, update the counters and persist the whole document.
    ///
    /// The record stays in memory even when persisting fails.
    pub fn append(
        &mut self,
        status: RecordStatus,
        old_hash: impl Into<String>,
        new_hash: impl Into<String>,
        extra: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        match status {
            RecordStatus::Success => {
                self.data.total_updates += 1;
                self.data.last_update = Some(now);
            }
            RecordStatus::Failed => self.data.failed_updates += 1,
            RecordStatus::Rollback => self.data.last_update = Some(now),
        }
        self.data.updates.push(MetricsRecord {
            timestamp: now,
            status,
            old_hash: old_hash.into(),
            new_hash: new_hash.into(),
            extra,
        });

        self.persist()
    }

    /// Write the document atomically.
    pub fn persist(&self) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut staged = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut staged, &self.data)?;
        staged.as_file().sync_all()?;
        staged.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        debug!(path = %self.path.display(), records = self.data.updates.len(), "metrics persisted");
        Ok(())
    }
}
