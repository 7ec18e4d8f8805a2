//! Timestamped artifact backups with a retention cap.
//!
//! Backups live in a single directory and are recognised purely by file name:
//! `model_backup_<YYYYMMDD_HHMMSS>.<ext>` before an update swap and
//! `pre_rollback_<YYYYMMDD_HHMMSS>.<ext>` before a rollback replaces the
//! active artifact. Anything else in the directory is ignored.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// File name prefix of backups taken before an update swap.
pub const BACKUP_PREFIX: &str = "model_backup_";

/// File name prefix of snapshots taken before a rollback.
pub const PRE_ROLLBACK_PREFIX: &str = "pre_rollback_";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const STAMP_LEN: usize = 15;
const DEFAULT_EXTENSION: &str = "bin";

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Active artifact not found: {0}")]
    ArtifactMissing(PathBuf),

    #[error("Backup directory unusable: {path}: {source}")]
    Directory { path: PathBuf, source: io::Error },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Why a backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Update,
    PreRollback,
}

impl BackupKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            BackupKind::Update => BACKUP_PREFIX,
            BackupKind::PreRollback => PRE_ROLLBACK_PREFIX,
        }
    }

    /// Classify a directory entry by name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.starts_with(BACKUP_PREFIX) {
            Some(BackupKind::Update)
        } else if name.starts_with(PRE_ROLLBACK_PREFIX) {
            Some(BackupKind::PreRollback)
        } else {
            None
        }
    }
}

/// A backup file on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    pub file_name: String,
    pub path: PathBuf,
    pub kind: BackupKind,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

impl BackupInfo {
    fn from_path(path: PathBuf) -> io::Result<Option<Self>> {
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => return Ok(None),
        };
        let kind = match BackupKind::from_file_name(&file_name) {
            Some(kind) => kind,
            None => return Ok(None),
        };
        let metadata = std::fs::metadata(&path)?;
        if !metadata.is_file() {
            return Ok(None);
        }
        Ok(Some(Self {
            file_name,
            path,
            kind,
            size_bytes: metadata.len(),
            modified: DateTime::<Utc>::from(metadata.modified()?),
        }))
    }

    /// Name-derived ordering key: timestamp, same-second counter, full name.
    ///
    /// Names that do not follow the stamp layout sort by their whole stem.
    fn name_order(&self) -> (&str, u32, &str) {
        let stem = self
            .file_name
            .strip_prefix(self.kind.prefix())
            .unwrap_or(&self.file_name);
        let stem = stem.rsplit_once('.').map_or(stem, |(base, _)| base);
        let (stamp, rest) = match (stem.get(..STAMP_LEN), stem.get(STAMP_LEN..)) {
            (Some(stamp), Some(rest)) => (stamp, rest),
            _ => return (stem, 0, &self.file_name),
        };
        let counter = match rest {
            "" => 0,
            _ => match rest.strip_prefix('_').and_then(|n| n.parse().ok()) {
                Some(n) => n,
                None => return (stem, 0, &self.file_name),
            },
        };
        (stamp, counter, &self.file_name)
    }
}

/// Creates, lists and prunes artifact backups.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_dir: PathBuf,
    extension: String,
}

impl BackupManager {
    /// Backups reuse the extension of `artifact_path` (`bin` if it has none).
    pub fn new(backup_dir: impl Into<PathBuf>, artifact_path: &Path) -> Self {
        let extension = artifact_path
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_EXTENSION)
            .to_string();
        Self {
            backup_dir: backup_dir.into(),
            extension,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Copy the active artifact into the backup directory.
    pub fn create(&self, active: &Path, kind: BackupKind) -> Result<BackupInfo, BackupError> {
        if !active.is_file() {
            return Err(BackupError::ArtifactMissing(active.to_path_buf()));
        }
        std::fs::create_dir_all(&self.backup_dir).map_err(|source| BackupError::Directory {
            path: self.backup_dir.clone(),
            source,
        })?;

        let target = self.next_path(kind);
        std::fs::copy(active, &target)?;

        let info = BackupInfo::from_path(target.clone())?
            .ok_or_else(|| BackupError::Io(io::Error::new(io::ErrorKind::Other, "backup vanished")))?;
        info!(backup = %info.file_name, kind = ?kind, size = info.size_bytes, "artifact backed up");
        Ok(info)
    }

    /// Back up the active artifact before an update. Failures are logged.
    pub fn backup(&self, active: &Path) -> bool {
        match self.create(active, BackupKind::Update) {
            Ok(_) => true,
            Err(e) => {
                error!(artifact = %active.display(), error = %e, "backup failed");
                false
            }
        }
    }

    /// Snapshot the active artifact before a rollback replaces it.
    pub fn snapshot_pre_rollback(&self, active: &Path) -> Result<BackupInfo, BackupError> {
        self.create(active, BackupKind::PreRollback)
    }

    /// All backups, newest first.
    pub fn list(&self) -> Result<Vec<BackupInfo>, BackupError> {
        let entries = match std::fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(info) = BackupInfo::from_path(entry.path())? {
                backups.push(info);
            }
        }
        backups.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.name_order().cmp(&a.name_order()))
        });
        Ok(backups)
    }

    /// Most recent backup of the given kind.
    pub fn latest(&self, kind: BackupKind) -> Result<Option<BackupInfo>, BackupError> {
        Ok(self.list()?.into_iter().find(|b| b.kind == kind))
    }

    /// Delete every backup beyond the `max_backups` most recently modified.
    ///
    /// The newest update backup is always among those kept (unless
    /// `max_backups` is zero), displacing the oldest survivor if needed, so
    /// pre-rollback snapshots can never push out the last rollback target.
    /// Returns the removed entries. Safe to call repeatedly.
    pub fn cleanup(&self, max_backups: usize) -> Result<Vec<BackupInfo>, BackupError> {
        let mut backups = self.list()?;
        if backups.len() <= max_backups {
            return Ok(Vec::new());
        }
        if max_backups > 0 {
            let newest_update = backups.iter().position(|b| b.kind == BackupKind::Update);
            if let Some(pos) = newest_update.filter(|&pos| pos >= max_backups) {
                let keep = backups.remove(pos);
                backups.insert(max_backups - 1, keep);
            }
        }

        let mut removed = Vec::with_capacity(backups.len() - max_backups);
        for stale in backups.into_iter().skip(max_backups) {
            match std::fs::remove_file(&stale.path) {
                Ok(()) => {
                    debug!(backup = %stale.file_name, "old backup removed");
                    removed.push(stale);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(backup = %stale.file_name, error = %e, "failed to remove old backup");
                    return Err(e.into());
                }
            }
        }
        info!(removed = removed.len(), retained = max_backups, "backup retention applied");
        Ok(removed)
    }

    fn next_path(&self, kind: BackupKind) -> PathBuf {
        let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let base = format!("{}{}", kind.prefix(), stamp);
        let mut candidate = self.backup_dir.join(format!("{}.{}", base, self.extension));
        let mut n = 1u32;
        while candidate.exists() {
            candidate = self.backup_dir.join(format!("{}_{}.{}", base, n, self.extension));
            n += 1;
        }
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_file_name() {
        assert_eq!(
            BackupKind::from_file_name("model_backup_20260101_000000.pkl"),
            Some(BackupKind::Update)
        );
        assert_eq!(
            BackupKind::from_file_name("pre_rollback_20260101_000000.pkl"),
            Some(BackupKind::PreRollback)
        );
        assert_eq!(BackupKind::from_file_name("model.pkl"), None);
        assert_eq!(BackupKind::from_file_name(".updater.lock"), None);
    }

    #[test]
    fn test_extension_follows_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("wifi_model.pkl");
        std::fs::write(&active, b"weights").unwrap();

        let manager = BackupManager::new(dir.path().join("backups"), &active);
        let info = manager.create(&active, BackupKind::Update).unwrap();
        assert!(info.file_name.starts_with(BACKUP_PREFIX));
        assert!(info.file_name.ends_with(".pkl"));
    }

    #[test]
    fn test_extension_defaults_to_bin() {
        let manager = BackupManager::new("backups", Path::new("model"));
        assert_eq!(manager.extension, "bin");
    }

    #[test]
    fn test_same_second_backups_get_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("model.bin");
        std::fs::write(&active, b"weights").unwrap();

        let manager = BackupManager::new(dir.path().join("backups"), &active);
        let a = manager.create(&active, BackupKind::Update).unwrap();
        let b = manager.create(&active, BackupKind::Update).unwrap();
        assert_ne!(a.file_name, b.file_name);
        assert_eq!(manager.list().unwrap().len(), 2);
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path().join("never-created"), Path::new("m.bin"));
        assert!(manager.list().unwrap().is_empty());
        assert!(manager.cleanup(5).unwrap().is_empty());
    }

    fn info(name: &str) -> BackupInfo {
        BackupInfo {
            file_name: name.to_string(),
            path: PathBuf::from(name),
            kind: BackupKind::from_file_name(name).unwrap(),
            size_bytes: 0,
            modified: Utc::now(),
        }
    }

    #[test]
    fn test_name_order_compares_counter_numerically() {
        let base = info("model_backup_20260101_120000.pkl");
        let ninth = info("model_backup_20260101_120000_9.pkl");
        let tenth = info("model_backup_20260101_120000_10.pkl");
        assert_eq!(base.name_order().1, 0);
        assert_eq!(ninth.name_order(), ("20260101_120000", 9, "model_backup_20260101_120000_9.pkl"));
        assert!(base.name_order() < ninth.name_order());
        assert!(ninth.name_order() < tenth.name_order());

        let later = info("pre_rollback_20260101_120001.pkl");
        assert!(tenth.name_order() < later.name_order());
    }

    #[test]
    fn test_name_order_tolerates_foreign_names() {
        let odd = info("model_backup_manual.pkl");
        assert_eq!(odd.name_order(), ("manual", 0, "model_backup_manual.pkl"));
        let junk = info("model_backup_20260101_120000_x.pkl");
        assert_eq!(junk.name_order().1, 0);
    }

    #[test]
    fn test_unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("model_backup_20260101_000000.bin"), b"x").unwrap();
        let manager = BackupManager::new(dir.path(), Path::new("m.bin"));
        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, BackupKind::Update);
    }
}
