//! Restore the most recent update backup.
//!
//! The artifact being replaced is snapshotted first under the
//! `pre_rollback_` prefix, so a bad rollback can itself be undone by hand.
//! Only `model_backup_` entries are rollback targets; repeated rollbacks
//! restore the same backup until a new update creates a newer one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use super::artifact::{current_digest, ArtifactDigest, INITIAL_HASH};
use super::backup::{BackupError, BackupKind};
use super::orchestrator::{run_blocking, UpdateOrchestrator};
use super::store::RecordStatus;
use super::swap::{replace_atomically, SwapError};
use crate::telemetry;

#[derive(Error, Debug)]
pub enum RollbackError {
    #[error("No backups available")]
    NoBackups,

    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),

    #[error("Swap error: {0}")]
    Swap(#[from] SwapError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a successful rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub restored_from: String,
    pub pre_rollback_backup: Option<String>,
    pub old_hash: String,
    pub new_hash: String,
}

impl UpdateOrchestrator {
    /// Replace the active artifact with the newest update backup.
    pub async fn rollback(&mut self) -> Result<RollbackOutcome, RollbackError> {
        let result = self.try_rollback().await;
        match &result {
            Ok(outcome) => {
                info!(restored_from = %outcome.restored_from, new_hash = %outcome.new_hash, "rollback complete");
                telemetry::record_rollback();
            }
            Err(e) => error!(error = %e, "rollback failed"),
        }
        result
    }

    async fn try_rollback(&mut self) -> Result<RollbackOutcome, RollbackError> {
        let target = self
            .backups
            .latest(BackupKind::Update)?
            .ok_or(RollbackError::NoBackups)?;

        let model_path = self.config.model_path.clone();
        let path = model_path.clone();
        let old_hash = run_blocking(move || current_digest(&path))
            .await?
            .map(|d| d.to_string())
            .unwrap_or_else(|| INITIAL_HASH.to_string());

        let pre_rollback_backup = if model_path.is_file() {
            let backups = self.backups.clone();
            let path = model_path.clone();
            let info = run_blocking(move || backups.snapshot_pre_rollback(&path)).await?;
            Some(info.file_name)
        } else {
            None
        };

        let (source, path) = (target.path.clone(), model_path.clone());
        let new_digest = run_blocking(move || -> Result<ArtifactDigest, RollbackError> {
            replace_atomically(&source, &path)?;
            Ok(ArtifactDigest::of_file(&path)?)
        })
        .await?;
        let new_hash = new_digest.to_string();
        self.remember_active(new_digest);

        let performance = self.evaluator.evaluate(&model_path);
        self.store.set_performance(performance);

        let mut extra = Map::new();
        extra.insert("backup".into(), Value::from(target.file_name.clone()));
        if let Some(name) = &pre_rollback_backup {
            extra.insert("pre_rollback".into(), Value::from(name.clone()));
        }
        if let Err(e) = self.store.append(RecordStatus::Rollback, old_hash.clone(), new_hash.clone(), extra) {
            warn!(error = %e, "failed to persist rollback record");
        }

        self.apply_retention();

        Ok(RollbackOutcome {
            restored_from: target.file_name,
            pre_rollback_backup,
            old_hash,
            new_hash,
        })
    }
}
