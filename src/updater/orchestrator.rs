//! The fetch → verify → compare → backup → swap → evaluate cycle.
//!
//! An orchestrator owns the active artifact, the backup directory and the
//! metrics store. It is driven by the update service task, which guarantees
//! that only one cycle or rollback touches the filesystem at a time.

use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::artifact::{current_digest, ArtifactDigest, ArtifactInfo, INITIAL_HASH};
use super::backup::{BackupInfo, BackupKind, BackupManager};
use super::evaluate::{ArtifactEvaluator, SimulatedEvaluator};
use super::integrity::{ArtifactVerifier, IntegrityChecker};
use super::source::{ArtifactSource, Candidate, SyntheticSource};
use super::store::{MetricsRecord, MetricsStore, MetricsSummary, RecordStatus};
use super::swap::replace_atomically;
use crate::telemetry;

/// Hash recorded for a candidate whose digest could not be computed.
const UNKNOWN_HASH: &str = "unknown";

/// What to do when the pre-swap backup cannot be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupFailurePolicy {
    /// Abandon the cycle and record a failed update.
    #[default]
    Abort,
    /// Swap anyway. The replaced artifact cannot be rolled back to.
    Proceed,
}

impl FromStr for BackupFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "proceed" => Ok(Self::Proceed),
            other => Err(format!("unknown backup failure policy: {}", other)),
        }
    }
}

/// Position in the update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStage {
    Idle,
    Fetching,
    Verifying,
    ComparingHash,
    BackingUp,
    Swapping,
    Evaluating,
}

/// Who asked for the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleTrigger {
    Scheduled,
    Forced,
}

impl CycleTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            CycleTrigger::Scheduled => "scheduled",
            CycleTrigger::Forced => "forced",
        }
    }
}

/// Terminal result of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The candidate is now the active artifact.
    Updated {
        old_hash: String,
        new_hash: String,
        backup: Option<String>,
    },
    /// Candidate identical to the active artifact; nothing changed.
    Unchanged { hash: String },
    /// No candidate could be obtained.
    FetchFailed { reason: String },
    /// Candidate failed integrity checks.
    Rejected { reason: String },
    /// Backup, swap or I/O failure.
    Failed { reason: String },
}

impl CycleOutcome {
    /// The active artifact was replaced.
    pub fn changed(&self) -> bool {
        matches!(self, CycleOutcome::Updated { .. })
    }

    /// The cycle ended without error (an identical candidate counts).
    pub fn is_ok(&self) -> bool {
        matches!(self, CycleOutcome::Updated { .. } | CycleOutcome::Unchanged { .. })
    }

    /// Errors the poll loop should back off from.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, CycleOutcome::Failed { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            CycleOutcome::Updated { new_hash, .. } => format!("model updated to {}", new_hash),
            CycleOutcome::Unchanged { .. } => "model already up to date".to_string(),
            CycleOutcome::FetchFailed { reason } => format!("no candidate available: {}", reason),
            CycleOutcome::Rejected { reason } => format!("candidate rejected: {}", reason),
            CycleOutcome::Failed { reason } => format!("update failed: {}", reason),
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model_path: PathBuf,
    pub staging_dir: PathBuf,
    pub max_backups: usize,
    /// Forced cycles also skip candidates identical to the active artifact.
    pub force_skips_identical: bool,
    pub backup_failure_policy: BackupFailurePolicy,
}

impl OrchestratorConfig {
    pub fn new(model_path: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            staging_dir: staging_dir.into(),
            max_backups: 5,
            force_skips_identical: true,
            backup_failure_policy: BackupFailurePolicy::Abort,
        }
    }
}

/// Point-in-time view of the updater.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub running: bool,
    pub last_update_time: Option<chrono::DateTime<chrono::Utc>>,
    pub metrics: MetricsSummary,
    pub available_backups: Vec<BackupInfo>,
    pub artifact: Option<ArtifactInfo>,
}

/// Drives update cycles against one artifact path.
pub struct UpdateOrchestrator {
    pub(super) config: OrchestratorConfig,
    source: Arc<dyn ArtifactSource>,
    verifier: Arc<dyn ArtifactVerifier>,
    pub(super) evaluator: Arc<dyn ArtifactEvaluator>,
    pub(super) backups: BackupManager,
    pub(super) store: MetricsStore,
    stage: UpdateStage,
    active: Option<ArtifactInfo>,
}

impl UpdateOrchestrator {
    /// Build with the synthetic source, a 1-byte integrity floor and the
    /// simulated evaluator. Replace them with the `with_*` builders.
    pub fn new(config: OrchestratorConfig, backups: BackupManager, store: MetricsStore) -> Self {
        Self {
            config,
            source: Arc::new(SyntheticSource::new(4096)),
            verifier: Arc::new(IntegrityChecker::new(1)),
            evaluator: Arc::new(SimulatedEvaluator::default()),
            backups,
            store,
            stage: UpdateStage::Idle,
            active: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn ArtifactVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ArtifactEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn model_path(&self) -> &Path {
        &self.config.model_path
    }

    pub fn stage(&self) -> UpdateStage {
        self.stage
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn history(&self, limit: Option<usize>) -> Vec<MetricsRecord> {
        self.store.history(limit)
    }

    /// Rebuild the status view from disk and the metrics store.
    ///
    /// Reads metadata only; the digest comes from the last time this
    /// orchestrator hashed the active artifact.
    pub fn status(&self, running: bool) -> Status {
        let available_backups = self.backups.list().unwrap_or_else(|e| {
            warn!(error = %e, "failed to list backups");
            Vec::new()
        });
        let artifact = ArtifactInfo::stat(&self.config.model_path, self.active.as_ref()).unwrap_or_else(|e| {
            warn!(error = %e, "failed to inspect active artifact");
            None
        });
        let metrics = self.store.summary();
        Status {
            running,
            last_update_time: metrics.last_update,
            metrics,
            available_backups,
            artifact,
        }
    }

    /// Hash the active artifact on the blocking pool and remember the result.
    pub async fn refresh_active(&mut self) {
        let path = self.config.model_path.clone();
        self.active = match run_blocking(move || ArtifactInfo::inspect(&path)).await {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "failed to hash active artifact");
                None
            }
        };
    }

    /// Record `digest` as the content of the artifact now at the model path.
    pub(super) fn remember_active(&mut self, digest: ArtifactDigest) {
        self.active = match ArtifactInfo::stat(&self.config.model_path, None) {
            Ok(Some(mut info)) => {
                info.sha256 = Some(digest);
                Some(info)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "failed to stat active artifact");
                None
            }
        };
    }

    /// Run one full cycle. Never panics; every failure becomes an outcome.
    pub async fn run_cycle(&mut self, trigger: CycleTrigger) -> CycleOutcome {
        self.stage = UpdateStage::Fetching;
        let candidate = match self.source.fetch(&self.config.staging_dir).await {
            Ok(c) => c,
            Err(e) => {
                warn!(source = self.source.name(), error = %e, "candidate fetch failed");
                self.stage = UpdateStage::Idle;
                telemetry::record_cycle_skipped("fetch_failed");
                return CycleOutcome::FetchFailed { reason: e.to_string() };
            }
        };
        debug!(candidate = %candidate.path.display(), trigger = trigger.as_str(), "candidate fetched");

        let outcome = self.apply(&candidate, trigger).await;
        candidate.discard();
        self.stage = UpdateStage::Idle;

        match &outcome {
            CycleOutcome::Updated { old_hash, new_hash, .. } => {
                info!(old_hash = %old_hash, new_hash = %new_hash, trigger = trigger.as_str(), "model updated");
            }
            CycleOutcome::Unchanged { hash } => {
                info!(hash = %hash, "candidate identical to active model, skipped");
                telemetry::record_cycle_skipped("unchanged");
            }
            CycleOutcome::Rejected { reason } => {
                warn!(reason = %reason, "candidate rejected");
                telemetry::record_update_failure("rejected");
            }
            CycleOutcome::Failed { reason } => {
                error!(reason = %reason, "update cycle failed");
                telemetry::record_update_failure("failed");
            }
            CycleOutcome::FetchFailed { .. } => {}
        }
        outcome
    }

    async fn apply(&mut self, candidate: &Candidate, trigger: CycleTrigger) -> CycleOutcome {
        self.stage = UpdateStage::Verifying;
        let verifier = self.verifier.clone();
        let candidate_path = candidate.path.clone();
        let new_digest = match run_blocking(move || verifier.check(&candidate_path)).await {
            Ok(d) => d,
            Err(e) => {
                let old_hash = self.active_hash_label().await;
                let candidate_path = candidate.path.clone();
                let new_hash = run_blocking(move || ArtifactDigest::of_file(&candidate_path))
                    .await
                    .map(|d| d.to_string())
                    .unwrap_or_else(|_| UNKNOWN_HASH.to_string());
                let reason = e.to_string();
                self.record_failure(&old_hash, &new_hash, trigger, "verification", &reason);
                return CycleOutcome::Rejected { reason };
            }
        };
        let new_hash = new_digest.to_string();

        self.stage = UpdateStage::ComparingHash;
        let model_path = self.config.model_path.clone();
        let active = match self.cached_digest() {
            Some(digest) => Ok(Some(digest)),
            None => run_blocking(move || current_digest(&model_path)).await,
        };
        let active = match active {
            Ok(d) => d,
            Err(e) => {
                let reason = format!("cannot hash active artifact: {}", e);
                self.record_failure(UNKNOWN_HASH, &new_hash, trigger, "compare", &reason);
                return CycleOutcome::Failed { reason };
            }
        };
        let skip_identical = trigger == CycleTrigger::Scheduled || self.config.force_skips_identical;
        if let Some(digest) = &active {
            self.remember_active(digest.clone());
        }
        if skip_identical && active.as_ref() == Some(&new_digest) {
            return CycleOutcome::Unchanged { hash: new_hash };
        }
        let old_hash = active
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_else(|| INITIAL_HASH.to_string());

        self.stage = UpdateStage::BackingUp;
        let mut backup = None;
        if active.is_some() {
            let backups = self.backups.clone();
            let model_path = self.config.model_path.clone();
            match run_blocking(move || backups.create(&model_path, BackupKind::Update)).await {
                Ok(info) => {
                    backup = Some(info.file_name);
                    self.apply_retention();
                }
                Err(e) => match self.config.backup_failure_policy {
                    BackupFailurePolicy::Abort => {
                        let reason = format!("backup failed: {}", e);
                        self.record_failure(&old_hash, &new_hash, trigger, "backup", &reason);
                        return CycleOutcome::Failed { reason };
                    }
                    BackupFailurePolicy::Proceed => {
                        warn!(error = %e, "backup failed, swapping without a restore point");
                    }
                },
            }
        }

        self.stage = UpdateStage::Swapping;
        let (source, target) = (candidate.path.clone(), self.config.model_path.clone());
        if let Err(e) = run_blocking(move || replace_atomically(&source, &target)).await {
            let reason = format!("swap failed: {}", e);
            self.record_failure(&old_hash, &new_hash, trigger, "swap", &reason);
            return CycleOutcome::Failed { reason };
        }
        self.remember_active(new_digest);

        self.stage = UpdateStage::Evaluating;
        let performance = self.evaluator.evaluate(&self.config.model_path);
        self.store.set_performance(performance);

        let mut extra = Map::new();
        extra.insert("trigger".into(), Value::from(trigger.as_str()));
        extra.insert("source".into(), Value::from(candidate.origin.clone()));
        if let Some(name) = &backup {
            extra.insert("backup".into(), Value::from(name.clone()));
        }
        if let Err(e) = self.store.append(RecordStatus::Success, old_hash.clone(), new_hash.clone(), extra) {
            error!(error = %e, "failed to persist update record");
        }
        telemetry::record_update_success(&performance);

        CycleOutcome::Updated { old_hash, new_hash, backup }
    }

    /// Prune backups down to the configured cap. Failures are logged only.
    pub(super) fn apply_retention(&self) {
        match self.backups.cleanup(self.config.max_backups) {
            Ok(_) => {
                if let Ok(remaining) = self.backups.list() {
                    telemetry::record_backups_retained(remaining.len());
                }
            }
            Err(e) => warn!(error = %e, "backup retention failed"),
        }
    }

    /// Digest of the active artifact if it is unchanged since last hashed.
    fn cached_digest(&self) -> Option<ArtifactDigest> {
        ArtifactInfo::stat(&self.config.model_path, self.active.as_ref())
            .ok()
            .flatten()
            .and_then(|info| info.sha256)
    }

    async fn active_hash_label(&self) -> String {
        if let Some(digest) = self.cached_digest() {
            return digest.to_string();
        }
        let path = self.config.model_path.clone();
        match run_blocking(move || current_digest(&path)).await {
            Ok(Some(d)) => d.to_string(),
            Ok(None) => INITIAL_HASH.to_string(),
            Err(_) => UNKNOWN_HASH.to_string(),
        }
    }

    fn record_failure(&mut self, old_hash: &str, new_hash: &str, trigger: CycleTrigger, step: &str, reason: &str) {
        let mut extra = Map::new();
        extra.insert("trigger".into(), Value::from(trigger.as_str()));
        extra.insert("step".into(), Value::from(step));
        extra.insert("error".into(), Value::from(reason));
        if let Err(e) = self.store.append(RecordStatus::Failed, old_hash, new_hash, extra) {
            error!(error = %e, "failed to persist failure record");
        }
    }
}

/// Run filesystem-heavy work on the blocking pool so hashing and copying
/// large models does not stall runtime workers.
pub(super) async fn run_blocking<T, E, F>(work: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<io::Error> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) => Err(io::Error::new(io::ErrorKind::Other, e).into()),
    }
}
