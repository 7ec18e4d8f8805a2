//! Update cycle tests: fetch, verify, compare, backup, swap, record.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;

use netsecure_updater::updater::{
    ArtifactDigest, ArtifactSource, ArtifactVerifier, BackupFailurePolicy, BackupManager, Candidate,
    CycleOutcome, CycleTrigger, FetchError, IntegrityChecker, IntegrityError, MetricsStore,
    OrchestratorConfig, RecordStatus, UpdateOrchestrator, UpdateStage, INITIAL_HASH,
};

/// Serves a fixed payload, replaceable between cycles.
struct FixedSource {
    payload: Mutex<Option<Vec<u8>>>,
}

impl FixedSource {
    fn new(payload: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            payload: Mutex::new(Some(payload.to_vec())),
        })
    }

    fn set(&self, payload: Option<&[u8]>) {
        *self.payload.lock() = payload.map(|p| p.to_vec());
    }
}

#[async_trait]
impl ArtifactSource for FixedSource {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch(&self, staging_dir: &Path) -> Result<Candidate, FetchError> {
        let payload = self
            .payload
            .lock()
            .clone()
            .ok_or_else(|| FetchError::Unavailable("no payload".into()))?;
        std::fs::create_dir_all(staging_dir)?;
        let path = staging_dir.join("candidate.bin");
        std::fs::write(&path, payload)?;
        Ok(Candidate {
            path,
            origin: "fixed".into(),
        })
    }
}

/// Accepts the candidate, then removes it so the swap has nothing to move.
struct VanishingVerifier(IntegrityChecker);

impl ArtifactVerifier for VanishingVerifier {
    fn check(&self, candidate: &Path) -> Result<ArtifactDigest, IntegrityError> {
        let digest = self.0.check(candidate)?;
        std::fs::remove_file(candidate)?;
        Ok(digest)
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    model: PathBuf,
    backups: PathBuf,
    metrics: PathBuf,
    staging: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        Self {
            model: root.join("models/wifi_model.pkl"),
            backups: root.join("models/backups"),
            metrics: root.join("models/update_metrics.json"),
            staging: root.join("models/staging"),
            _dir: dir,
        }
    }

    fn orchestrator(&self, source: Arc<FixedSource>) -> UpdateOrchestrator {
        self.orchestrator_with(source, |_| {})
    }

    fn orchestrator_with(
        &self,
        source: Arc<FixedSource>,
        tweak: impl FnOnce(&mut OrchestratorConfig),
    ) -> UpdateOrchestrator {
        let mut config = OrchestratorConfig::new(&self.model, &self.staging);
        tweak(&mut config);
        UpdateOrchestrator::new(
            config,
            BackupManager::new(&self.backups, &self.model),
            MetricsStore::open(&self.metrics),
        )
        .with_source(source)
        .with_verifier(Arc::new(IntegrityChecker::new(16)))
    }

    fn write_model(&self, content: &[u8]) {
        std::fs::create_dir_all(self.model.parent().unwrap()).unwrap();
        std::fs::write(&self.model, content).unwrap();
    }

    fn backup_count(&self) -> usize {
        BackupManager::new(&self.backups, &self.model).list().unwrap().len()
    }
}

fn payload(byte: u8) -> Vec<u8> {
    vec![byte; 2048]
}

#[tokio::test]
async fn test_first_update_without_prior_artifact() {
    let fx = Fixture::new();
    let mut orch = fx.orchestrator(FixedSource::new(&payload(1)));

    let outcome = orch.run_cycle(CycleTrigger::Forced).await;
    match &outcome {
        CycleOutcome::Updated { old_hash, new_hash, backup } => {
            assert_eq!(old_hash, INITIAL_HASH);
            assert_eq!(new_hash, ArtifactDigest::of_bytes(&payload(1)).as_str());
            assert!(backup.is_none());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(std::fs::read(&fx.model).unwrap(), payload(1));
    assert_eq!(fx.backup_count(), 0);
    assert_eq!(orch.store().data().total_updates, 1);
    assert_eq!(orch.stage(), UpdateStage::Idle);

    let persisted = MetricsStore::load(&fx.metrics).unwrap().unwrap();
    assert_eq!(persisted.updates.len(), 1);
    assert_eq!(persisted.updates[0].status, RecordStatus::Success);
    assert_eq!(persisted.updates[0].old_hash, INITIAL_HASH);
}

#[tokio::test]
async fn test_update_backs_up_previous_artifact() {
    let fx = Fixture::new();
    fx.write_model(&payload(1));
    let mut orch = fx.orchestrator(FixedSource::new(&payload(2)));

    let outcome = orch.run_cycle(CycleTrigger::Scheduled).await;
    let backup = match outcome {
        CycleOutcome::Updated { old_hash, backup, .. } => {
            assert_eq!(old_hash, ArtifactDigest::of_bytes(&payload(1)).as_str());
            backup.expect("backup name")
        }
        other => panic!("unexpected outcome: {:?}", other),
    };

    assert!(backup.starts_with("model_backup_"));
    assert!(backup.ends_with(".pkl"));
    assert_eq!(std::fs::read(fx.backups.join(&backup)).unwrap(), payload(1));
    assert_eq!(std::fs::read(&fx.model).unwrap(), payload(2));

    let record = orch.store().last_record().unwrap().clone();
    assert_eq!(record.extra["backup"], backup.as_str());
    assert_eq!(record.extra["trigger"], "scheduled");
    assert_eq!(record.extra["source"], "fixed");
}

#[tokio::test]
async fn test_identical_candidate_changes_nothing() {
    let fx = Fixture::new();
    fx.write_model(&payload(7));
    let old = SystemTime::now() - Duration::from_secs(3600);
    std::fs::File::options()
        .write(true)
        .open(&fx.model)
        .unwrap()
        .set_modified(old)
        .unwrap();
    let mtime_before = std::fs::metadata(&fx.model).unwrap().modified().unwrap();

    let mut orch = fx.orchestrator(FixedSource::new(&payload(7)));
    for trigger in [CycleTrigger::Scheduled, CycleTrigger::Forced] {
        let outcome = orch.run_cycle(trigger).await;
        assert!(matches!(outcome, CycleOutcome::Unchanged { .. }), "{:?}", outcome);
    }

    assert_eq!(orch.store().data().total_updates, 0);
    assert!(orch.store().data().updates.is_empty());
    assert_eq!(fx.backup_count(), 0);
    assert_eq!(std::fs::metadata(&fx.model).unwrap().modified().unwrap(), mtime_before);
    assert!(!fx.metrics.exists());
}

#[tokio::test]
async fn test_forced_update_can_bypass_identical_check() {
    let fx = Fixture::new();
    fx.write_model(&payload(7));
    let mut orch = fx.orchestrator_with(FixedSource::new(&payload(7)), |c| {
        c.force_skips_identical = false;
    });

    let scheduled = orch.run_cycle(CycleTrigger::Scheduled).await;
    assert!(matches!(scheduled, CycleOutcome::Unchanged { .. }));

    let forced = orch.run_cycle(CycleTrigger::Forced).await;
    assert!(forced.changed(), "{:?}", forced);
    assert_eq!(orch.store().data().total_updates, 1);
    assert_eq!(fx.backup_count(), 1);
}

#[tokio::test]
async fn test_rejected_candidate_records_failure() {
    let fx = Fixture::new();
    fx.write_model(&payload(1));
    let mut orch = fx.orchestrator(FixedSource::new(b"tiny"));

    let outcome = orch.run_cycle(CycleTrigger::Forced).await;
    assert!(matches!(outcome, CycleOutcome::Rejected { .. }), "{:?}", outcome);
    assert!(!outcome.is_unexpected());

    let data = orch.store().data();
    assert_eq!(data.total_updates, 0);
    assert_eq!(data.failed_updates, 1);
    assert_eq!(data.updates.len(), 1);
    assert_eq!(data.updates[0].status, RecordStatus::Failed);
    assert_eq!(data.updates[0].extra["step"], "verification");
    assert_eq!(std::fs::read(&fx.model).unwrap(), payload(1));
    assert!(!fx.staging.join("candidate.bin").exists());
}

#[tokio::test]
async fn test_fetch_failure_writes_no_record() {
    let fx = Fixture::new();
    let source = FixedSource::new(&payload(1));
    source.set(None);
    let mut orch = fx.orchestrator(source);

    let outcome = orch.run_cycle(CycleTrigger::Scheduled).await;
    assert!(matches!(outcome, CycleOutcome::FetchFailed { .. }));
    assert!(orch.store().data().updates.is_empty());
    assert!(!fx.model.exists());
}

#[tokio::test]
async fn test_retention_cap_after_update() {
    let fx = Fixture::new();
    fx.write_model(&payload(1));
    std::fs::create_dir_all(&fx.backups).unwrap();

    let base = SystemTime::now() - Duration::from_secs(86_400);
    for i in 0..5u64 {
        let path = fx.backups.join(format!("model_backup_2024010{}_000000.pkl", i + 1));
        std::fs::write(&path, payload(100 + i as u8)).unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(base + Duration::from_secs(i * 60))
            .unwrap();
    }

    let mut orch = fx.orchestrator(FixedSource::new(&payload(2)));
    let outcome = orch.run_cycle(CycleTrigger::Forced).await;
    assert!(outcome.changed());

    let names: Vec<String> = BackupManager::new(&fx.backups, &fx.model)
        .list()
        .unwrap()
        .into_iter()
        .map(|b| b.file_name)
        .collect();
    assert_eq!(names.len(), 5);
    assert!(!names.contains(&"model_backup_20240101_000000.pkl".to_string()));
    assert!(names.contains(&"model_backup_20240102_000000.pkl".to_string()));
}

#[tokio::test]
async fn test_backup_failure_aborts_by_default() {
    let fx = Fixture::new();
    fx.write_model(&payload(1));
    // A regular file where the backup directory should be.
    std::fs::write(&fx.backups, b"not a directory").unwrap();

    let mut orch = fx.orchestrator(FixedSource::new(&payload(2)));
    let outcome = orch.run_cycle(CycleTrigger::Forced).await;
    assert!(outcome.is_unexpected(), "{:?}", outcome);
    assert_eq!(std::fs::read(&fx.model).unwrap(), payload(1));

    let data = orch.store().data();
    assert_eq!(data.failed_updates, 1);
    assert_eq!(data.updates[0].extra["step"], "backup");
}

#[tokio::test]
async fn test_backup_failure_proceed_policy_swaps() {
    let fx = Fixture::new();
    fx.write_model(&payload(1));
    std::fs::write(&fx.backups, b"not a directory").unwrap();

    let mut orch = fx.orchestrator_with(FixedSource::new(&payload(2)), |c| {
        c.backup_failure_policy = BackupFailurePolicy::Proceed;
    });
    let outcome = orch.run_cycle(CycleTrigger::Forced).await;
    match outcome {
        CycleOutcome::Updated { backup, .. } => assert!(backup.is_none()),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(std::fs::read(&fx.model).unwrap(), payload(2));
    assert_eq!(orch.store().data().total_updates, 1);
}

#[tokio::test]
async fn test_successive_updates_accumulate_history() {
    let fx = Fixture::new();
    let source = FixedSource::new(&payload(1));
    let mut orch = fx.orchestrator(source.clone());

    for byte in 1..=3u8 {
        source.set(Some(&payload(byte)));
        assert!(orch.run_cycle(CycleTrigger::Forced).await.changed());
    }

    let history = orch.history(Some(2));
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].new_hash, ArtifactDigest::of_bytes(&payload(3)).as_str());
    assert_eq!(history[1].old_hash, history[0].new_hash);
    assert_eq!(orch.store().data().total_updates, 3);
    assert_eq!(fx.backup_count(), 2);

    let status = orch.status(false);
    assert_eq!(status.metrics.total_updates, 3);
    assert_eq!(status.available_backups.len(), 2);
    assert!(status.last_update_time.is_some());
    assert_eq!(status.artifact.unwrap().size_bytes, 2048);
}

#[tokio::test]
async fn test_swap_failure_keeps_active_model() {
    let fx = Fixture::new();
    fx.write_model(&payload(1));
    let mut orch = fx
        .orchestrator(FixedSource::new(&payload(2)))
        .with_verifier(Arc::new(VanishingVerifier(IntegrityChecker::new(16))));

    let outcome = orch.run_cycle(CycleTrigger::Forced).await;
    assert!(matches!(outcome, CycleOutcome::Failed { .. }), "{:?}", outcome);
    assert!(outcome.is_unexpected());
    assert_eq!(std::fs::read(&fx.model).unwrap(), payload(1));

    let data = orch.store().data();
    assert_eq!(data.total_updates, 0);
    assert_eq!(data.failed_updates, 1);
    assert_eq!(data.updates.len(), 1);
    let record = &data.updates[0];
    assert_eq!(record.status, RecordStatus::Failed);
    assert_eq!(record.extra["step"], "swap");
    assert_eq!(record.extra["trigger"], "forced");
    assert_eq!(record.old_hash, ArtifactDigest::of_bytes(&payload(1)).as_str());
    assert_eq!(record.new_hash, ArtifactDigest::of_bytes(&payload(2)).as_str());
    assert_eq!(orch.stage(), UpdateStage::Idle);
}

#[tokio::test]
async fn test_status_reuses_digest_until_model_changes() {
    let fx = Fixture::new();
    let mut orch = fx.orchestrator(FixedSource::new(&payload(3)));

    assert!(orch.run_cycle(CycleTrigger::Forced).await.changed());
    let artifact = orch.status(false).artifact.unwrap();
    assert_eq!(artifact.sha256, Some(ArtifactDigest::of_bytes(&payload(3))));

    fx.write_model(b"rewritten out of band");
    let artifact = orch.status(false).artifact.unwrap();
    assert_eq!(artifact.size_bytes, 21);
    assert!(artifact.sha256.is_none());

    orch.refresh_active().await;
    let artifact = orch.status(false).artifact.unwrap();
    assert_eq!(artifact.sha256, Some(ArtifactDigest::of_bytes(b"rewritten out of band")));
}
