//! Model artifact updater.
//!
//! Handles candidate fetching, integrity checks, backups with retention,
//! atomic swaps, rollback, and the persisted update history.

pub mod artifact;

mod backup;
mod evaluate;
mod integrity;
mod lock;
mod orchestrator;
mod rollback;
mod service;
mod source;
mod store;
mod swap;

pub use artifact::{current_digest, ArtifactDigest, ArtifactInfo, INITIAL_HASH};
pub use backup::{BackupError, BackupInfo, BackupKind, BackupManager, BACKUP_PREFIX, PRE_ROLLBACK_PREFIX};
pub use evaluate::{ArtifactEvaluator, SimulatedEvaluator};
pub use integrity::{ArtifactVerifier, IntegrityChecker, IntegrityError};
pub use lock::LockFile;
pub use orchestrator::{
    BackupFailurePolicy, CycleOutcome, CycleTrigger, OrchestratorConfig, Status, UpdateOrchestrator,
    UpdateStage,
};
pub use rollback::{RollbackError, RollbackOutcome};
pub use service::{CycleEvent, PollSchedule, UpdateService, UpdaterError, UpdaterHandle, LOCK_FILE_NAME};
pub use source::{ArtifactSource, Candidate, DirectorySource, FetchError, SyntheticSource};
pub use store::{
    MetricsFile, MetricsRecord, MetricsStore, MetricsSummary, PerformanceSnapshot, RecordStatus,
    StoreError,
};
pub use swap::{replace_atomically, SwapError};
