//! NetSecure model updater
//!
//! Keeps the WiFi-security model file current: fetches candidates, gates
//! them through integrity checks, snapshots the active model before every
//! swap, replaces it atomically, and can roll back to the newest backup.
//!
//! # Components
//!
//! - [`updater`]: metrics store, backups, integrity, orchestrator, rollback
//!   and the owning service task
//! - [`integration`]: facade for a hosting application (control operations,
//!   health-check loop, reload notifications)
//! - [`ipc`]: newline-delimited JSON control socket
//! - [`cli`]: client subcommands for a running daemon
//!
//! # Filesystem
//!
//! - Model: a single file at the configured path, replaced by atomic rename
//! - Backups: `model_backup_*` and `pre_rollback_*` files, capped by retention
//! - Metrics: one JSON document, rewritten atomically after every record

pub mod cli;
pub mod config;
pub mod health;
pub mod integration;
pub mod ipc;
pub mod telemetry;
pub mod updater;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use config::{SourceKind, UpdaterConfig};
use integration::UpdateIntegration;
use updater::{
    ArtifactSource, BackupManager, DirectorySource, IntegrityChecker, MetricsStore,
    SyntheticSource, UpdateOrchestrator, UpdateService, UpdaterError,
};

/// Build an orchestrator from configuration. Touches no files except the
/// metrics store read.
pub fn build_orchestrator(config: &UpdaterConfig) -> UpdateOrchestrator {
    let backups = BackupManager::new(&config.backup_dir, &config.model_path);
    let store = MetricsStore::open(&config.metrics_path);

    let mut verifier = IntegrityChecker::new(config.min_artifact_size);
    if let Some(digest) = &config.expected_sha256 {
        verifier = verifier.with_expected_digest(digest.clone());
    }
    let source: Arc<dyn ArtifactSource> = match config.source {
        SourceKind::Synthetic => Arc::new(SyntheticSource::new(config.synthetic_payload_bytes)),
        SourceKind::Directory => Arc::new(DirectorySource::new(config.incoming_file())),
    };

    UpdateOrchestrator::new(config.orchestrator_config(), backups, store)
        .with_source(source)
        .with_verifier(Arc::new(verifier))
}

/// A running updater: the service task plus the integration facade.
pub struct Runtime {
    pub config: UpdaterConfig,
    pub integration: UpdateIntegration,
    service: JoinHandle<()>,
}

impl Runtime {
    /// Spawn the update service and start the facade.
    ///
    /// Fails with [`UpdaterError::AlreadyRunning`] if another process holds
    /// the updater lock.
    pub async fn start(config: UpdaterConfig) -> Result<Self, UpdaterError> {
        std::fs::create_dir_all(&config.backup_dir)?;
        let orchestrator = build_orchestrator(&config);
        let (handle, service) = UpdateService::spawn(orchestrator, config.poll_schedule())?;

        let integration = UpdateIntegration::builder(handle, &config.model_path)
            .health_interval(config.health_check_interval)
            .auto_update(config.auto_update)
            .build();
        integration.start().await;

        info!(
            model = %config.model_path.display(),
            source = ?config.source,
            "updater runtime started"
        );
        Ok(Self {
            config,
            integration,
            service,
        })
    }

    /// Stop background loops, drain the service queue and release the lock.
    pub async fn shutdown(self) {
        self.integration.shutdown().await;
        let _ = self.service.await;
        info!("updater runtime stopped");
    }
}
