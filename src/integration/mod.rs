//! Integration facade for a hosting application.
//!
//! [`UpdateIntegration`] wraps an [`UpdaterHandle`] with the control
//! operations the host exposes, the auto-update toggle, a periodic health
//! check that consults an [`UpdateAvailability`] probe, and serialized
//! reload notifications after the active model changes.
//!
//! The facade is constructed explicitly by the composition root and is
//! cheap to clone; clones share state.

mod availability;
mod reload;

pub use availability::{ScheduleWindowProbe, UpdateAvailability};
pub use reload::{LoggingReloadHook, ReloadCoordinator, ReloadError, ReloadHook, ReloadReason};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::health::{HealthChecker, HealthInputs, HealthReport};
use crate::updater::{
    CycleEvent, CycleOutcome, CycleTrigger, MetricsRecord, RecordStatus, Status, UpdaterHandle,
};

/// Updater status plus the facade's auto-update flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlStatus {
    pub auto_update: bool,
    #[serde(flatten)]
    pub updater: Status,
}

/// Result of every control operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ControlStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<MetricsRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthReport>,
    pub timestamp: DateTime<Utc>,
}

impl ControlResponse {
    fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            status: None,
            history: None,
            health: None,
            timestamp: Utc::now(),
        }
    }

    fn with_status(mut self, status: Option<ControlStatus>) -> Self {
        self.status = status;
        self
    }
}

pub struct IntegrationBuilder {
    updater: UpdaterHandle,
    model_path: PathBuf,
    availability: Arc<dyn UpdateAvailability>,
    reload_hook: Arc<dyn ReloadHook>,
    health: HealthChecker,
    health_interval: Duration,
    auto_update: bool,
}

impl IntegrationBuilder {
    pub fn availability(mut self, probe: Arc<dyn UpdateAvailability>) -> Self {
        self.availability = probe;
        self
    }

    pub fn reload_hook(mut self, hook: Arc<dyn ReloadHook>) -> Self {
        self.reload_hook = hook;
        self
    }

    pub fn health_checker(mut self, checker: HealthChecker) -> Self {
        self.health = checker;
        self
    }

    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Initial state of the auto-update toggle.
    pub fn auto_update(mut self, enabled: bool) -> Self {
        self.auto_update = enabled;
        self
    }

    pub fn build(self) -> UpdateIntegration {
        UpdateIntegration {
            inner: Arc::new(Inner {
                reload: ReloadCoordinator::new(self.reload_hook, self.model_path),
                updater: self.updater,
                auto_update: AtomicBool::new(self.auto_update),
                availability: self.availability,
                health: self.health,
                health_interval: self.health_interval,
                last_check: Mutex::new(None),
                tasks: Mutex::new(None),
            }),
        }
    }
}

struct BackgroundTasks {
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

struct Inner {
    updater: UpdaterHandle,
    auto_update: AtomicBool,
    availability: Arc<dyn UpdateAvailability>,
    reload: ReloadCoordinator,
    health: HealthChecker,
    health_interval: Duration,
    last_check: Mutex<Option<DateTime<Utc>>>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

#[derive(Clone)]
pub struct UpdateIntegration {
    inner: Arc<Inner>,
}

impl UpdateIntegration {
    pub fn builder(updater: UpdaterHandle, model_path: impl Into<PathBuf>) -> IntegrationBuilder {
        IntegrationBuilder {
            updater,
            model_path: model_path.into(),
            availability: Arc::new(ScheduleWindowProbe::default()),
            reload_hook: Arc::new(LoggingReloadHook),
            health: HealthChecker::default(),
            health_interval: Duration::from_secs(300),
            auto_update: true,
        }
    }

    /// Start polling (if auto-update is on), the health-check loop and the
    /// reload listener. Returns `false` if already started.
    pub async fn start(&self) -> bool {
        {
            let mut tasks = self.inner.tasks.lock();
            if tasks.is_some() {
                return false;
            }
            let cancel = CancellationToken::new();
            let events = self.inner.updater.subscribe();
            let joins = vec![
                tokio::spawn(health_loop(self.clone(), cancel.clone())),
                tokio::spawn(reload_listener(self.clone(), events, cancel.clone())),
            ];
            *tasks = Some(BackgroundTasks { cancel, joins });
        }

        if self.auto_update_enabled() {
            self.inner.updater.start().await;
        }
        info!(
            auto_update = self.auto_update_enabled(),
            health_interval_secs = self.inner.health_interval.as_secs(),
            "update integration started"
        );
        true
    }

    /// Stop background tasks and the update service.
    pub async fn shutdown(&self) {
        let tasks = self.inner.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.cancel.cancel();
            for join in tasks.joins {
                let _ = join.await;
            }
        }
        self.inner.updater.shutdown().await;
        info!("update integration stopped");
    }

    pub fn auto_update_enabled(&self) -> bool {
        self.inner.auto_update.load(Ordering::SeqCst)
    }

    pub fn reload_count(&self) -> u64 {
        self.inner.reload.completed()
    }

    pub async fn status(&self) -> ControlResponse {
        match self.inner.updater.status().await {
            Ok(status) => ControlResponse::new(true, "status retrieved").with_status(Some(
                ControlStatus {
                    auto_update: self.auto_update_enabled(),
                    updater: status,
                },
            )),
            Err(e) => ControlResponse::new(false, e.to_string()),
        }
    }

    /// Run a forced cycle; reload the host if the model changed.
    pub async fn force_update(&self) -> ControlResponse {
        let outcome = match self.inner.updater.force_update().await {
            Ok(outcome) => outcome,
            Err(e) => return ControlResponse::new(false, e.to_string()),
        };

        let mut message = outcome.describe();
        if outcome.changed() {
            if let Err(e) = self.inner.reload.notify(ReloadReason::Updated).await {
                message = format!("{}; {}", message, e);
            }
        }
        ControlResponse::new(outcome.is_ok(), message).with_status(self.snapshot().await)
    }

    pub async fn toggle_auto_update(&self, enabled: bool) -> ControlResponse {
        let previous = self.inner.auto_update.swap(enabled, Ordering::SeqCst);
        if enabled {
            self.inner.updater.start().await;
        } else {
            self.inner.updater.stop().await;
        }
        if previous != enabled {
            info!(enabled, "auto-update toggled");
        }

        let message = if enabled {
            "automatic updates enabled"
        } else {
            "automatic updates disabled"
        };
        ControlResponse::new(true, message).with_status(self.snapshot().await)
    }

    pub async fn rollback(&self) -> ControlResponse {
        let response = match self.inner.updater.rollback().await {
            Ok(outcome) => {
                let mut message = format!("rolled back to {}", outcome.restored_from);
                if let Err(e) = self.inner.reload.notify(ReloadReason::RolledBack).await {
                    message = format!("{}; {}", message, e);
                }
                ControlResponse::new(true, message)
            }
            Err(e) => ControlResponse::new(false, e.to_string()),
        };
        response.with_status(self.snapshot().await)
    }

    pub async fn history(&self, limit: Option<usize>) -> ControlResponse {
        match self.inner.updater.history(limit).await {
            Ok(records) => {
                let mut response =
                    ControlResponse::new(true, format!("{} record(s)", records.len()));
                response.history = Some(records);
                response
            }
            Err(e) => ControlResponse::new(false, e.to_string()),
        }
    }

    pub async fn health(&self) -> ControlResponse {
        let report = self.health_report().await;
        let mut response = ControlResponse::new(true, format!("{:?}", report.state));
        response.health = Some(report);
        response
    }

    pub async fn health_report(&self) -> HealthReport {
        let status = self.inner.updater.status().await.ok();
        let last_record_failed = match self.inner.updater.history(Some(1)).await {
            Ok(records) => records.last().map_or(false, |r| r.status == RecordStatus::Failed),
            Err(_) => false,
        };

        let inputs = HealthInputs {
            service_alive: status.is_some(),
            auto_update: self.auto_update_enabled(),
            polling: status.as_ref().map_or(false, |s| s.running),
            artifact_present: status.as_ref().map_or(false, |s| s.artifact.is_some()),
            backups: status.as_ref().map_or(0, |s| s.available_backups.len()),
            failed_updates: status.as_ref().map_or(0, |s| s.metrics.failed_updates),
            last_record_failed,
            last_update: status.as_ref().and_then(|s| s.last_update_time),
            last_check: *self.inner.last_check.lock(),
        };
        self.inner.health.report(&inputs)
    }

    /// One pass of the health-check loop. Returns `true` if it forced an update.
    pub async fn run_health_check(&self) -> bool {
        *self.inner.last_check.lock() = Some(Utc::now());

        if !self.auto_update_enabled() {
            debug!("health check: auto-update disabled");
            return false;
        }
        if !self.inner.availability.update_available(Local::now()) {
            debug!("health check: no update available");
            return false;
        }

        info!("health check: update available, forcing update");
        let response = self.force_update().await;
        if !response.success {
            warn!(message = %response.message, "health-check update did not succeed");
        }
        true
    }

    async fn snapshot(&self) -> Option<ControlStatus> {
        let status = self.inner.updater.status().await.ok()?;
        Some(ControlStatus {
            auto_update: self.auto_update_enabled(),
            updater: status,
        })
    }
}

async fn health_loop(integration: UpdateIntegration, cancel: CancellationToken) {
    let interval = integration.inner.health_interval;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        integration.run_health_check().await;
    }
    debug!("health-check loop exited");
}

/// Reloads the host after scheduled cycles. Forced cycles and rollbacks
/// reload inline in the control operations.
async fn reload_listener(
    integration: UpdateIntegration,
    mut events: broadcast::Receiver<CycleEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) if event.trigger == CycleTrigger::Scheduled && event.outcome.changed() => {
                if let CycleOutcome::Updated { new_hash, .. } = &event.outcome {
                    debug!(new_hash = %new_hash, "scheduled update applied");
                }
                let _ = integration.inner.reload.notify(ReloadReason::Updated).await;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "reload listener lagged behind cycle events");
                let _ = integration.inner.reload.notify(ReloadReason::Updated).await;
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("reload listener exited");
}
