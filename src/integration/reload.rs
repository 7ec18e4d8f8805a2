//! Reload notifications to the hosting application.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::telemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadReason {
    Updated,
    RolledBack,
}

#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("Reload failed: {0}")]
    Failed(String),
}

/// Implemented by the hosting application to pick up a new model file.
#[async_trait]
pub trait ReloadHook: Send + Sync {
    async fn reload(&self, model_path: &Path, reason: ReloadReason) -> Result<(), ReloadError>;
}

/// Default hook for hosts that re-read the model lazily.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReloadHook;

#[async_trait]
impl ReloadHook for LoggingReloadHook {
    async fn reload(&self, model_path: &Path, reason: ReloadReason) -> Result<(), ReloadError> {
        info!(model = %model_path.display(), ?reason, "model reload requested");
        Ok(())
    }
}

/// Runs reload hooks one at a time.
pub struct ReloadCoordinator {
    hook: Arc<dyn ReloadHook>,
    model_path: PathBuf,
    guard: Mutex<()>,
    completed: AtomicU64,
}

impl ReloadCoordinator {
    pub fn new(hook: Arc<dyn ReloadHook>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            hook,
            model_path: model_path.into(),
            guard: Mutex::new(()),
            completed: AtomicU64::new(0),
        }
    }

    pub async fn notify(&self, reason: ReloadReason) -> Result<(), ReloadError> {
        let _guard = self.guard.lock().await;
        match self.hook.reload(&self.model_path, reason).await {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                telemetry::record_reload();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, ?reason, "model reload failed");
                Err(e)
            }
        }
    }

    /// Number of hook invocations that returned `Ok`.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}
