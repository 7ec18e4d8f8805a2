//! Update service task and its handle.
//!
//! A single task owns the [`UpdateOrchestrator`] and executes commands one at
//! a time from a bounded queue, so cycles, rollbacks and status reads never
//! interleave on the filesystem. The optional poll loop is a separate task
//! that only enqueues scheduled cycles.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::lock::LockFile;
use super::orchestrator::{CycleOutcome, CycleTrigger, Status, UpdateOrchestrator};
use super::rollback::{RollbackError, RollbackOutcome};
use super::store::MetricsRecord;

/// Name of the lock file created inside the backup directory.
pub const LOCK_FILE_NAME: &str = ".updater.lock";

const COMMAND_QUEUE_DEPTH: usize = 32;
const EVENT_CAPACITY: usize = 16;

/// Broadcast after every completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleEvent {
    pub trigger: CycleTrigger,
    pub outcome: CycleOutcome,
}

#[derive(Error, Debug)]
pub enum UpdaterError {
    #[error("Another updater holds {0}; delete it if no updater is running")]
    AlreadyRunning(PathBuf),

    #[error("Update service stopped")]
    ServiceStopped,

    #[error("Rollback failed: {0}")]
    Rollback(#[from] RollbackError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Timing of the poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    pub interval: Duration,
    pub error_backoff: Duration,
    pub stop_timeout: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            error_backoff: Duration::from_secs(300),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

enum Command {
    Cycle {
        trigger: CycleTrigger,
        reply: oneshot::Sender<CycleOutcome>,
    },
    Rollback {
        reply: oneshot::Sender<Result<RollbackOutcome, RollbackError>>,
    },
    Status {
        running: bool,
        reply: oneshot::Sender<Status>,
    },
    History {
        limit: Option<usize>,
        reply: oneshot::Sender<Vec<MetricsRecord>>,
    },
    Shutdown,
}

struct PollTask {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Entry point for spawning the update service.
pub struct UpdateService;

impl UpdateService {
    /// Take the updater lock and spawn the service task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        orchestrator: UpdateOrchestrator,
        schedule: PollSchedule,
    ) -> Result<(UpdaterHandle, JoinHandle<()>), UpdaterError> {
        let lock_path = orchestrator.backups().backup_dir().join(LOCK_FILE_NAME);
        let lock = match LockFile::acquire(&lock_path) {
            Ok(lock) => lock,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!(
                    lock = %lock_path.display(),
                    pid = ?LockFile::holder(&lock_path),
                    "updater lock is held, delete the file if that process is gone"
                );
                return Err(UpdaterError::AlreadyRunning(lock_path));
            }
            Err(e) => return Err(e.into()),
        };

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let join = tokio::spawn(run_service(orchestrator, rx, events.clone(), lock));
        let handle = UpdaterHandle {
            tx,
            events,
            poller: Arc::new(Mutex::new(None)),
            schedule,
        };
        Ok((handle, join))
    }
}

async fn run_service(
    mut orchestrator: UpdateOrchestrator,
    mut rx: mpsc::Receiver<Command>,
    events: broadcast::Sender<CycleEvent>,
    lock: LockFile,
) {
    info!(model = %orchestrator.model_path().display(), lock = %lock.path().display(), "update service started");
    orchestrator.refresh_active().await;

    while let Some(command) = rx.recv().await {
        match command {
            Command::Cycle { trigger, reply } => {
                let outcome = orchestrator.run_cycle(trigger).await;
                // No subscribers is fine.
                let _ = events.send(CycleEvent { trigger, outcome: outcome.clone() });
                let _ = reply.send(outcome);
            }
            Command::Rollback { reply } => {
                let _ = reply.send(orchestrator.rollback().await);
            }
            Command::Status { running, reply } => {
                let _ = reply.send(orchestrator.status(running));
            }
            Command::History { limit, reply } => {
                let _ = reply.send(orchestrator.history(limit));
            }
            Command::Shutdown => break,
        }
    }

    info!("update service stopped");
    drop(lock);
}

/// Cloneable handle to a running update service.
#[derive(Clone)]
pub struct UpdaterHandle {
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<CycleEvent>,
    poller: Arc<Mutex<Option<PollTask>>>,
    schedule: PollSchedule,
}

impl UpdaterHandle {
    /// Start the poll loop. Returns `false` if it was already running.
    pub async fn start(&self) -> bool {
        let mut poller = self.poller.lock().await;
        if poller.as_ref().map_or(false, |p| !p.join.is_finished()) {
            debug!("poll loop already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let join = tokio::spawn(poll_loop(self.tx.clone(), cancel.clone(), self.schedule));
        *poller = Some(PollTask { cancel, join });
        info!(interval_secs = self.schedule.interval.as_secs(), "automatic updates started");
        true
    }

    /// Stop the poll loop. Returns `false` if it was not running.
    ///
    /// A cycle already queued or executing runs to completion.
    pub async fn stop(&self) -> bool {
        let task = match self.poller.lock().await.take() {
            Some(task) => task,
            None => return false,
        };

        task.cancel.cancel();
        let mut join = task.join;
        if tokio::time::timeout(self.schedule.stop_timeout, &mut join).await.is_err() {
            warn!(timeout_secs = self.schedule.stop_timeout.as_secs(), "poll loop did not stop in time, aborting");
            join.abort();
        }
        info!("automatic updates stopped");
        true
    }

    /// Whether the poll loop is active.
    pub async fn is_running(&self) -> bool {
        self.poller
            .lock()
            .await
            .as_ref()
            .map_or(false, |p| !p.join.is_finished())
    }

    /// Receive an event for every cycle completed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.events.subscribe()
    }

    /// Run a forced cycle and wait for its outcome.
    pub async fn force_update(&self) -> Result<CycleOutcome, UpdaterError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cycle { trigger: CycleTrigger::Forced, reply }).await?;
        rx.await.map_err(|_| UpdaterError::ServiceStopped)
    }

    pub async fn rollback(&self) -> Result<RollbackOutcome, UpdaterError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Rollback { reply }).await?;
        Ok(rx.await.map_err(|_| UpdaterError::ServiceStopped)??)
    }

    pub async fn status(&self) -> Result<Status, UpdaterError> {
        let running = self.is_running().await;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { running, reply }).await?;
        rx.await.map_err(|_| UpdaterError::ServiceStopped)
    }

    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<MetricsRecord>, UpdaterError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::History { limit, reply }).await?;
        rx.await.map_err(|_| UpdaterError::ServiceStopped)
    }

    /// Stop polling and end the service task after queued commands drain.
    pub async fn shutdown(&self) {
        self.stop().await;
        if self.tx.send(Command::Shutdown).await.is_err() {
            debug!("update service already stopped");
        }
    }

    async fn send(&self, command: Command) -> Result<(), UpdaterError> {
        self.tx.send(command).await.map_err(|_| UpdaterError::ServiceStopped)
    }
}

async fn poll_loop(tx: mpsc::Sender<Command>, cancel: CancellationToken, schedule: PollSchedule) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let (reply, rx) = oneshot::channel();
        let command = Command::Cycle { trigger: CycleTrigger::Scheduled, reply };
        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(command) => sent,
        };
        if sent.is_err() {
            warn!("update service gone, poll loop exiting");
            break;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = rx => result,
        };
        let delay = match result {
            Ok(outcome) if outcome.is_unexpected() => {
                warn!(backoff_secs = schedule.error_backoff.as_secs(), "update cycle failed, backing off");
                schedule.error_backoff
            }
            Ok(_) => schedule.interval,
            Err(_) => {
                error!("update cycle aborted without a result");
                schedule.error_backoff
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!("poll loop exited");
}
