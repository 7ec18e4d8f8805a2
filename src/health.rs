//! Health check support for the updater.
//!
//! Provides liveness, readiness, and full health report capabilities
//! for supervisor integration (systemd, the hosting application).

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Detailed health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub service_alive: bool,
    pub auto_update: bool,
    pub polling: bool,
    pub artifact_present: bool,
    pub backups: usize,
    pub failed_updates: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
}

/// Observations the report is built from.
#[derive(Debug, Clone, Default)]
pub struct HealthInputs {
    pub service_alive: bool,
    pub auto_update: bool,
    pub polling: bool,
    pub artifact_present: bool,
    pub backups: usize,
    pub failed_updates: u64,
    pub last_record_failed: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
}

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub require_artifact: bool,
    /// Report Degraded while the most recent record is a failure.
    pub degrade_on_last_failure: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            require_artifact: true,
            degrade_on_last_failure: true,
        }
    }
}

/// Aggregates health information from updater components.
pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    /// Check liveness: process is responsive.
    pub fn is_alive(&self) -> bool {
        true
    }

    /// Check readiness: the service task answers and a model is in place.
    pub fn is_ready(&self, inputs: &HealthInputs) -> bool {
        if !inputs.service_alive {
            return false;
        }
        !(self.config.require_artifact && !inputs.artifact_present)
    }

    /// Generate full health report.
    pub fn report(&self, inputs: &HealthInputs) -> HealthReport {
        HealthReport {
            state: self.compute_state(inputs),
            service_alive: inputs.service_alive,
            auto_update: inputs.auto_update,
            polling: inputs.polling,
            artifact_present: inputs.artifact_present,
            backups: inputs.backups,
            failed_updates: inputs.failed_updates,
            last_update: inputs.last_update,
            last_check: inputs.last_check,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn compute_state(&self, inputs: &HealthInputs) -> HealthState {
        if !inputs.service_alive {
            return HealthState::Unhealthy;
        }
        if self.config.require_artifact && !inputs.artifact_present {
            return HealthState::Degraded;
        }
        if inputs.auto_update && !inputs.polling {
            return HealthState::Degraded;
        }
        if self.config.degrade_on_last_failure && inputs.last_record_failed {
            return HealthState::Degraded;
        }
        HealthState::Healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
