//! Telemetry module for the updater.
//!
//! Provides structured logging and metrics facade hooks.
//! All output is file-based or stderr - no network exporters.

mod logging;
mod metrics;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    record_backups_retained, record_cycle_skipped, record_reload, record_rollback,
    record_update_failure, record_update_success,
};
