//! Telemetry tests: logging configuration and metrics hooks.

use netsecure_updater::telemetry::{
    init_logging, record_backups_retained, record_cycle_skipped, record_reload, record_rollback,
    record_update_failure, record_update_success, LogConfig, LogError, LogFormat,
};
use netsecure_updater::updater::PerformanceSnapshot;

// ============================================================================
// LogConfig
// ============================================================================

#[test]
fn log_config_default_is_json() {
    let config = LogConfig::default();
    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, "info");
    assert!(config.output_path.is_none());
}

#[test]
fn log_format_parsing() {
    assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
    assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    assert_eq!(" text ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    assert!(matches!(
        "xml".parse::<LogFormat>(),
        Err(LogError::InvalidFormat(f)) if f == "xml"
    ));
}

#[test]
fn log_error_display() {
    assert_eq!(
        LogError::InvalidFilter("bad".into()).to_string(),
        "Invalid log filter: bad"
    );
    assert_eq!(
        LogError::FileOpen("denied".into()).to_string(),
        "Failed to open log file: denied"
    );
    assert_eq!(
        LogError::AlreadyInitialized.to_string(),
        "Subscriber already initialized"
    );
}

#[test]
fn init_logging_reports_unopenable_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = LogConfig {
        output_path: Some(dir.path().join("missing/dir/updater.log")),
        ..Default::default()
    };
    assert!(matches!(init_logging(&config), Err(LogError::FileOpen(_))));
}

// ============================================================================
// Metrics hooks
// ============================================================================

#[test]
fn metrics_hooks_without_recorder_are_noops() {
    record_update_success(&PerformanceSnapshot {
        accuracy: 0.95,
        recall: 0.9,
        f1_score: 0.92,
    });
    record_update_failure("rejected");
    record_cycle_skipped("unchanged");
    record_rollback();
    record_backups_retained(4);
    record_reload();
}
