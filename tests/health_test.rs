//! Health check tests for the updater.

use netsecure_updater::health::{HealthChecker, HealthConfig, HealthInputs, HealthState};

fn running() -> HealthInputs {
    HealthInputs {
        service_alive: true,
        auto_update: true,
        polling: true,
        artifact_present: true,
        backups: 2,
        ..Default::default()
    }
}

// ============================================================================
// Liveness and readiness
// ============================================================================

#[test]
fn test_alive_always_true() {
    let checker = HealthChecker::default();
    assert!(checker.is_alive());
}

#[test]
fn test_ready_when_running() {
    let checker = HealthChecker::default();
    assert!(checker.is_ready(&running()));
}

#[test]
fn test_not_ready_when_service_gone() {
    let checker = HealthChecker::default();
    let inputs = HealthInputs {
        service_alive: false,
        ..running()
    };
    assert!(!checker.is_ready(&inputs));
}

#[test]
fn test_ready_respects_artifact_requirement() {
    let missing = HealthInputs {
        artifact_present: false,
        ..running()
    };
    assert!(!HealthChecker::default().is_ready(&missing));

    let relaxed = HealthChecker::new(HealthConfig {
        require_artifact: false,
        degrade_on_last_failure: true,
    });
    assert!(relaxed.is_ready(&missing));
}

// ============================================================================
// Reports
// ============================================================================

#[test]
fn test_report_carries_inputs() {
    let checker = HealthChecker::default();
    let inputs = HealthInputs {
        failed_updates: 3,
        last_update: Some(chrono::Utc::now()),
        ..running()
    };
    let report = checker.report(&inputs);

    assert_eq!(report.state, HealthState::Healthy);
    assert_eq!(report.backups, 2);
    assert_eq!(report.failed_updates, 3);
    assert!(report.last_update.is_some());
    assert!(report.last_check.is_none());
}

#[test]
fn test_recent_failure_degrades_until_success() {
    let checker = HealthChecker::default();
    let failing = HealthInputs {
        failed_updates: 1,
        last_record_failed: true,
        ..running()
    };
    assert_eq!(checker.report(&failing).state, HealthState::Degraded);

    let recovered = HealthInputs {
        failed_updates: 1,
        last_record_failed: false,
        ..running()
    };
    assert_eq!(checker.report(&recovered).state, HealthState::Healthy);
}

#[test]
fn test_report_json_shape() {
    let report = HealthChecker::default().report(&running());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["state"], "Healthy");
    assert_eq!(json["polling"], true);
    assert!(json["uptime_secs"].is_u64());
}
