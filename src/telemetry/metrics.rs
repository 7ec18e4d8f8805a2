//! Metrics facade hooks for the update cycle.
//!
//! Calls are no-ops until the host installs a `metrics` recorder.

use metrics::{counter, gauge};

use crate::updater::PerformanceSnapshot;

pub fn record_update_success(performance: &PerformanceSnapshot) {
    counter!("netsecure_updates_total").increment(1);
    gauge!("netsecure_model_accuracy").set(performance.accuracy);
    gauge!("netsecure_model_recall").set(performance.recall);
    gauge!("netsecure_model_f1_score").set(performance.f1_score);
}

pub fn record_update_failure(kind: &'static str) {
    counter!("netsecure_updates_failed_total", "kind" => kind).increment(1);
}

pub fn record_cycle_skipped(reason: &'static str) {
    counter!("netsecure_cycles_skipped_total", "reason" => reason).increment(1);
}

pub fn record_rollback() {
    counter!("netsecure_rollbacks_total").increment(1);
}

pub fn record_backups_retained(count: usize) {
    gauge!("netsecure_backups_retained").set(count as f64);
}

pub fn record_reload() {
    counter!("netsecure_model_reloads_total").increment(1);
}
