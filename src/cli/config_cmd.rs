// Copyright 2024-2026 NetSecure Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration directly from the environment and the
//! optional config file without requiring a running daemon.

use crate::config::{self, EffectiveConfig, UpdaterConfig};

/// Print effective config as key-value pairs to stdout.
///
/// Returns 2 if the config file cannot be loaded.
pub fn run_show() -> i32 {
    match config::load() {
        Ok(cfg) => {
            print_config(&cfg.effective_config());
            0
        }
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            2
        }
    }
}

/// Print built-in defaults, ignoring the environment and any config file.
pub fn run_defaults() {
    print_config(&UpdaterConfig::default().effective_config());
}

/// Validate configuration for misconfigurations.
///
/// Returns 0 if valid, 2 on an error, 1 if only warnings are found.
pub fn run_validate() -> i32 {
    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return 2;
        }
    };
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {}", e);
        return 2;
    }

    let warnings = collect_warnings(&cfg);
    for w in &warnings {
        eprintln!("WARNING: {}", w);
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn collect_warnings(cfg: &UpdaterConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if cfg.error_backoff > cfg.update_interval {
        warnings.push(format!(
            "NETSECURE_ERROR_BACKOFF ({}s) exceeds NETSECURE_UPDATE_INTERVAL ({}s)",
            cfg.error_backoff.as_secs(),
            cfg.update_interval.as_secs()
        ));
    }
    if cfg.backup_dir.starts_with(&cfg.staging_dir) || cfg.staging_dir.starts_with(&cfg.backup_dir) {
        warnings.push("staging and backup directories overlap".to_string());
    }
    if !cfg.model_path.exists() {
        warnings.push(format!(
            "model file {} does not exist yet; the first update will create it",
            cfg.model_path.display()
        ));
    }
    warnings
}

fn print_config(cfg: &EffectiveConfig) {
    println!("NETSECURE_MODEL_PATH={}", cfg.model_path);
    println!("NETSECURE_BACKUP_DIR={}", cfg.backup_dir);
    println!("NETSECURE_METRICS_PATH={}", cfg.metrics_path);
    println!("NETSECURE_STAGING_DIR={}", cfg.staging_dir);
    println!("NETSECURE_INCOMING_DIR={}", cfg.incoming_dir);
    println!("NETSECURE_SOURCE={}", source_name(cfg));
    println!("NETSECURE_SYNTHETIC_BYTES={}", cfg.synthetic_payload_bytes);
    println!("NETSECURE_UPDATE_INTERVAL={}", cfg.update_interval_secs);
    println!("NETSECURE_ERROR_BACKOFF={}", cfg.error_backoff_secs);
    println!("NETSECURE_MAX_BACKUPS={}", cfg.max_backups);
    println!("NETSECURE_MIN_ARTIFACT_SIZE={}", cfg.min_artifact_size);
    println!(
        "NETSECURE_EXPECTED_SHA256={}",
        cfg.expected_sha256.as_deref().unwrap_or("")
    );
    println!("NETSECURE_HEALTH_INTERVAL={}", cfg.health_check_interval_secs);
    println!("NETSECURE_STOP_TIMEOUT={}", cfg.stop_timeout_secs);
    println!("NETSECURE_FORCE_SKIPS_IDENTICAL={}", cfg.force_skips_identical);
    println!(
        "NETSECURE_BACKUP_FAILURE_POLICY={}",
        serde_json::to_value(cfg.backup_failure_policy)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    );
    println!("NETSECURE_AUTO_UPDATE={}", cfg.auto_update);
    println!("NETSECURE_SOCKET_PATH={}", cfg.socket_path);
}

fn source_name(cfg: &EffectiveConfig) -> &'static str {
    match cfg.source {
        config::SourceKind::Synthetic => "synthetic",
        config::SourceKind::Directory => "directory",
    }
}
