// Copyright 2024-2026 NetSecure Contributors
// SPDX-License-Identifier: Apache-2.0

//! Control subcommands that talk to a running daemon.
//!
//! Each returns a process exit code: 0 success, 1 failure, 3 connection error.

use crate::health::HealthState;
use crate::integration::{ControlResponse, ControlStatus};
use crate::ipc::ControlRequest;
use crate::updater::MetricsRecord;

use super::ipc_client::{CliError, CliIpcClient};

async fn call(socket_path: &str, request: ControlRequest) -> Result<ControlResponse, i32> {
    CliIpcClient::new(socket_path)
        .send(&request)
        .await
        .map_err(|e: CliError| {
            eprintln!("Error: {}", e);
            e.exit_code()
        })
}

fn finish(response: &ControlResponse) -> i32 {
    if response.success {
        println!("{}", response.message);
        0
    } else {
        eprintln!("Failed: {}", response.message);
        1
    }
}

pub async fn run_status(socket_path: &str, json_output: bool) -> i32 {
    let response = match call(socket_path, ControlRequest::Status).await {
        Ok(r) => r,
        Err(code) => return code,
    };
    if json_output {
        return print_json(&response, response.success);
    }
    match &response.status {
        Some(status) if response.success => {
            print_status(status);
            0
        }
        _ => finish(&response),
    }
}

pub async fn run_update(socket_path: &str) -> i32 {
    match call(socket_path, ControlRequest::ForceUpdate).await {
        Ok(response) => finish(&response),
        Err(code) => code,
    }
}

pub async fn run_auto(socket_path: &str, enabled: bool) -> i32 {
    match call(socket_path, ControlRequest::ToggleAutoUpdate { enabled }).await {
        Ok(response) => finish(&response),
        Err(code) => code,
    }
}

pub async fn run_rollback(socket_path: &str) -> i32 {
    match call(socket_path, ControlRequest::Rollback).await {
        Ok(response) => finish(&response),
        Err(code) => code,
    }
}

pub async fn run_history(socket_path: &str, limit: Option<usize>, json_output: bool) -> i32 {
    let response = match call(socket_path, ControlRequest::History { limit }).await {
        Ok(r) => r,
        Err(code) => return code,
    };
    if !response.success {
        return finish(&response);
    }
    let records = response.history.unwrap_or_default();
    if json_output {
        return print_json(&records, true);
    }
    if records.is_empty() {
        println!("No update history.");
    }
    for record in &records {
        print_record(record);
    }
    0
}

/// Exit 0 when healthy, 1 when degraded or unhealthy.
pub async fn run_health(socket_path: &str, json_output: bool) -> i32 {
    let response = match call(socket_path, ControlRequest::Health).await {
        Ok(r) => r,
        Err(code) => return code,
    };
    let Some(report) = response.health else {
        return finish(&response);
    };
    let healthy = report.state == HealthState::Healthy;
    if json_output {
        return print_json(&report, healthy);
    }

    println!("State:          {:?}", report.state);
    println!("Service alive:  {}", report.service_alive);
    println!("Auto-update:    {}", on_off(report.auto_update));
    println!("Polling:        {}", report.polling);
    println!("Model present:  {}", report.artifact_present);
    println!("Backups:        {}", report.backups);
    println!("Failed updates: {}", report.failed_updates);
    println!("Uptime:         {}s", report.uptime_secs);
    if healthy {
        0
    } else {
        1
    }
}

fn print_json<T: serde::Serialize>(value: &T, ok: bool) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            if ok {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn print_status(status: &ControlStatus) {
    let s = &status.updater;
    println!("Auto-update:   {}", on_off(status.auto_update));
    println!("Polling:       {}", s.running);
    match &s.last_update_time {
        Some(t) => println!("Last update:   {}", t.to_rfc3339()),
        None => println!("Last update:   never"),
    }
    println!(
        "Updates:       {} ok, {} failed",
        s.metrics.total_updates, s.metrics.failed_updates
    );
    let p = &s.metrics.model_performance;
    println!(
        "Performance:   accuracy {:.4}, recall {:.4}, f1 {:.4}",
        p.accuracy, p.recall, p.f1_score
    );
    match &s.artifact {
        Some(a) => println!(
            "Model:         {} ({} bytes, {})",
            a.path.display(),
            a.size_bytes,
            a.sha256.as_ref().map_or("not hashed yet", |d| d.as_str())
        ),
        None => println!("Model:         missing"),
    }
    println!("Backups:       {}", s.available_backups.len());
    for b in &s.available_backups {
        println!("  {}  {} bytes  {}", b.file_name, b.size_bytes, b.modified.to_rfc3339());
    }
}

fn print_record(record: &MetricsRecord) {
    let status = serde_json::to_value(record.status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    println!(
        "{}  {:<8}  {} -> {}",
        record.timestamp.to_rfc3339(),
        status,
        short_hash(&record.old_hash),
        short_hash(&record.new_hash)
    );
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}
