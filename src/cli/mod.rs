// Copyright 2024-2026 NetSecure Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI module for the updater daemon's client subcommands.
//!
//! ## Usage
//!
//! ```bash
//! netsecure-updater status          # Show updater status
//! netsecure-updater update          # Force an update cycle
//! netsecure-updater auto on|off     # Toggle automatic updates
//! netsecure-updater rollback        # Restore the newest backup
//! netsecure-updater history -n 10   # Show recent update records
//! netsecure-updater health          # Exit 0 on healthy
//! ```

pub mod commands;
pub mod config_cmd;
pub mod ipc_client;

pub use commands::{run_auto, run_health, run_history, run_rollback, run_status, run_update};
pub use ipc_client::{CliError, CliIpcClient};

pub use crate::config::DEFAULT_SOCKET_PATH;

/// Get socket path from environment or use default.
pub fn get_socket_path() -> String {
    std::env::var("NETSECURE_SOCKET_PATH")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_socket_path_default_and_override() {
        let _lock = crate::config::ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        std::env::remove_var("NETSECURE_SOCKET_PATH");
        assert_eq!(get_socket_path(), DEFAULT_SOCKET_PATH);

        std::env::set_var("NETSECURE_SOCKET_PATH", "/custom/updater.sock");
        assert_eq!(get_socket_path(), "/custom/updater.sock");
        std::env::remove_var("NETSECURE_SOCKET_PATH");
    }
}
