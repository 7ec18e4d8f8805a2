// Copyright 2024-2026 NetSecure Contributors
// SPDX-License-Identifier: Apache-2.0

//! Minimal control-socket client used by the CLI subcommands.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::integration::ControlResponse;
use crate::ipc::{ControlRequest, ProtocolError};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Cannot connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Daemon closed the connection without a response")]
    Closed,

    #[error("Daemon returned error {code}: {message}")]
    Server { code: u32, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Control socket is not supported on this platform")]
    Unsupported,
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Connect { .. } | CliError::Timeout(_) | CliError::Unsupported => 3,
            _ => 1,
        }
    }
}

pub struct CliIpcClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl CliIpcClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            // Forced updates and rollbacks run synchronously in the daemon.
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn send(&self, request: &ControlRequest) -> Result<ControlResponse, CliError> {
        match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(CliError::Timeout(self.timeout)),
        }
    }

    #[cfg(unix)]
    async fn exchange(&self, request: &ControlRequest) -> Result<ControlResponse, CliError> {
        use crate::ipc::{
            decode_response, encode_request, read_frame, write_frame, IpcResponse, MAX_RESPONSE_BYTES,
        };
        use tokio::io::BufReader;
        use tokio::net::UnixStream;

        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| CliError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;
        let (read_half, mut write_half) = stream.into_split();

        write_frame(&mut write_half, &encode_request(request)?).await?;

        let mut reader = BufReader::new(read_half);
        let frame = read_frame(&mut reader, MAX_RESPONSE_BYTES)
            .await?
            .ok_or(CliError::Closed)?;
        match decode_response(&frame)? {
            IpcResponse::Control(response) => Ok(response),
            IpcResponse::Error { code, message } => Err(CliError::Server { code, message }),
        }
    }

    #[cfg(not(unix))]
    async fn exchange(&self, _request: &ControlRequest) -> Result<ControlResponse, CliError> {
        Err(CliError::Unsupported)
    }
}
