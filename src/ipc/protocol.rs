//! Wire format for the control socket.
//!
//! One JSON object per line in each direction. Frames are capped at
//! [`MAX_FRAME_BYTES`]; the size check happens before parsing.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::integration::ControlResponse;

/// Largest accepted frame, excluding the trailing newline.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Largest response a client will read.
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

pub const ERROR_BAD_REQUEST: u32 = 400;
pub const ERROR_TOO_LARGE: u32 = 413;
pub const ERROR_INTERNAL: u32 = 500;
pub const ERROR_BUSY: u32 = 503;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Control operations a client can request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    Status,
    ForceUpdate,
    ToggleAutoUpdate { enabled: bool },
    Rollback,
    History {
        #[serde(default)]
        limit: Option<usize>,
    },
    Health,
}

impl ControlRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ControlRequest::Status => "status",
            ControlRequest::ForceUpdate => "force_update",
            ControlRequest::ToggleAutoUpdate { .. } => "toggle_auto_update",
            ControlRequest::Rollback => "rollback",
            ControlRequest::History { .. } => "history",
            ControlRequest::Health => "health",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Control(ControlResponse),
    Error { code: u32, message: String },
}

impl IpcResponse {
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        IpcResponse::Error {
            code,
            message: message.into(),
        }
    }
}

fn check_size(len: usize) -> Result<(), ProtocolError> {
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(())
}

pub fn encode_request(request: &ControlRequest) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(request)?;
    check_size(bytes.len())?;
    Ok(bytes)
}

pub fn decode_request(bytes: &[u8]) -> Result<ControlRequest, ProtocolError> {
    check_size(bytes.len())?;
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_response(response: &IpcResponse) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(response)?;
    if bytes.len() > MAX_RESPONSE_BYTES {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_RESPONSE_BYTES,
        });
    }
    Ok(bytes)
}

pub fn decode_response(bytes: &[u8]) -> Result<IpcResponse, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read one newline-terminated frame of at most `max` bytes.
///
/// Returns `None` at a clean end of stream.
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = max as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > max {
        return Err(ProtocolError::MessageTooLarge { size: buf.len(), max });
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(Some(buf))
}

pub async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
