//! IPC module for the updater daemon.
//!
//! Newline-delimited JSON over a local Unix socket. This is the only
//! external control interface.

mod handler;
mod protocol;
#[cfg(unix)]
mod server;

pub use handler::{ControlHandler, HandlerError};
pub use protocol::{
    decode_request, decode_response, encode_request, encode_response, read_frame, write_frame,
    ControlRequest, IpcResponse, ProtocolError, ERROR_BAD_REQUEST, ERROR_BUSY, ERROR_INTERNAL,
    ERROR_TOO_LARGE, MAX_FRAME_BYTES, MAX_RESPONSE_BYTES,
};
#[cfg(unix)]
pub use server::{IpcServer, IpcServerConfig};
