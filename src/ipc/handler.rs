//! Request/response handling for control connections.

use thiserror::Error;
use tracing::{debug, error};

use super::protocol::{
    decode_request, encode_response, ControlRequest, IpcResponse, ProtocolError,
    ERROR_BAD_REQUEST, ERROR_INTERNAL, ERROR_TOO_LARGE,
};
use crate::integration::{ControlResponse, UpdateIntegration};

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl HandlerError {
    pub fn code(&self) -> u32 {
        match self {
            HandlerError::Protocol(ProtocolError::MessageTooLarge { .. }) => ERROR_TOO_LARGE,
            HandlerError::Protocol(ProtocolError::Io(_)) => ERROR_INTERNAL,
            HandlerError::Protocol(_) => ERROR_BAD_REQUEST,
        }
    }

    pub fn into_response(self) -> IpcResponse {
        IpcResponse::error(self.code(), self.to_string())
    }
}

/// Dispatches decoded requests to the integration facade.
#[derive(Clone)]
pub struct ControlHandler {
    integration: UpdateIntegration,
}

impl ControlHandler {
    pub fn new(integration: UpdateIntegration) -> Self {
        Self { integration }
    }

    /// Process one request frame and return the response frame.
    pub async fn process(&self, bytes: &[u8]) -> Vec<u8> {
        let response = match decode_request(bytes) {
            Ok(request) => IpcResponse::Control(self.dispatch(request).await),
            Err(e) => HandlerError::from(e).into_response(),
        };
        encode_or_error(&response)
    }

    pub async fn dispatch(&self, request: ControlRequest) -> ControlResponse {
        debug!(request = request.name(), "control request");
        match request {
            ControlRequest::Status => self.integration.status().await,
            ControlRequest::ForceUpdate => self.integration.force_update().await,
            ControlRequest::ToggleAutoUpdate { enabled } => {
                self.integration.toggle_auto_update(enabled).await
            }
            ControlRequest::Rollback => self.integration.rollback().await,
            ControlRequest::History { limit } => self.integration.history(limit).await,
            ControlRequest::Health => self.integration.health().await,
        }
    }
}

pub(super) fn encode_or_error(response: &IpcResponse) -> Vec<u8> {
    match encode_response(response) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to encode response");
            let fallback = IpcResponse::error(ERROR_INTERNAL, "response encoding failed");
            encode_response(&fallback).unwrap_or_default()
        }
    }
}
