//! Unix domain socket listener for the control protocol.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::{encode_or_error, ControlHandler, HandlerError};
use super::protocol::{read_frame, write_frame, IpcResponse, ERROR_BUSY, MAX_FRAME_BYTES};

/// Listener settings.
#[derive(Debug, Clone)]
pub struct IpcServerConfig {
    pub socket_path: PathBuf,
    pub max_connections: usize,
    pub max_frame_size: usize,
    /// Connections with no complete request for this long are closed.
    pub idle_timeout: Duration,
}

impl IpcServerConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            max_connections: 16,
            max_frame_size: MAX_FRAME_BYTES,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

pub struct IpcServer {
    config: IpcServerConfig,
    handler: ControlHandler,
}

impl IpcServer {
    pub fn new(config: IpcServerConfig, handler: ControlHandler) -> Self {
        Self { config, handler }
    }

    /// Bind the socket. A stale socket file from a previous run is replaced.
    pub fn bind(&self) -> io::Result<UnixListener> {
        let path = &self.config.socket_path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(path)?;
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(listener)
    }

    /// Accept connections until `shutdown` fires, then remove the socket file.
    pub async fn run(self, listener: UnixListener, shutdown: CancellationToken) -> io::Result<()> {
        let limiter = Arc::new(Semaphore::new(self.config.max_connections.max(1)));
        info!(path = %self.config.socket_path.display(), "control socket listening");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let stream = match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            let permit = match limiter.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(max = self.config.max_connections, "connection limit reached");
                    tokio::spawn(reject_busy(stream));
                    continue;
                }
            };

            let handler = self.handler.clone();
            let (max_frame, idle) = (self.config.max_frame_size, self.config.idle_timeout);
            let cancel = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, handler, max_frame, idle, cancel).await {
                    debug!(error = %e, "connection closed with error");
                }
                drop(permit);
            });
        }

        remove_socket(&self.config.socket_path);
        info!("control socket closed");
        Ok(())
    }
}

async fn serve_connection(
    stream: UnixStream,
    handler: ControlHandler,
    max_frame: usize,
    idle: Duration,
    cancel: CancellationToken,
) -> Result<(), HandlerError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = tokio::time::timeout(idle, read_frame(&mut reader, max_frame)) => frame,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(_) => {
                debug!(idle_ms = idle.as_millis() as u64, "closing idle connection");
                break;
            }
        };
        match frame {
            Ok(Some(bytes)) if bytes.is_empty() => continue,
            Ok(Some(bytes)) => {
                let response = handler.process(&bytes).await;
                write_frame(&mut write_half, &response).await?;
            }
            Ok(None) => break,
            Err(e) => {
                // The stream cannot be resynchronised after an oversized frame.
                let response = encode_or_error(&HandlerError::from(e).into_response());
                write_frame(&mut write_half, &response).await?;
                break;
            }
        }
    }
    Ok(())
}

async fn reject_busy(mut stream: UnixStream) {
    let response = encode_or_error(&IpcResponse::error(ERROR_BUSY, "too many connections"));
    let _ = write_frame(&mut stream, &response).await;
}

fn remove_socket(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove socket file");
        }
    }
}
