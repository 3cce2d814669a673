//! Unix-socket control server.
//!
//! Accepts one connection per CLI invocation. A connection carries
//! newline-delimited JSON requests; `Send` flips it into chat-stream
//! mode and keeps it for the relay's lifetime.

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use murmur_core::control::{self, ControlRequest, ControlResponse, ErrorCode};

use crate::daemon::Daemon;
use crate::error::DaemonError;

/// Bind the control socket, replacing a stale socket file from a dead
/// daemon. Fails when another daemon already answers on it.
pub fn bind(socket_path: &Path) -> io::Result<UnixListener> {
    if socket_path.exists() {
        if std::os::unix::net::UnixStream::connect(socket_path).is_ok() {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("daemon already running on {}", socket_path.display()),
            ));
        }
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(parent)?;
    }
    UnixListener::bind(socket_path)
}

/// Accept control connections forever.
pub async fn serve(daemon: Arc<Daemon>, listener: UnixListener) -> io::Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        tokio::spawn(handle_connection(daemon.clone(), stream));
    }
}

async fn handle_connection(daemon: Arc<Daemon>, stream: UnixStream) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "control connection read failed");
                return;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let request: ControlRequest = match control::from_line(&line) {
            Ok(request) => request,
            Err(e) => {
                let response = ControlResponse::Error {
                    code: ErrorCode::Internal,
                    message: format!("malformed request: {e}"),
                };
                let _ = write_response(&mut writer, &response).await;
                return;
            }
        };
        debug!(?request, "control request");

        if let ControlRequest::Send = request {
            match daemon.relay_handle().await {
                Ok(handle) => {
                    if write_response(&mut writer, &ControlResponse::Ok)
                        .await
                        .is_err()
                    {
                        return;
                    }
                    // The connection now belongs to the relay.
                    match handle.run(reader, writer).await {
                        Ok(()) => debug!("relay finished, frontend detached"),
                        Err(e) => warn!(error = %e, "relay ended with an error"),
                    }
                    return;
                }
                Err(e) => {
                    let _ = write_response(&mut writer, &error_response(&e)).await;
                    continue;
                }
            }
        }

        let result = dispatch(&daemon, request).await;
        let response = match result {
            Ok(()) => ControlResponse::Ok,
            Err(e) => {
                info!(error = %e, "control request failed");
                error_response(&e)
            }
        };
        if write_response(&mut writer, &response).await.is_err() {
            return;
        }
    }
}

async fn dispatch(daemon: &Arc<Daemon>, request: ControlRequest) -> Result<(), DaemonError> {
    match request {
        ControlRequest::Online {
            nats_url,
            sender_address,
        } => daemon.online(&nats_url, sender_address).await,
        ControlRequest::Offline => daemon.offline().await,
        ControlRequest::CreateChat { recipient_address } => {
            daemon.create_chat(recipient_address).await
        }
        ControlRequest::DeleteChat { recipient_address } => {
            daemon.delete_chat(&recipient_address).await
        }
        // Handled in the connection loop; reaching here is a bug.
        ControlRequest::Send => Err(DaemonError::InvalidState {
            reason: "send must own the connection".into(),
        }),
    }
}

fn error_response(err: &DaemonError) -> ControlResponse {
    ControlResponse::Error {
        code: err.code(),
        message: err.to_string(),
    }
}

async fn write_response<W>(writer: &mut W, response: &ControlResponse) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = control::to_line(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
