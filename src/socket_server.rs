use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::ipc::{IpcCommand, IpcResponse, get_socket_path};

/// A parsed client command plus the channel the daemon answers on. The
/// daemon replies after actually handling the command, so the client sees
/// real errors (no session open, invalid binding) rather than a blind Ok.
pub struct IpcRequest {
    pub command: IpcCommand,
    pub reply: oneshot::Sender<IpcResponse>,
}

/// Guard that removes the socket file when dropped
pub struct SocketGuard {
    path: PathBuf,
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if self.path.exists() {
                error!("Failed to remove socket file: {}", e);
            }
        } else {
            info!("Removed socket file at {}", self.path.display());
        }
    }
}

/// Start the IPC socket server.
/// Returns a receiver for incoming requests and a guard that cleans up the
/// socket.
pub async fn start_server() -> Result<(mpsc::UnboundedReceiver<IpcRequest>, SocketGuard)> {
    let socket_path = get_socket_path()?;

    // Remove stale socket if it exists
    if socket_path.exists() {
        info!("Removing stale socket at {}", socket_path.display());
        fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("Failed to bind socket at {}", socket_path.display()))?;

    info!("IPC socket listening at {}", socket_path.display());

    let guard = SocketGuard {
        path: socket_path.clone(),
    };
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let tx_clone = tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, tx_clone).await {
                            debug!("Client connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    });

    Ok((rx, guard))
}

/// Handle a single client connection: one command in, one response out.
async fn handle_client(
    stream: UnixStream,
    tx: mpsc::UnboundedSender<IpcRequest>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    reader.read_line(&mut line).await?;

    let response = match line.parse::<IpcCommand>() {
        Ok(command) => {
            debug!("Received IPC command: {:?}", command);
            let (reply_tx, reply_rx) = oneshot::channel();
            let request = IpcRequest {
                command,
                reply: reply_tx,
            };
            if tx.send(request).is_err() {
                IpcResponse::Error("Daemon is shutting down".to_string())
            } else {
                reply_rx
                    .await
                    .unwrap_or_else(|_| IpcResponse::Error("Daemon dropped the request".to_string()))
            }
        }
        Err(_) => {
            warn!("Unknown IPC command: {}", line.trim());
            IpcResponse::Error(format!("Unknown command: {}", line.trim()))
        }
    };

    let response_json = serde_json::to_string(&response)?;
    writer.write_all(response_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    Ok(())
}
