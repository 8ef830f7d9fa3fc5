//! Local control socket.
//!
//! A Unix stream socket accepting newline-terminated text commands:
//! `RUN` reprocesses the incoming queue and answers once the cycle (and the
//! reindexing it triggered) completed; `DIE` starts an orderly shutdown.
//! This is the daemon's only network-facing surface and is local-only.

use crate::worker::WorkerCommand;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Start serving the control socket at `socket_path`.
pub async fn serve(
    socket_path: PathBuf,
    worker_tx: mpsc::Sender<WorkerCommand>,
    cancel: CancellationToken,
) -> io::Result<()> {
    // a previous run may have left its socket behind
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    debug!("control socket listening on {}", socket_path.display());

    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => stream,
                Err(e) => {
                    error!("control socket accept failed: {}", e);
                    continue;
                }
            },
        };
        if let Err(e) = handle_connection(stream, &worker_tx, &cancel).await {
            error!("control request failed: {}", e);
        }
    }
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

async fn handle_connection(
    stream: UnixStream,
    worker_tx: &mpsc::Sender<WorkerCommand>,
    cancel: &CancellationToken,
) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut line = String::new();
    BufReader::new(read_half).read_line(&mut line).await?;
    let request = line.trim();
    debug!("got control request {:?}", request);

    match request {
        "RUN" => {
            let (ack_tx, ack_rx) = oneshot::channel();
            if worker_tx
                .send(WorkerCommand::Run(ack_tx))
                .await
                .is_err()
            {
                write_half.write_all(b"500 Worker unavailable\n").await?;
                return Ok(());
            }
            tokio::select! {
                _ = ack_rx => {
                    write_half.write_all(b"200 Reprocessing complete\n").await?;
                }
                _ = cancel.cancelled() => {
                    write_half.write_all(b"500 Shutting down\n").await?;
                }
            }
        }
        "DIE" => {
            write_half.write_all(b"200 Beginning shutdown\n").await?;
            cancel.cancel();
        }
        _ => {
            write_half.write_all(b"500 Unknown request\n").await?;
        }
    }
    Ok(())
}

/// Send one command to a running daemon and return its response line.
pub async fn send_command(socket_path: &Path, command: &str) -> io::Result<String> {
    let stream = UnixStream::connect(socket_path).await?;
    let (read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(format!("{}\n", command).as_bytes())
        .await?;
    let mut response = String::new();
    BufReader::new(read_half).read_line(&mut response).await?;
    Ok(response.trim_end().to_string())
}
