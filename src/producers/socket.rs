//! Local command surface: a Unix stream socket with a one-line protocol.
//!
//! Per connection the client writes a single `\n`-terminated command; the
//! server answers `ok\n` when the line parsed and was handed to the
//! coordinator, `error: <reason>\n` otherwise, and closes.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::parser::{self, Command};
use crate::producers::push_line;

/// Simultaneous connections served; beyond this, accepts wait.
const MAX_CONNECTIONS: usize = 8;

/// Whole-connection deadline: read, reply, close.
const CONNECTION_DEADLINE: Duration = Duration::from_secs(5);

pub async fn run(
    path: PathBuf,
    tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    // A stale endpoint from a previous run would make bind fail.
    match fs::remove_file(&path) {
        Ok(()) => debug!(path = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).context("Failed to remove stale socket"),
    }

    let listener = UnixListener::bind(&path)
        .with_context(|| format!("Failed to bind socket at {}", path.display()))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
        .context("Failed to restrict socket permissions")?;
    info!(path = %path.display(), "command socket listening");

    let permits = Arc::new(Semaphore::new(MAX_CONNECTIONS));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("accept failed")?;
                let permit = Arc::clone(&permits)
                    .acquire_owned()
                    .await
                    .context("connection semaphore closed")?;
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let served = tokio::time::timeout(
                        CONNECTION_DEADLINE,
                        handle_connection(stream, tx),
                    )
                    .await;
                    match served {
                        Ok(Err(e)) => debug!(error = %e, "connection error"),
                        Err(_) => debug!("connection deadline exceeded"),
                        Ok(Ok(())) => {}
                    }
                });
            }
        }
    }
    Ok(())
}

async fn handle_connection(stream: UnixStream, tx: mpsc::Sender<String>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut line = String::new();
    BufReader::new(read_half).read_line(&mut line).await?;
    let line = line.trim().to_string();

    let reply = match parser::parse(&line) {
        Command::Invalid(reason) => format!("error: {reason}\n"),
        _ => {
            if push_line(&tx, line, "socket") {
                "ok\n".to_string()
            } else {
                "error: command channel full\n".to_string()
            }
        }
    };
    write_half.write_all(reply.as_bytes()).await?;
    write_half.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send_over(path: &std::path::Path, line: &str) -> String {
        let mut stream = UnixStream::connect(path).await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        let mut reply = String::new();
        BufReader::new(stream).read_line(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn accepts_command_and_acks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muxherd.sock");
        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(run(path.clone(), tx, shutdown.clone()));

        // Wait for the socket to appear.
        for _ in 0..50 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let reply = send_over(&path, "1: echo hello").await;
        assert_eq!(reply, "ok\n");
        assert_eq!(rx.recv().await.as_deref(), Some("1: echo hello"));

        let reply = send_over(&path, "gibberish").await;
        assert!(reply.starts_with("error: "));

        shutdown.cancel();
        let _ = server.await;
    }

    #[tokio::test]
    async fn replaces_stale_socket_file() {
        use std::os::unix::fs::FileTypeExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muxherd.sock");
        fs::write(&path, b"stale").unwrap();

        let (tx, _rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(run(path.clone(), tx, shutdown.clone()));
        for _ in 0..50 {
            if fs::metadata(&path)
                .map(|m| m.file_type().is_socket())
                .unwrap_or(false)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(fs::metadata(&path).unwrap().file_type().is_socket());

        shutdown.cancel();
        let _ = server.await;
    }
}
