//! Optional FIFO command input.
//!
//! Every line written to the pipe is pushed to the coordinator. The
//! receiver is opened non-blocking and reopened after writer-side EOF, so
//! `echo "1: hi" > fifo` works repeatedly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use nix::sys::stat::Mode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::producers::push_line;

/// Pause before reopening after EOF; without a writer attached the pipe
/// reads EOF immediately and this would otherwise spin.
const REOPEN_DELAY: Duration = Duration::from_millis(500);

/// Create the FIFO if it does not exist. Returns true when this process
/// created it, in which case the daemon unlinks it again on exit.
pub fn ensure(path: &Path) -> Result<bool> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::metadata(path) {
        Ok(meta) => {
            if !meta.file_type().is_fifo() {
                bail!("{} exists and is not a FIFO", path.display());
            }
            Ok(false)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR)
                .with_context(|| format!("Failed to create FIFO at {}", path.display()))?;
            info!(path = %path.display(), "created command FIFO");
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn run(
    path: PathBuf,
    tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        let receiver = pipe::OpenOptions::new()
            .open_receiver(&path)
            .with_context(|| format!("Failed to open FIFO at {}", path.display()))?;
        let mut lines = BufReader::new(receiver).lines();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            push_line(&tx, line.to_string(), "fifo");
                        }
                    }
                    // Writer closed; reopen for the next one.
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "fifo read error, reopening");
                        break;
                    }
                },
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(REOPEN_DELAY) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn ensure_rejects_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-fifo");
        std::fs::write(&path, b"x").unwrap();
        assert!(ensure(&path).is_err());
    }

    #[test]
    fn ensure_creates_then_adopts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fifo");
        assert!(ensure(&path).unwrap());
        assert!(!ensure(&path).unwrap());
    }

    #[tokio::test]
    async fn lines_written_to_the_fifo_are_pushed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fifo");
        ensure(&path).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let reader = tokio::spawn(run(path.clone(), tx, shutdown.clone()));

        // The sender side can only open once the reader task holds the
        // other end; retry briefly.
        let mut sender = loop {
            match pipe::OpenOptions::new().open_sender(&path) {
                Ok(sender) => break sender,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        sender.write_all(b"status\n1: hello\n").await.unwrap();
        drop(sender);

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("status"));
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(second.as_deref(), Some("1: hello"));

        shutdown.cancel();
        let _ = reader.await;
    }
}
