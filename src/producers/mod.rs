//! Input producers.
//!
//! Each producer is an independent failure domain feeding the one bounded
//! command channel. A producer that errors is restarted with exponential
//! backoff; a full channel drops lines with a warning instead of stalling
//! the coordinator.

pub mod fifo;
pub mod socket;
pub mod stdin;
pub mod telegram;

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of the shared command channel.
pub const CHANNEL_CAPACITY: usize = 64;

const BACKOFF_INITIAL: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Push one raw line toward the coordinator. Never blocks: losing a
/// duplicate `continue` is safer than wedging the scan loop behind a slow
/// consumer.
pub fn push_line(tx: &mpsc::Sender<String>, line: String, source: &str) -> bool {
    match tx.try_send(line) {
        Ok(()) => true,
        Err(TrySendError::Full(line)) => {
            warn!(source, dropped = %line, "command channel full, dropping line");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(source, "command channel closed");
            false
        }
    }
}

/// Run a producer until shutdown, restarting it with exponential backoff
/// when it fails. A producer that returns `Ok` (e.g. stdin EOF) is done
/// for good.
pub fn supervise<F, Fut>(
    name: &'static str,
    shutdown: CancellationToken,
    make: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut backoff = BACKOFF_INITIAL;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = make() => match result {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(producer = name, error = %e, delay = ?backoff, "producer failed, restarting");
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                    }
                },
            }
        }
        debug!(producer = name, "producer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_line_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(2);
        assert!(push_line(&tx, "a".to_string(), "test"));
        assert!(push_line(&tx, "b".to_string(), "test"));
        assert!(!push_line(&tx, "c".to_string(), "test"));

        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn supervisor_restarts_failing_producer() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU32, Ordering};

        let attempts = Arc::new(AtomicU32::new(0));
        let shutdown = CancellationToken::new();
        let handle = supervise("test", shutdown.clone(), {
            let attempts = Arc::clone(&attempts);
            move || {
                let attempts = Arc::clone(&attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        anyhow::bail!("boom");
                    }
                    Ok(())
                }
            }
        });

        handle.await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn supervisor_honors_shutdown() {
        let shutdown = CancellationToken::new();
        let handle = supervise("test", shutdown.clone(), || async {
            std::future::pending::<()>().await;
            Ok(())
        });
        shutdown.cancel();
        handle.await.unwrap();
    }
}
