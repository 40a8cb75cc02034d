//! Interactive command surface: stdin lines mirror the socket grammar.
//!
//! Only active when the daemon runs attached to a terminal; the
//! coordinator prints `status`/`help` output and diagnostics to stdout.

use std::io::IsTerminal;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::producers::push_line;

pub fn is_interactive() -> bool {
    std::io::stdin().is_terminal()
}

pub async fn run(tx: mpsc::Sender<String>, shutdown: CancellationToken) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = lines.next_line() => match line? {
                Some(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        push_line(&tx, line.to_string(), "stdin");
                    }
                }
                // Terminal hung up; nothing to restart.
                None => return Ok(()),
            },
        }
    }
}
