//! One-shot client for the daemon's command socket.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Write one command line, return the daemon's one-line reply
/// (`ok` or `error: <reason>`).
pub async fn send_line(socket_path: &Path, line: &str) -> Result<String> {
    let stream = UnixStream::connect(socket_path).await.with_context(|| {
        format!(
            "Failed to connect to {} (is the daemon running?)",
            socket_path.display()
        )
    })?;

    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(line.trim().as_bytes()).await?;
    write_half.write_all(b"\n").await?;
    write_half.shutdown().await?;

    let mut reply = String::new();
    BufReader::new(read_half).read_line(&mut reply).await?;
    Ok(reply.trim_end().to_string())
}
