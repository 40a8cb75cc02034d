//! Telegram remote control via Bot API long-polling.
//!
//! Only allow-listed sender ids may issue commands; everyone else gets a
//! polite refusal. Incoming text is prefix-normalized into the shared
//! command grammar before being pushed (`/send 1 x` → `1: x`). The update
//! cursor lives in memory: a restarted process resumes from the
//! provider's most recent offset instead of replaying history.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;
use crate::producers::push_line;

/// Server-side long-poll hold. The HTTP client timeout sits above it.
const POLL_TIMEOUT_SECS: u64 = 25;

const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    text: Option<String>,
    from: Option<User>,
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

pub async fn run(
    config: TelegramConfig,
    tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
        .build()
        .context("Failed to build HTTP client")?;
    let base = format!("https://api.telegram.org/bot{}", config.bot_token);

    let mut offset = prime_cursor(&client, &base).await;
    info!(offset, "telegram poller started");

    let mut backoff = BACKOFF_INITIAL;
    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }
        let polled = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            polled = poll_once(&client, &base, offset, &config, &tx) => polled,
        };
        match polled {
            Ok(next) => {
                offset = next;
                backoff = BACKOFF_INITIAL;
            }
            Err(e) => {
                warn!(error = %e, delay = ?backoff, "telegram poll failed");
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        }
    }
}

/// Skip everything that accumulated while the process was down.
async fn prime_cursor(client: &reqwest::Client, base: &str) -> i64 {
    let probe = serde_json::json!({ "offset": -1, "limit": 1, "timeout": 0 });
    match fetch_updates(client, base, &probe).await {
        Ok(updates) => updates.last().map(|u| u.update_id + 1).unwrap_or(0),
        Err(e) => {
            debug!(error = %e, "cursor probe failed, starting at 0");
            0
        }
    }
}

/// One long-poll round. Returns the next offset to request.
async fn poll_once(
    client: &reqwest::Client,
    base: &str,
    offset: i64,
    config: &TelegramConfig,
    tx: &mpsc::Sender<String>,
) -> Result<i64> {
    let body = serde_json::json!({ "offset": offset, "timeout": POLL_TIMEOUT_SECS });
    let updates = fetch_updates(client, base, &body).await?;

    let mut next = offset;
    for update in updates {
        next = next.max(update.update_id + 1);
        let Some(message) = update.message else {
            continue;
        };
        let Some(text) = message.text else { continue };
        let sender = message.from.as_ref().map(|u| u.id);

        if !sender.is_some_and(|id| config.allowed_user_ids.contains(&id)) {
            debug!(?sender, "refusing message from unlisted sender");
            reply(client, base, message.chat.id, "Sorry, you are not on the allow list.").await;
            continue;
        }

        if let Some(line) = normalize_command(&text) {
            push_line(tx, line, "telegram");
        }
    }
    Ok(next)
}

async fn fetch_updates(
    client: &reqwest::Client,
    base: &str,
    body: &serde_json::Value,
) -> Result<Vec<Update>> {
    let response: UpdatesResponse = client
        .post(format!("{base}/getUpdates"))
        .json(body)
        .send()
        .await
        .context("getUpdates request failed")?
        .error_for_status()
        .context("getUpdates rejected")?
        .json()
        .await
        .context("getUpdates returned malformed JSON")?;
    if !response.ok {
        anyhow::bail!("getUpdates returned ok=false");
    }
    Ok(response.result)
}

/// Best-effort reply; a failed refusal is not worth a producer restart.
async fn reply(client: &reqwest::Client, base: &str, chat_id: i64, text: &str) {
    let body = serde_json::json!({ "chat_id": chat_id, "text": text });
    if let Err(e) = client
        .post(format!("{base}/sendMessage"))
        .json(&body)
        .send()
        .await
    {
        debug!(error = %e, "sendMessage failed");
    }
}

/// Rewrite chat-style commands into the shared grammar.
///
/// `/send 1 fix the tests` becomes `1: fix the tests`; any other slash
/// command is passed through with the slash (and a `@botname` suffix)
/// stripped; plain text is forwarded untouched.
fn normalize_command(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(rest) = text.strip_prefix("/send ") {
        let rest = rest.trim_start();
        if let Some((id, payload)) = rest.split_once(char::is_whitespace) {
            return Some(format!("{}: {}", id, payload.trim_start()));
        }
        return Some(rest.to_string());
    }

    if let Some(rest) = text.strip_prefix('/') {
        let (command, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let command = command.split('@').next().unwrap_or(command);
        if args.is_empty() {
            return Some(command.to_string());
        }
        return Some(format!("{command} {args}"));
    }

    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_command_is_rewritten_to_direct_form() {
        assert_eq!(
            normalize_command("/send 1 fix the tests").as_deref(),
            Some("1: fix the tests")
        );
    }

    #[test]
    fn slash_commands_lose_the_slash() {
        assert_eq!(normalize_command("/status").as_deref(), Some("status"));
        assert_eq!(normalize_command("/auto 2").as_deref(), Some("auto 2"));
        assert_eq!(
            normalize_command("/status@muxherd_bot").as_deref(),
            Some("status")
        );
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(
            normalize_command("1: echo hello").as_deref(),
            Some("1: echo hello")
        );
        assert_eq!(normalize_command("  queue 1  ").as_deref(), Some("queue 1"));
    }

    #[test]
    fn empty_text_is_dropped() {
        assert_eq!(normalize_command("   "), None);
    }
}
