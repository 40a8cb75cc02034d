//! Desktop and push notifications.
//!
//! Everything here is best-effort: one attempt, failures logged at debug
//! and swallowed. The per-agent cooldown is enforced by the coordinator,
//! which owns the timestamps.

use std::time::Duration;

use tracing::debug;

use crate::config::PushoverConfig;

/// Seam for the coordinator; `Notifier` in production, a recording fake in
/// tests.
pub trait Notify: Send + Sync {
    /// Emit a notification about an agent. `elevated` marks circuit-open
    /// events so the push channel can raise their priority.
    fn notify(&self, title: &str, body: &str, elevated: bool);
}

pub struct Notifier {
    pushover: Option<PushoverConfig>,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(pushover: Option<PushoverConfig>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { pushover, http }
    }
}

impl Notify for Notifier {
    fn notify(&self, title: &str, body: &str, elevated: bool) {
        let title = title.to_string();
        let body = body.to_string();

        // notify-rust blocks on the session bus; keep it off the
        // coordinator thread.
        {
            let title = title.clone();
            let body = body.clone();
            tokio::task::spawn_blocking(move || show_desktop_notification(&title, &body));
        }

        if let Some(push) = self.pushover.clone() {
            let http = self.http.clone();
            tokio::spawn(async move {
                let payload = serde_json::json!({
                    "token": push.api_token,
                    "user": push.user_key,
                    "title": title,
                    "message": body,
                    "priority": if elevated { 1 } else { 0 },
                });
                let result = http
                    .post("https://api.pushover.net/1/messages.json")
                    .json(&payload)
                    .send()
                    .await;
                match result {
                    Ok(resp) if !resp.status().is_success() => {
                        debug!(status = %resp.status(), "push notification rejected");
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "push notification failed"),
                }
            });
        }
    }
}

/// Shows a system notification on macOS or Linux
fn show_desktop_notification(title: &str, body: &str) {
    #[cfg(target_os = "macos")]
    {
        use mac_notification_sys::{Notification, set_application};
        if let Err(e) = set_application("com.apple.Terminal") {
            debug!("Failed to set notification application: {:?}", e);
        }
        if let Err(e) = Notification::default().title(title).message(body).send() {
            debug!("Failed to send notification: {:?}", e);
        }
    }

    #[cfg(not(target_os = "macos"))]
    {
        if let Err(e) = notify_rust::Notification::new()
            .summary(title)
            .body(body)
            .show()
        {
            debug!("Failed to send notification: {:?}", e);
        }
    }
}
