//! All interaction with the tmux server is funneled through here.
//!
//! Pane handles are the opaque ids tmux assigns (`%0`, `%12`): they are
//! stable across window re-ordering, which index-style targets are not.
//! Config validation rejects anything that does not look like a handle.

use thiserror::Error;
use tracing::trace;

use crate::cmd::Cmd;

/// How tmux interaction fails, as seen by the coordinator.
#[derive(Debug, Error)]
pub enum PaneError {
    /// The pane is in copy/scroll mode and cannot take keystrokes.
    #[error("pane is in copy mode")]
    CopyMode,
    /// tmux no longer knows the handle.
    #[error("pane no longer exists")]
    PaneGone,
    /// Anything expected to recover: spawn failure, deadline, server busy.
    #[error("transient tmux failure: {0}")]
    Transient(String),
}

/// Seam for the coordinator; `TmuxPanes` in production, scripted fakes in
/// tests.
pub trait Panes: Send + Sync {
    /// Last visible screenful of the pane, ANSI-stripped.
    fn capture(&self, pane_id: &str) -> Result<String, PaneError>;

    /// Inject `text` literally, then Enter, as two separate invocations.
    fn send(&self, pane_id: &str, text: &str) -> Result<(), PaneError>;

    fn in_copy_mode(&self, pane_id: &str) -> Result<bool, PaneError>;
}

pub struct TmuxPanes {
    capture_lines: u16,
}

impl TmuxPanes {
    pub fn new() -> Self {
        Self { capture_lines: 50 }
    }

    fn tmux(&self, args: &[&str]) -> Result<String, PaneError> {
        let output = Cmd::new("tmux")
            .args(args)
            .output()
            .map_err(|e| PaneError::Transient(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Panes for TmuxPanes {
    fn capture(&self, pane_id: &str) -> Result<String, PaneError> {
        let start_line = format!("-{}", self.capture_lines);
        let raw = self.tmux(&["capture-pane", "-p", "-S", &start_line, "-t", pane_id])?;
        trace!(pane = pane_id, bytes = raw.len(), "pane captured");
        Ok(strip_ansi_escapes::strip_str(&raw))
    }

    fn send(&self, pane_id: &str, text: &str) -> Result<(), PaneError> {
        if self.in_copy_mode(pane_id)? {
            return Err(PaneError::CopyMode);
        }

        // -l sends the text literally (no key-name interpretation). The
        // Enter must be a second invocation: a trailing newline inside one
        // send-keys is unreliable across terminals.
        self.tmux(&["send-keys", "-t", pane_id, "-l", text])?;
        self.tmux(&["send-keys", "-t", pane_id, "Enter"])?;
        trace!(pane = pane_id, len = text.len(), "keys sent");
        Ok(())
    }

    fn in_copy_mode(&self, pane_id: &str) -> Result<bool, PaneError> {
        let out = self.tmux(&["display-message", "-p", "-t", pane_id, "#{pane_in_mode}"])?;
        Ok(out.trim() == "1")
    }
}

/// Map a tmux failure line onto the error taxonomy. tmux phrases missing
/// panes a few different ways depending on version.
fn classify_failure(stderr: &str) -> PaneError {
    let lower = stderr.to_lowercase();
    if lower.contains("can't find pane") || lower.contains("no such pane") {
        PaneError::PaneGone
    } else {
        PaneError::Transient(stderr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_pane_is_pane_gone() {
        assert!(matches!(
            classify_failure("can't find pane: %7"),
            PaneError::PaneGone
        ));
        assert!(matches!(
            classify_failure("no such pane: %7"),
            PaneError::PaneGone
        ));
    }

    #[test]
    fn other_failures_are_transient() {
        assert!(matches!(
            classify_failure("no server running on /tmp/tmux-1000/default"),
            PaneError::Transient(_)
        ));
        assert!(matches!(classify_failure(""), PaneError::Transient(_)));
    }
}
