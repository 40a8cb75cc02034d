//! External progress evidence.
//!
//! The only signal that an agent accomplished anything is its worktree:
//! a hash over `git status` and the HEAD commit. Prose in the pane cannot
//! fake it, and the coordinator never needs to understand agent output.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;

use tracing::debug;

use crate::cmd::Cmd;

/// Seam for the coordinator; `GitProgress` in production.
pub trait Progress: Send + Sync {
    /// Opaque fingerprint of the worktree, or `None` when it cannot be
    /// determined. Equal strings mean no progress; `None` means unknown
    /// and must leave the no-progress streak untouched.
    fn fingerprint(&self, dir: &Path) -> Option<String>;
}

pub struct GitProgress;

impl Progress for GitProgress {
    fn fingerprint(&self, dir: &Path) -> Option<String> {
        let status = Cmd::new("git")
            .args(&["status", "--porcelain"])
            .workdir(dir)
            .run_and_capture_stdout();
        let head = Cmd::new("git")
            .args(&["rev-parse", "HEAD"])
            .workdir(dir)
            .run_and_capture_stdout();

        match (status, head) {
            (Ok(status), Ok(head)) => Some(digest(&status, &head)),
            (status, head) => {
                debug!(
                    dir = %dir.display(),
                    status_ok = status.is_ok(),
                    head_ok = head.is_ok(),
                    "fingerprint unavailable"
                );
                None
            }
        }
    }
}

fn digest(status: &str, head: &str) -> String {
    let mut hasher = DefaultHasher::new();
    status.hash(&mut hasher);
    head.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        assert_eq!(digest("", "abc123"), digest("", "abc123"));
    }

    #[test]
    fn digest_tracks_both_inputs() {
        let base = digest(" M src/main.rs", "abc123");
        assert_ne!(digest(" M src/lib.rs", "abc123"), base);
        assert_ne!(digest(" M src/main.rs", "def456"), base);
    }
}
