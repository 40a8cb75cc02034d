//! Per-agent state: pane binding, circuit breaker, task queue.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Consecutive no-progress transitions after which the circuit opens.
pub const NO_PROGRESS_LIMIT: u32 = 3;

/// Observed state of an agent's pane, as classified by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneState {
    /// The agent is actively processing
    Working,
    /// The agent is idle at its prompt
    Ready,
    /// The pane could not be classified (or captured)
    Unknown,
}

impl fmt::Display for PaneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaneState::Working => write!(f, "working"),
            PaneState::Ready => write!(f, "ready"),
            PaneState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Circuit breaker latch guarding auto-continue.
///
/// Stored as lowercase strings in the snapshot ("closed", "open").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

/// One managed coding-assistant session living in a tmux pane.
///
/// Identity fields (`pane_id`, `name`, `worktree`) come from configuration
/// and are write-once. `auto_enabled`, `circuit`, `no_progress_streak` and
/// `queue` survive restarts via the snapshot; the rest is rebuilt from
/// observation.
#[derive(Debug)]
pub struct Agent {
    pub id: u32,
    pub pane_id: String,
    pub name: String,
    pub worktree: PathBuf,
    pub auto_enabled: bool,
    pub circuit: CircuitState,
    pub no_progress_streak: u32,
    pub last_fingerprint: Option<String>,
    pub last_state: PaneState,
    pub last_notified: Option<Instant>,
    pub queue: VecDeque<String>,
    pub last_dispatched: Option<String>,
}

impl Agent {
    pub fn new(id: u32, pane_id: String, name: String, worktree: PathBuf) -> Self {
        Self {
            id,
            pane_id,
            name,
            worktree,
            auto_enabled: false,
            circuit: CircuitState::Closed,
            no_progress_streak: 0,
            last_fingerprint: None,
            last_state: PaneState::Unknown,
            last_notified: None,
            queue: VecDeque::new(),
            last_dispatched: None,
        }
    }

    /// Record a transition with an unchanged fingerprint. Returns true if
    /// the circuit opened on this observation.
    pub fn record_no_progress(&mut self) -> bool {
        self.no_progress_streak += 1;
        if self.no_progress_streak >= NO_PROGRESS_LIMIT && self.circuit == CircuitState::Closed {
            self.circuit = CircuitState::Open;
            return true;
        }
        false
    }

    /// Record a transition with a fresh fingerprint.
    pub fn record_progress(&mut self, fingerprint: String) {
        self.no_progress_streak = 0;
        self.last_fingerprint = Some(fingerprint);
    }

    /// `reset N`: close the circuit and clear the streak.
    pub fn reset_circuit(&mut self) {
        self.circuit = CircuitState::Closed;
        self.no_progress_streak = 0;
    }

    /// `progress N mark`: clear the streak only. The circuit stays latched
    /// until an explicit reset.
    pub fn mark_progress(&mut self) {
        self.no_progress_streak = 0;
    }

    /// Whether the coordinator may auto-dispatch (queue head or `continue`).
    pub fn can_auto_dispatch(&self) -> bool {
        self.circuit == CircuitState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> Agent {
        Agent::new(1, "%0".to_string(), "one".to_string(), PathBuf::from("/tmp"))
    }

    #[test]
    fn circuit_opens_at_limit() {
        let mut a = agent();
        assert!(!a.record_no_progress());
        assert!(!a.record_no_progress());
        assert!(a.record_no_progress());
        assert_eq!(a.circuit, CircuitState::Open);
        assert_eq!(a.no_progress_streak, 3);
    }

    #[test]
    fn circuit_opens_only_once() {
        let mut a = agent();
        for _ in 0..3 {
            a.record_no_progress();
        }
        // Further no-progress observations grow the streak but do not
        // re-report an opening.
        assert!(!a.record_no_progress());
        assert_eq!(a.no_progress_streak, 4);
        assert_eq!(a.circuit, CircuitState::Open);
    }

    #[test]
    fn progress_resets_streak_but_not_circuit() {
        let mut a = agent();
        for _ in 0..3 {
            a.record_no_progress();
        }
        a.record_progress("F1".to_string());
        assert_eq!(a.no_progress_streak, 0);
        assert_eq!(a.last_fingerprint.as_deref(), Some("F1"));
        // Opening is monotone within a run until an explicit reset.
        assert_eq!(a.circuit, CircuitState::Open);
    }

    #[test]
    fn mark_progress_leaves_circuit_latched() {
        let mut a = agent();
        for _ in 0..3 {
            a.record_no_progress();
        }
        a.mark_progress();
        assert_eq!(a.no_progress_streak, 0);
        assert_eq!(a.circuit, CircuitState::Open);
    }

    #[test]
    fn reset_clears_both() {
        let mut a = agent();
        for _ in 0..3 {
            a.record_no_progress();
        }
        a.reset_circuit();
        assert_eq!(a.circuit, CircuitState::Closed);
        assert_eq!(a.no_progress_streak, 0);
        assert!(a.can_auto_dispatch());
    }
}
