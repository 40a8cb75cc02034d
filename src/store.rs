//! Persistent state snapshots.
//!
//! One small JSON document holds everything that must survive a restart:
//! per-agent auto-continue flag, circuit state, no-progress streak, and the
//! task queue. Saves are atomic (write-temp-then-rename) so a reader after
//! a crash sees either the prior snapshot or the new one, never a partial
//! write.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::agent::{Agent, CircuitState};
use crate::logger;

/// Current snapshot schema version. Older snapshots are migrated
/// best-effort (missing fields take defaults); newer ones abort.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot version {0} is newer than this binary supports ({SNAPSHOT_VERSION})")]
    NewerVersion(u32),
    #[error("snapshot is unreadable: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Persisted slice of one agent's state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentSnapshot {
    #[serde(default)]
    pub auto_enabled: bool,
    #[serde(default)]
    pub circuit_state: CircuitState,
    #[serde(default)]
    pub no_progress_streak: u32,
    #[serde(default)]
    pub task_queue: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    #[serde(default)]
    pub agents: BTreeMap<u32, AgentSnapshot>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            agents: BTreeMap::new(),
        }
    }

    /// Capture the persisted fields of every agent.
    pub fn capture(agents: &BTreeMap<u32, Agent>) -> Self {
        let agents = agents
            .iter()
            .map(|(id, agent)| {
                (
                    *id,
                    AgentSnapshot {
                        auto_enabled: agent.auto_enabled,
                        circuit_state: agent.circuit,
                        no_progress_streak: agent.no_progress_streak,
                        task_queue: agent.queue.iter().cloned().collect(),
                    },
                )
            })
            .collect();
        Self {
            version: SNAPSHOT_VERSION,
            agents,
        }
    }

    /// Restore persisted fields onto an agent reconstructed from config.
    pub fn restore(&self, agent: &mut Agent) {
        if let Some(snap) = self.agents.get(&agent.id) {
            agent.auto_enabled = snap.auto_enabled;
            agent.circuit = snap.circuit_state;
            agent.no_progress_streak = snap.no_progress_streak;
            agent.queue = snap.task_queue.iter().cloned().collect();
        }
    }
}

/// Owns all snapshot file I/O. Only the coordinator calls `save`.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            path: logger::state_dir()?.join("state.json"),
        })
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read the snapshot. A missing file is an empty snapshot; anything
    /// unreadable or from a newer schema aborts startup.
    pub fn load(&self) -> Result<Snapshot, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no snapshot, starting fresh");
                return Ok(Snapshot::empty());
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot =
            serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(StoreError::NewerVersion(snapshot.version));
        }
        if snapshot.version < SNAPSHOT_VERSION {
            warn!(
                found = snapshot.version,
                current = SNAPSHOT_VERSION,
                "migrating older snapshot; unknown fields defaulted"
            );
        }
        Ok(snapshot)
    }

    /// Atomically replace the snapshot on disk.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let tmp = tempfile::NamedTempFile::new_in(&dir)?;
        fs::write(tmp.path(), json)?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        debug!(path = %self.path.display(), "snapshot saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn store_in(dir: &Path) -> StateStore {
        StateStore::with_path(dir.join("state.json"))
    }

    fn sample() -> Snapshot {
        let mut agents = BTreeMap::new();
        agents.insert(
            1,
            AgentSnapshot {
                auto_enabled: true,
                circuit_state: CircuitState::Open,
                no_progress_streak: 3,
                task_queue: vec!["Q1".to_string(), "Q2".to_string()],
            },
        );
        Snapshot {
            version: SNAPSHOT_VERSION,
            agents,
        }
    }

    #[test]
    fn missing_file_is_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = store_in(dir.path()).load().unwrap();
        assert_eq!(snapshot, Snapshot::empty());
    }

    #[test]
    fn round_trip_preserves_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let snapshot = sample();
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), snapshot);
    }

    #[test]
    fn save_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.save(&sample()).unwrap();

        let mut next = sample();
        next.agents.get_mut(&1).unwrap().task_queue.clear();
        store.save(&next).unwrap();
        assert_eq!(store.load().unwrap(), next);
    }

    #[test]
    fn newer_version_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"version": 99, "agents": {}}"#).unwrap();
        let err = StateStore::with_path(path).load().unwrap_err();
        assert!(matches!(err, StoreError::NewerVersion(99)));
    }

    #[test]
    fn corrupt_snapshot_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json {{{").unwrap();
        let err = StateStore::with_path(path).load().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn older_version_migrates_recognized_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        // A hypothetical v0 snapshot without streaks or queues.
        fs::write(
            &path,
            r#"{"version": 0, "agents": {"1": {"auto_enabled": true}}}"#,
        )
        .unwrap();
        let snapshot = StateStore::with_path(path).load().unwrap();
        let agent = &snapshot.agents[&1];
        assert!(agent.auto_enabled);
        assert_eq!(agent.circuit_state, CircuitState::Closed);
        assert_eq!(agent.no_progress_streak, 0);
        assert!(agent.task_queue.is_empty());
    }

    #[test]
    fn restore_applies_persisted_fields_only() {
        let snapshot = sample();
        let mut agent = Agent::new(
            1,
            "%0".to_string(),
            "api".to_string(),
            PathBuf::from("/tmp"),
        );
        snapshot.restore(&mut agent);
        assert!(agent.auto_enabled);
        assert_eq!(agent.circuit, CircuitState::Open);
        assert_eq!(agent.no_progress_streak, 3);
        assert_eq!(
            agent.queue.iter().cloned().collect::<Vec<_>>(),
            vec!["Q1".to_string(), "Q2".to_string()]
        );
        // Transient fields stay at their defaults.
        assert_eq!(agent.last_state, crate::agent::PaneState::Unknown);
        assert!(agent.last_fingerprint.is_none());
    }
}
