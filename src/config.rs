//! Configuration for the dispatcher, read from a single YAML document.
//!
//! Validation runs before any side-effecting I/O; a bad config exits with
//! a diagnostic rather than starting half a daemon.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::logger;

/// One managed agent: which pane it lives in and where it works.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentConfig {
    /// Opaque tmux pane handle (`%0`). Index-style targets are rejected:
    /// they silently re-bind when windows move.
    pub pane_id: String,
    /// Human label used in status output and notifications
    pub name: String,
    /// Absolute or ~-prefixed working directory of the agent
    pub worktree: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Sender ids allowed to issue commands; everyone else gets a refusal.
    #[serde(default)]
    pub allowed_user_ids: Vec<i64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PushoverConfig {
    pub user_key: String,
    pub api_token: String,
}

/// Configuration for the muxherd daemon, read from config.yaml
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Agent id (small positive integer) → agent definition
    #[serde(default)]
    pub agents: BTreeMap<u32, AgentConfig>,

    /// Unix socket path for the local command surface
    #[serde(default)]
    pub socket_path: Option<String>,

    /// Optional FIFO to read commands from
    #[serde(default)]
    pub fifo_path: Option<String>,

    /// Seconds between coordinator scans
    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,

    #[serde(default)]
    pub pushover: Option<PushoverConfig>,

    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

fn default_poll_interval() -> f64 {
    2.0
}

/// `%0`-style opaque handles: a marker character or letter, then digits.
fn pane_handle_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z%]\d+$").expect("pane handle regex"))
}

impl Config {
    /// Load and validate the configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config at {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            bail!("No agents configured");
        }
        for (id, agent) in &self.agents {
            if *id == 0 {
                bail!("Agent ids must be positive (got 0 for '{}')", agent.name);
            }
            if !pane_handle_re().is_match(&agent.pane_id) {
                bail!(
                    "Agent {}: pane_id '{}' is not an opaque pane handle (expected e.g. %0); \
                     index-style targets are not stable",
                    id,
                    agent.pane_id
                );
            }
            let worktree = expand_tilde(&agent.worktree);
            if !worktree.is_dir() {
                bail!(
                    "Agent {}: worktree '{}' does not exist",
                    id,
                    worktree.display()
                );
            }
        }
        if self.poll_interval <= 0.1 {
            bail!(
                "poll_interval must be greater than 0.1s (got {})",
                self.poll_interval
            );
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval)
    }

    /// Socket path, defaulting to the per-user state directory.
    pub fn socket_path(&self) -> Result<PathBuf> {
        match &self.socket_path {
            Some(p) => Ok(expand_tilde(p)),
            None => Ok(logger::state_dir()?.join("muxherd.sock")),
        }
    }

    pub fn fifo_path(&self) -> Option<PathBuf> {
        self.fifo_path.as_deref().map(expand_tilde)
    }

    pub fn worktree_path(agent: &AgentConfig) -> PathBuf {
        expand_tilde(&agent.worktree)
    }

    /// Create an example config file at the default location.
    pub fn init() -> Result<()> {
        let path = default_config_path()?;
        if path.exists() {
            bail!(
                "{} already exists. Remove it first if you want to regenerate it.",
                path.display()
            );
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let example = r#"# muxherd configuration
#
# Agents are keyed by a small positive integer; commands address them by
# that id (`1: run the tests`). pane_id is the opaque tmux handle shown by
# `tmux list-panes -F '#{pane_id}'` -- not a window index.
agents:
  1:
    pane_id: "%0"
    name: "api"
    worktree: "~/work/api"
  # 2:
  #   pane_id: "%3"
  #   name: "frontend"
  #   worktree: "~/work/frontend"

# Unix socket for local commands (`muxherd send '1: hello'`).
# Default: ~/.local/state/muxherd/muxherd.sock
# socket_path: /tmp/muxherd.sock

# Optional FIFO; every line written to it is treated as a command.
# fifo_path: /tmp/muxherd.fifo

# Seconds between pane scans.
poll_interval: 2.0

# Optional push notifications.
# pushover:
#   user_key: "..."
#   api_token: "..."

# Optional Telegram remote control. Only the listed sender ids may issue
# commands; `/send 1 <text>` becomes `1: <text>`.
# telegram:
#   bot_token: "..."
#   allowed_user_ids: [12345678]
"#;

        fs::write(&path, example)?;
        println!("Created {}", path.display());
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf> {
    let home = home::home_dir().context("Cannot determine home directory")?;
    Ok(home.join(".config").join("muxherd").join("config.yaml"))
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = home::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_yaml(worktree: &str) -> String {
        format!(
            "agents:\n  1:\n    pane_id: \"%0\"\n    name: \"api\"\n    worktree: \"{worktree}\"\n"
        )
    }

    #[test]
    fn parses_and_validates_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = base_yaml(dir.path().to_str().unwrap());
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.poll_interval, 2.0);
        assert_eq!(config.agents[&1].name, "api");
    }

    #[test]
    fn rejects_index_style_pane_target() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = base_yaml(dir.path().to_str().unwrap()).replace("%0", "0.1");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_agent_id() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = base_yaml(dir.path().to_str().unwrap()).replace("  1:", "  0:");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_missing_worktree() {
        let yaml = base_yaml("/definitely/not/a/real/path");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_tiny_poll_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut yaml = base_yaml(dir.path().to_str().unwrap());
        yaml.push_str("poll_interval: 0.05\n");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_agent_map() {
        let config: Config = serde_yaml::from_str("poll_interval: 2.0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn telegram_and_pushover_are_optional() {
        let dir = tempfile::tempdir().unwrap();
        let mut yaml = base_yaml(dir.path().to_str().unwrap());
        yaml.push_str("telegram:\n  bot_token: \"t\"\n  allowed_user_ids: [42]\n");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.telegram.unwrap().allowed_user_ids, vec![42]);
        assert!(config.pushover.is_none());
    }
}
