//! Daemon assembly: config, snapshot, producers, coordinator, teardown.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::notify::Notifier;
use crate::pane::TmuxPanes;
use crate::producers::{self, fifo, socket, stdin, telegram};
use crate::progress::GitProgress;
use crate::store::StateStore;

/// Orderly teardown gets this long; afterwards remaining tasks are
/// dropped with the runtime.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    which::which("tmux").context("tmux not found in PATH")?;

    let store = StateStore::new()?;
    let snapshot = store.load().context("Failed to load state snapshot")?;
    for id in snapshot.agents.keys() {
        if !config.agents.contains_key(id) {
            warn!(
                agent = *id,
                "snapshot entry has no configured agent; it will be dropped on the next save"
            );
        }
    }

    let mut agents = BTreeMap::new();
    for (id, agent_config) in &config.agents {
        let mut agent = Agent::new(
            *id,
            agent_config.pane_id.clone(),
            agent_config.name.clone(),
            Config::worktree_path(agent_config),
        );
        snapshot.restore(&mut agent);
        agents.insert(*id, agent);
    }
    info!(agents = agents.len(), "muxherd daemon starting");

    let shutdown = CancellationToken::new();
    let (tx, rx) = mpsc::channel(producers::CHANNEL_CAPACITY);
    let mut handles = Vec::new();

    let socket_path = config.socket_path()?;
    handles.push(producers::supervise("socket", shutdown.clone(), {
        let path = socket_path.clone();
        let tx = tx.clone();
        let shutdown = shutdown.clone();
        move || socket::run(path.clone(), tx.clone(), shutdown.clone())
    }));

    if let Some(telegram_config) = config.telegram.clone() {
        handles.push(producers::supervise("telegram", shutdown.clone(), {
            let tx = tx.clone();
            let shutdown = shutdown.clone();
            move || telegram::run(telegram_config.clone(), tx.clone(), shutdown.clone())
        }));
    }

    let mut owned_fifo = None;
    if let Some(fifo_path) = config.fifo_path() {
        if fifo::ensure(&fifo_path)? {
            owned_fifo = Some(fifo_path.clone());
        }
        handles.push(producers::supervise("fifo", shutdown.clone(), {
            let tx = tx.clone();
            let shutdown = shutdown.clone();
            move || fifo::run(fifo_path.clone(), tx.clone(), shutdown.clone())
        }));
    }

    if stdin::is_interactive() {
        handles.push(producers::supervise("stdin", shutdown.clone(), {
            let tx = tx.clone();
            let shutdown = shutdown.clone();
            move || stdin::run(tx.clone(), shutdown.clone())
        }));
        println!("muxherd ready; type `help` for commands");
    }
    drop(tx);

    spawn_signal_watcher(shutdown.clone());

    let coordinator = Coordinator::new(
        agents,
        Arc::new(TmuxPanes::new()),
        Arc::new(GitProgress),
        Arc::new(Notifier::new(config.pushover.clone())),
        store,
        config.poll_interval(),
        shutdown.clone(),
    );
    coordinator.run(rx).await?;

    shutdown.cancel();
    let teardown = async move {
        for handle in handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_DEADLINE, teardown).await.is_err() {
        warn!("producers did not stop within the shutdown deadline");
    }

    if let Err(e) = std::fs::remove_file(&socket_path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(error = %e, "failed to remove socket file");
    }
    if let Some(path) = owned_fifo
        && let Err(e) = std::fs::remove_file(&path)
    {
        warn!(error = %e, "failed to remove FIFO");
    }

    info!("muxherd daemon stopped");
    Ok(())
}

fn spawn_signal_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = term.recv() => info!("SIGTERM received"),
        }
        shutdown.cancel();
    });
}
