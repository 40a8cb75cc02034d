//! The coordinator: sole owner of agent state.
//!
//! Producers push raw command lines into a bounded channel; the
//! coordinator consumes it, and a tick timer drives the periodic pane
//! scan. Every mutation of per-agent state happens on this task, so there
//! is nothing to lock.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{Agent, PaneState};
use crate::detect;
use crate::notify::Notify;
use crate::pane::{PaneError, Panes};
use crate::parser::{self, Command};
use crate::progress::Progress;
use crate::store::{Snapshot, StateStore};

/// Minimum spacing between notifications for one agent.
pub const NOTIFY_COOLDOWN: Duration = Duration::from_secs(30);

/// Pause before the single retry of a transient pane operation.
const TRANSIENT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// The literal nudge sent by auto-continue.
const CONTINUE_TEXT: &str = "continue";

pub struct Coordinator {
    agents: BTreeMap<u32, Agent>,
    panes: Arc<dyn Panes>,
    progress: Arc<dyn Progress>,
    notifier: Arc<dyn Notify>,
    store: StateStore,
    poll_interval: Duration,
    shutdown: CancellationToken,
    dirty: bool,
}

impl Coordinator {
    pub fn new(
        agents: BTreeMap<u32, Agent>,
        panes: Arc<dyn Panes>,
        progress: Arc<dyn Progress>,
        notifier: Arc<dyn Notify>,
        store: StateStore,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            agents,
            panes,
            progress,
            notifier,
            store,
            poll_interval,
            shutdown,
            dirty: false,
        }
    }

    /// Main loop: commands are handled as they arrive, the tick drives the
    /// scan, and the cancellation token ends the run. Saves are coalesced
    /// to at most one per iteration.
    pub async fn run(mut self, mut rx: mpsc::Receiver<String>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                line = rx.recv() => match line {
                    Some(line) => self.handle_line(&line).await,
                    None => break,
                },
                _ = ticker.tick() => self.scan().await,
            }
            self.save_if_dirty();
        }

        // Drain whatever arrived during shutdown, then do a final save.
        while let Ok(line) = rx.try_recv() {
            self.handle_line(&line).await;
        }
        self.dirty = true;
        self.save_if_dirty();
        info!("coordinator stopped");
        Ok(())
    }

    // ── Command handling ─────────────────────────────────────────────

    async fn handle_line(&mut self, line: &str) {
        debug!(line, "command received");
        match parser::parse(line) {
            Command::Quit => {
                info!("quit requested");
                self.shutdown.cancel();
            }
            Command::Help => println!("{}", parser::HELP_TEXT),
            Command::Status => self.print_status(),
            Command::Auto(id) => self.set_auto(id, true),
            Command::Stop(id) => self.set_auto(id, false),
            Command::Reset(id) => {
                if let Some(agent) = agent_mut(&mut self.agents, id) {
                    agent.reset_circuit();
                    info!(agent = id, "circuit reset");
                    self.dirty = true;
                }
            }
            Command::MarkProgress(id) => {
                if let Some(agent) = agent_mut(&mut self.agents, id) {
                    agent.mark_progress();
                    info!(agent = id, "progress marked");
                    self.dirty = true;
                }
            }
            Command::QueueShow(id) => {
                if let Some(agent) = self.agents.get(&id) {
                    if agent.queue.is_empty() {
                        println!("agent {id}: queue empty");
                    } else {
                        for (i, task) in agent.queue.iter().enumerate() {
                            println!("agent {id} [{i}]: {task}");
                        }
                    }
                }
            }
            Command::QueuePush(id, text) => {
                if let Some(agent) = agent_mut(&mut self.agents, id) {
                    agent.queue.push_back(text);
                    info!(agent = id, depth = agent.queue.len(), "task queued");
                    self.dirty = true;
                }
            }
            Command::QueueClear(id) => {
                if let Some(agent) = agent_mut(&mut self.agents, id) {
                    let dropped = agent.queue.len();
                    agent.queue.clear();
                    info!(agent = id, dropped, "queue cleared");
                    self.dirty = true;
                }
            }
            Command::Send { id, payload } => self.handle_send(id, &payload).await,
            Command::Invalid(reason) => {
                warn!(line, %reason, "rejected command");
                eprintln!("error: {reason}");
            }
        }
    }

    fn set_auto(&mut self, id: u32, enabled: bool) {
        if let Some(agent) = agent_mut(&mut self.agents, id) {
            agent.auto_enabled = enabled;
            info!(agent = id, enabled, "auto-continue toggled");
            self.dirty = true;
        }
    }

    /// Direct send: the payload splits on `|` into an immediate head and
    /// queued tail. A head that cannot be injected right now is re-headed
    /// onto the queue rather than lost.
    async fn handle_send(&mut self, id: u32, payload: &str) {
        if !self.agents.contains_key(&id) {
            warn!(agent = id, "unknown agent id");
            eprintln!("error: unknown agent id {id}");
            return;
        }

        let mut parts = payload
            .split('|')
            .map(str::trim)
            .filter(|part| !part.is_empty());
        let Some(head) = parts.next().map(str::to_string) else {
            warn!(agent = id, "empty payload");
            return;
        };
        let tail: Vec<String> = parts.map(str::to_string).collect();
        if !tail.is_empty()
            && let Some(agent) = self.agents.get_mut(&id)
        {
            agent.queue.extend(tail.iter().cloned());
            self.dirty = true;
        }

        let pane_id = self.agents[&id].pane_id.clone();
        let outcome = self.send_with_retry(&pane_id, &head).await;
        let Some(agent) = self.agents.get_mut(&id) else {
            return;
        };
        match outcome {
            Ok(()) => {
                agent.last_dispatched = Some(head);
                agent.last_state = PaneState::Working;
            }
            Err(PaneError::PaneGone) => {
                warn!(agent = id, "pane gone, direct send dropped");
                agent.last_state = PaneState::Unknown;
            }
            Err(e) => {
                // Keep ordering: the failed head goes back in front of any
                // tail that was just queued.
                warn!(agent = id, error = %e, "direct send deferred to queue");
                agent.queue.push_front(head);
                self.dirty = true;
            }
        }
    }

    // ── Scan ─────────────────────────────────────────────────────────

    async fn scan(&mut self) {
        let ids: Vec<u32> = self.agents.keys().copied().collect();
        for id in ids {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.scan_agent(id).await;
        }
    }

    async fn scan_agent(&mut self, id: u32) {
        let (pane_id, prev) = {
            let agent = &self.agents[&id];
            (agent.pane_id.clone(), agent.last_state)
        };

        let buf = match self.capture_with_retry(&pane_id).await {
            Ok(buf) => buf,
            Err(PaneError::PaneGone) => {
                if prev != PaneState::Unknown {
                    warn!(agent = id, pane = %pane_id, "pane gone");
                }
                if let Some(agent) = self.agents.get_mut(&id) {
                    agent.last_state = PaneState::Unknown;
                }
                return;
            }
            Err(e) => {
                debug!(agent = id, error = %e, "capture failed, skipping tick");
                return;
            }
        };

        let state = detect::detect(&buf);
        // An unclassifiable capture is transient (mid-repaint, scrolled
        // output): keep the last known state rather than eating the next
        // transition.
        if state == PaneState::Unknown && prev != PaneState::Unknown {
            debug!(agent = id, last = %prev, "unclassifiable capture ignored");
            return;
        }
        if let Some(agent) = self.agents.get_mut(&id) {
            // A stale cooldown stamp from a previous cycle must not
            // penalize the next one.
            if prev == PaneState::Working
                && state != PaneState::Working
                && agent
                    .last_notified
                    .is_some_and(|at| at.elapsed() >= NOTIFY_COOLDOWN)
            {
                agent.last_notified = None;
            }
            agent.last_state = state;
        }

        if prev == PaneState::Working && state == PaneState::Ready {
            self.on_ready_transition(id).await;
        }
    }

    /// One working → ready transition: progress check, circuit update,
    /// notification, then queue dispatch or auto-continue.
    async fn on_ready_transition(&mut self, id: u32) {
        debug!(agent = id, "working -> ready");

        let worktree = self.agents[&id].worktree.clone();
        let fingerprint = self.fingerprint(worktree).await;

        let mut circuit_opened = false;
        if let Some(agent) = self.agents.get_mut(&id) {
            match fingerprint {
                Some(fp) if agent.last_fingerprint.as_deref() == Some(fp.as_str()) => {
                    circuit_opened = agent.record_no_progress();
                    debug!(agent = id, streak = agent.no_progress_streak, "no progress");
                    self.dirty = true;
                }
                Some(fp) => {
                    agent.record_progress(fp);
                    self.dirty = true;
                }
                // Unknown fingerprint: leave the streak alone.
                None => {}
            }
        }

        if circuit_opened {
            let name = self.agents[&id].name.clone();
            warn!(agent = id, "circuit opened after repeated no-progress transitions");
            self.notify_agent(
                id,
                &format!("{name}: circuit open"),
                "No progress across repeated runs; auto-continue halted. Send `reset` to resume.",
                true,
            );
        }

        let (name, last_dispatched) = {
            let agent = &self.agents[&id];
            (agent.name.clone(), agent.last_dispatched.clone())
        };
        let body = match last_dispatched {
            Some(task) => format!("finished: {task}"),
            None => "waiting at prompt".to_string(),
        };
        self.notify_agent(id, &format!("{name}: ready"), &body, false);

        let (has_queue, auto, closed) = {
            let agent = &self.agents[&id];
            (
                !agent.queue.is_empty(),
                agent.auto_enabled,
                agent.can_auto_dispatch(),
            )
        };
        if has_queue && closed {
            self.dispatch_head(id).await;
        } else if auto && closed {
            self.auto_continue(id).await;
        }
    }

    /// Try to send the queue head. The entry is only removed on a
    /// successful injection; a deferred head stays the head.
    async fn dispatch_head(&mut self, id: u32) {
        let (pane_id, head) = {
            let agent = &self.agents[&id];
            let Some(head) = agent.queue.front().cloned() else {
                return;
            };
            (agent.pane_id.clone(), head)
        };

        match self.copy_mode(&pane_id).await {
            Ok(false) => {}
            Ok(true) => {
                info!(agent = id, "pane in copy mode, dispatch deferred");
                return;
            }
            Err(e) => {
                debug!(agent = id, error = %e, "copy-mode probe failed, dispatch deferred");
                return;
            }
        }

        let outcome = self.send_with_retry(&pane_id, &head).await;
        let Some(agent) = self.agents.get_mut(&id) else {
            return;
        };
        match outcome {
            Ok(()) => {
                agent.queue.pop_front();
                agent.last_dispatched = Some(head.clone());
                // Optimistic: the next observed `ready` then reflects the
                // completion of this task, not a stale prompt.
                agent.last_state = PaneState::Working;
                self.dirty = true;
                info!(agent = id, task = %head, remaining = agent.queue.len(), "task dispatched");
            }
            Err(PaneError::CopyMode) => {
                info!(agent = id, "pane entered copy mode, dispatch deferred");
            }
            Err(PaneError::PaneGone) => {
                // No retry is possible against a dead handle; drop the
                // task so the queue does not wedge permanently.
                warn!(agent = id, "pane gone, dropping queue head");
                agent.queue.pop_front();
                agent.last_state = PaneState::Unknown;
                self.dirty = true;
            }
            Err(PaneError::Transient(e)) => {
                debug!(agent = id, error = %e, "dispatch failed, task stays at head");
            }
        }
    }

    async fn auto_continue(&mut self, id: u32) {
        let pane_id = self.agents[&id].pane_id.clone();
        let outcome = self.send_with_retry(&pane_id, CONTINUE_TEXT).await;
        let Some(agent) = self.agents.get_mut(&id) else {
            return;
        };
        match outcome {
            Ok(()) => {
                debug!(agent = id, "auto-continue sent");
                agent.last_state = PaneState::Working;
            }
            Err(PaneError::PaneGone) => {
                warn!(agent = id, "pane gone during auto-continue");
                agent.last_state = PaneState::Unknown;
            }
            Err(e) => debug!(agent = id, error = %e, "auto-continue skipped"),
        }
    }

    // ── Notifications ────────────────────────────────────────────────

    fn notify_agent(&mut self, id: u32, title: &str, body: &str, elevated: bool) {
        let Some(agent) = self.agents.get_mut(&id) else {
            return;
        };
        if let Some(last) = agent.last_notified
            && last.elapsed() < NOTIFY_COOLDOWN
        {
            debug!(agent = id, title, "notification suppressed by cooldown");
            return;
        }
        agent.last_notified = Some(Instant::now());
        self.notifier.notify(title, body, elevated);
    }

    // ── Pane and probe bridging ──────────────────────────────────────
    //
    // Pane and VCS calls are blocking subprocesses with their own
    // deadlines; they run on the blocking pool so producer tasks keep
    // flowing while a scan is in flight.

    async fn capture_with_retry(&self, pane_id: &str) -> Result<String, PaneError> {
        match self.capture(pane_id).await {
            Err(PaneError::Transient(e)) => {
                debug!(pane = pane_id, error = %e, "capture retry");
                tokio::time::sleep(TRANSIENT_RETRY_BACKOFF).await;
                self.capture(pane_id).await
            }
            other => other,
        }
    }

    async fn send_with_retry(&self, pane_id: &str, text: &str) -> Result<(), PaneError> {
        match self.send(pane_id, text).await {
            Err(PaneError::Transient(e)) => {
                debug!(pane = pane_id, error = %e, "send retry");
                tokio::time::sleep(TRANSIENT_RETRY_BACKOFF).await;
                self.send(pane_id, text).await
            }
            other => other,
        }
    }

    async fn capture(&self, pane_id: &str) -> Result<String, PaneError> {
        let panes = Arc::clone(&self.panes);
        let pane_id = pane_id.to_string();
        tokio::task::spawn_blocking(move || panes.capture(&pane_id))
            .await
            .map_err(|e| PaneError::Transient(format!("capture task: {e}")))?
    }

    async fn send(&self, pane_id: &str, text: &str) -> Result<(), PaneError> {
        let panes = Arc::clone(&self.panes);
        let pane_id = pane_id.to_string();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || panes.send(&pane_id, &text))
            .await
            .map_err(|e| PaneError::Transient(format!("send task: {e}")))?
    }

    async fn copy_mode(&self, pane_id: &str) -> Result<bool, PaneError> {
        let panes = Arc::clone(&self.panes);
        let pane_id = pane_id.to_string();
        tokio::task::spawn_blocking(move || panes.in_copy_mode(&pane_id))
            .await
            .map_err(|e| PaneError::Transient(format!("copy-mode task: {e}")))?
    }

    async fn fingerprint(&self, worktree: PathBuf) -> Option<String> {
        let progress = Arc::clone(&self.progress);
        tokio::task::spawn_blocking(move || progress.fingerprint(&worktree))
            .await
            .ok()
            .flatten()
    }

    // ── Bookkeeping ──────────────────────────────────────────────────

    fn print_status(&self) {
        for agent in self.agents.values() {
            let last = agent.last_dispatched.as_deref().unwrap_or("-");
            let line = format!(
                "{:>3}  {:<12} {:<6} {:<8} auto={:<3} circuit={:<6} streak={} queue={} last={}",
                agent.id,
                agent.name,
                agent.pane_id,
                agent.last_state.to_string(),
                if agent.auto_enabled { "on" } else { "off" },
                agent.circuit.to_string(),
                agent.no_progress_streak,
                agent.queue.len(),
                last,
            );
            println!("{line}");
            info!("{line}");
        }
    }

    fn save_if_dirty(&mut self) {
        if !self.dirty {
            return;
        }
        let snapshot = Snapshot::capture(&self.agents);
        if let Err(e) = self.store.save(&snapshot) {
            warn!(error = %e, "snapshot save failed");
        }
        self.dirty = false;
    }
}

/// Look up an agent, surfacing unknown ids as a diagnostic rather than an
/// error. Free-standing so callers can keep borrowing the rest of the
/// coordinator.
fn agent_mut(agents: &mut BTreeMap<u32, Agent>, id: u32) -> Option<&mut Agent> {
    let found = agents.get_mut(&id);
    if found.is_none() {
        warn!(agent = id, "unknown agent id");
        eprintln!("error: unknown agent id {id}");
    }
    found
}
