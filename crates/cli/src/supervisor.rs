// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Heartbeat / stuck-recovery supervisor.
//!
//! Tracks per-pane activity and escalates unresponsive agents through
//! nudge → interrupt → restart → alert. Nudges go through the pane's
//! trigger file, so the router delivers them like any other message;
//! interrupts and restarts act on the PTY directly. A pane that produces
//! output after its last nudge (past the 500 ms echo grace) clears its
//! stuck episode entirely.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hivemindd::pane::{now_ms, PaneId, PaneMode, Role};
use hivemindd::protocol::Command;

use crate::client::DaemonClient;
use crate::config::TeamSpec;
use crate::event::{CoordEvent, HeartbeatMode};
use crate::inject::InjectionPipeline;
use crate::track::PaneTracker;
use crate::workspace::{RouteTarget, Workspace};

/// Nudge line appended to a stuck pane's trigger file. Unsequenced by
/// design: it must deliver every time.
pub const AGGRESSIVE_NUDGE_LINE: &str = "(SYSTEM): (AGGRESSIVE_NUDGE)";

/// Output within this window after a nudge is assumed to be the nudge's
/// own echo, not a response.
pub const NUDGE_RESPONSE_GRACE_MS: u64 = 500;

/// Prompt sent to the lead pane on heartbeat ticks.
const LEAD_HEARTBEAT_PROMPT: &str =
    "(SYSTEM): heartbeat - check team status and unblock anyone waiting";

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Nominal heartbeat tick; shortened in the active/busy bands.
    pub heartbeat_interval: Duration,
    /// Idle time after which a pane counts as stuck.
    pub stuck_threshold: Duration,
    /// Wait after a nudge before the next escalation step.
    pub nudge_wait: Duration,
    /// L0/L1 nudges before escalating to interrupt.
    pub max_nudges: u32,
    /// Cadence of the stuck evaluation scan.
    pub scan_interval: Duration,
    /// Whether to prompt the lead pane on heartbeat ticks.
    pub lead_heartbeat: bool,
    /// Unanswered lead prompts before falling back to direct worker nudges.
    pub max_lead_nudges: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(300),
            stuck_threshold: Duration::from_secs(60),
            nudge_wait: Duration::from_secs(30),
            max_nudges: 2,
            scan_interval: Duration::from_secs(15),
            lead_heartbeat: false,
            max_lead_nudges: 3,
        }
    }
}

/// Per-pane escalation bookkeeping for the current stuck episode.
#[derive(Debug, Default, Clone)]
struct PaneWatch {
    nudge_attempts: u32,
    /// Epoch ms of the last escalation action; 0 = none outstanding.
    last_nudge_at_ms: u64,
    interrupted: bool,
    restarted: bool,
    alerted: bool,
}

pub struct Supervisor {
    config: SupervisorConfig,
    workspace: Workspace,
    tracker: Arc<PaneTracker>,
    pipeline: Arc<InjectionPipeline>,
    client: DaemonClient,
    team: TeamSpec,
    events: broadcast::Sender<CoordEvent>,
    watches: IndexMap<PaneId, PaneWatch>,
    heartbeat_mode: HeartbeatMode,
    lead_nudges: u32,
    lead_prompted_at_ms: u64,
    cols: u16,
    rows: u16,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SupervisorConfig,
        workspace: Workspace,
        tracker: Arc<PaneTracker>,
        pipeline: Arc<InjectionPipeline>,
        client: DaemonClient,
        team: TeamSpec,
        events: broadcast::Sender<CoordEvent>,
        cols: u16,
        rows: u16,
    ) -> Self {
        Self {
            config,
            workspace,
            tracker,
            pipeline,
            client,
            team,
            events,
            watches: IndexMap::new(),
            heartbeat_mode: HeartbeatMode::Idle,
            lead_nudges: 0,
            lead_prompted_at_ms: 0,
            cols,
            rows,
        }
    }

    /// Run until cancelled: a fast stuck-evaluation scan plus the adaptive
    /// heartbeat tick. `stuck_hints` carries pane ids from the injection
    /// pipeline's unverified deliveries, pulling evaluation forward.
    pub async fn run(
        mut self,
        mut stuck_hints: tokio::sync::mpsc::Receiver<PaneId>,
        cancel: CancellationToken,
    ) {
        let mut scan = tokio::time::interval(self.config.scan_interval);
        scan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // The heartbeat timer persists across loop iterations and is re-armed
        // only after it fires, so the fast scan cannot starve it.
        let mut beat = Box::pin(tokio::time::sleep(self.current_heartbeat_interval()));

        loop {
            tokio::select! {
                _ = scan.tick() => self.evaluate_all().await,
                hint = stuck_hints.recv() => {
                    if let Some(pane) = hint {
                        if let Some(role) = self.tracker.role_of(pane) {
                            self.evaluate(pane, role).await;
                        }
                    }
                }
                _ = beat.as_mut() => {
                    self.heartbeat_tick().await;
                    let next = tokio::time::Instant::now() + self.current_heartbeat_interval();
                    beat.as_mut().reset(next);
                }
                _ = cancel.cancelled() => break,
            }
        }
        info!("supervisor stopped");
    }

    /// The nominal interval scaled by the current band.
    fn current_heartbeat_interval(&self) -> Duration {
        match self.heartbeat_mode {
            HeartbeatMode::Busy => self.config.heartbeat_interval / 4,
            HeartbeatMode::Active => self.config.heartbeat_interval / 2,
            HeartbeatMode::Idle => self.config.heartbeat_interval,
        }
    }

    /// Classify team output recency into a heartbeat band.
    fn observe_band(&self) -> HeartbeatMode {
        let freshest = self
            .tracker
            .panes()
            .iter()
            .map(|(pane, _)| self.tracker.ms_since_output(*pane))
            .min()
            .unwrap_or(u64::MAX);
        if freshest <= 30_000 {
            HeartbeatMode::Busy
        } else if freshest <= 300_000 {
            HeartbeatMode::Active
        } else {
            HeartbeatMode::Idle
        }
    }

    pub(crate) async fn heartbeat_tick(&mut self) {
        let band = self.observe_band();
        if band != self.heartbeat_mode {
            self.heartbeat_mode = band;
            let interval = self.current_heartbeat_interval();
            debug!(mode = band.as_str(), interval_ms = interval.as_millis() as u64, "heartbeat band changed");
            let _ = self.events.send(CoordEvent::HeartbeatStateChanged {
                interval_ms: interval.as_millis() as u64,
                mode: band,
            });
        }

        if self.config.lead_heartbeat {
            self.lead_heartbeat().await;
        }
    }

    /// Periodic status-check prompt to the lead pane, with a fallback to
    /// direct worker nudges when the lead stays unresponsive.
    async fn lead_heartbeat(&mut self) {
        let Some(lead) = self.tracker.pane_for_role(Role::Orchestrator) else {
            return;
        };

        let responded = self.lead_prompted_at_ms == 0
            || self
                .tracker
                .output_after(lead, self.lead_prompted_at_ms + NUDGE_RESPONSE_GRACE_MS);
        if responded {
            self.lead_nudges = 0;
        } else {
            self.lead_nudges += 1;
        }

        if self.lead_nudges < self.config.max_lead_nudges {
            self.lead_prompted_at_ms = now_ms();
            let result = self.pipeline.deliver(lead, LEAD_HEARTBEAT_PROMPT).await;
            if !result.success {
                warn!(pane = %lead, "lead heartbeat prompt failed");
            }
            return;
        }

        // Lead is unresponsive: nudge the workers directly, then alert.
        warn!(nudges = self.lead_nudges, "lead unresponsive, falling back to worker nudges");
        for role in [Role::ImplementerA, Role::ImplementerB] {
            if let Some(pane) = self.tracker.pane_for_role(role) {
                let _ = self.pipeline.deliver(pane, LEAD_HEARTBEAT_PROMPT).await;
            }
        }
        if self.lead_nudges == self.config.max_lead_nudges {
            self.lead_nudges += 1; // alert once per unresponsive episode
            let _ = self.events.send(CoordEvent::UserAlert {
                pane: lead,
                reason: "lead unresponsive to heartbeat".to_string(),
            });
        }
    }

    /// One stuck-evaluation pass over every pane.
    pub(crate) async fn evaluate_all(&mut self) {
        for (pane, role) in self.tracker.panes() {
            self.evaluate(pane, role).await;
        }
    }

    async fn evaluate(&mut self, pane: PaneId, role: Role) {
        let watch = self.watches.entry(pane).or_default().clone();

        // Episode clearing: any output strictly after the last nudge plus
        // the echo grace counts as a response and resets the ladder.
        if watch.last_nudge_at_ms > 0
            && self
                .tracker
                .output_after(pane, watch.last_nudge_at_ms + NUDGE_RESPONSE_GRACE_MS)
        {
            debug!(pane = %pane, "stuck episode cleared by output");
            self.watches.insert(pane, PaneWatch::default());
            return;
        }

        let idle_ms = self.tracker.ms_since_activity(pane);
        if idle_ms <= self.config.stuck_threshold.as_millis() as u64 {
            return;
        }

        // An escalation is still outstanding; give it time to land.
        if watch.last_nudge_at_ms > 0
            && now_ms().saturating_sub(watch.last_nudge_at_ms)
                < self.config.nudge_wait.as_millis() as u64
        {
            return;
        }

        if watch.nudge_attempts < self.config.max_nudges {
            self.escalate_nudge(pane, role, watch.nudge_attempts).await;
        } else if !watch.interrupted {
            self.escalate_interrupt(pane).await;
        } else if !watch.restarted {
            self.escalate_restart(pane, role).await;
        } else if !watch.alerted {
            self.escalate_alert(pane, role, idle_ms).await;
        }
        // Alerted and still stuck: hold until the episode clears.
    }

    /// L0/L1: append an aggressive nudge to the pane's trigger file; the
    /// router delivers it like any other message.
    async fn escalate_nudge(&mut self, pane: PaneId, role: Role, attempt: u32) {
        info!(pane = %pane, %role, attempt = attempt + 1, "nudging stuck pane");
        if let Err(e) = self.workspace.append_trigger(RouteTarget::Role(role), AGGRESSIVE_NUDGE_LINE)
        {
            warn!(pane = %pane, "nudge append failed: {e:#}");
            return;
        }
        if let Some(watch) = self.watches.get_mut(&pane) {
            watch.nudge_attempts += 1;
            watch.last_nudge_at_ms = now_ms();
        }
    }

    /// L2: Ctrl-C to the PTY. Interactive CLIs cancel their current turn;
    /// exec panes have no resident child, so this is a no-op for them.
    async fn escalate_interrupt(&mut self, pane: PaneId) {
        info!(pane = %pane, "interrupting stuck pane");
        if self.tracker.mode(pane) == Some(PaneMode::Interactive) {
            if let Err(e) = self.client.write_bytes(pane, &[0x03]).await {
                warn!(pane = %pane, "interrupt write failed: {e:#}");
            }
        }
        if let Some(watch) = self.watches.get_mut(&pane) {
            watch.interrupted = true;
            watch.last_nudge_at_ms = now_ms();
        }
    }

    /// L3: kill the child and respawn it, re-supplying cwd and the stored
    /// session id so conversational context survives.
    async fn escalate_restart(&mut self, pane: PaneId, role: Role) {
        warn!(pane = %pane, %role, "restarting stuck pane");
        let resume_session = self
            .tracker
            .stats(pane)
            .and_then(|s| s.session_id.lock().clone())
            .or_else(|| {
                self.workspace
                    .read_session_state()
                    .0
                    .get(&pane.to_string())
                    .and_then(|e| e.session_id.clone())
            });

        let respawn = self.team.panes.iter().find(|p| p.id == pane).map(|spec| Command::Spawn {
            pane,
            role,
            command: spec.command.clone(),
            cwd: spec.cwd(self.workspace.root()),
            mode: spec.mode(),
            cols: self.cols,
            rows: self.rows,
            resume_session,
        });

        let Some(respawn) = respawn else {
            warn!(pane = %pane, "no team spec for pane, cannot restart");
            return;
        };

        if let Err(e) = self.client.send(Command::Kill { pane, full: false }).await {
            warn!(pane = %pane, "restart kill failed: {e:#}");
        }
        if let Err(e) = self.client.send(respawn).await {
            warn!(pane = %pane, "respawn failed: {e:#}");
        }
        if let Some(watch) = self.watches.get_mut(&pane) {
            watch.restarted = true;
            watch.last_nudge_at_ms = now_ms();
        }
    }

    /// L4: surface a user alert and log to the shared errors file. One
    /// alert per stuck episode.
    async fn escalate_alert(&mut self, pane: PaneId, role: Role, idle_ms: u64) {
        warn!(pane = %pane, %role, idle_ms, "pane unrecoverable, alerting user");
        let reason = format!("{role} unresponsive for {}s despite nudge/interrupt/restart", idle_ms / 1000);
        let _ = self.events.send(CoordEvent::UserAlert { pane, reason: reason.clone() });
        if let Err(e) = self
            .workspace
            .append_sync("errors.md", &format!("- [{}] pane {pane} ({role}): {reason}", now_ms()))
        {
            warn!("errors.md append failed: {e:#}");
        }
        if let Some(watch) = self.watches.get_mut(&pane) {
            watch.alerted = true;
            watch.last_nudge_at_ms = now_ms();
        }
    }

    #[cfg(test)]
    fn watch(&self, pane: PaneId) -> Option<&PaneWatch> {
        self.watches.get(&pane)
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
