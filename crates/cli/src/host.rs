// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination host runner — wires the client, pipeline, router,
//! supervisor, and watchers together and runs until a termination signal.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hivemindd::pane::{now_ms, PaneId};
use hivemindd::protocol::{Command, Event};

use crate::client::{acquire_ui_lock, ClientConfig, DaemonClient};
use crate::config::Config;
use crate::event::CoordEvent;
use crate::inject::{sweeper, InjectionPipeline};
use crate::router::watch::TriggerWatcher;
use crate::router::Router;
use crate::supervisor::{Supervisor, SupervisorConfig};
use crate::sync::SyncTracker;
use crate::track::PaneTracker;
use crate::workspace::{SessionEntry, Workspace};

/// Run the coordination host until SIGINT/SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let team = config.team()?;
    let workspace = Workspace::new(&config.workspace);
    workspace.ensure_layout()?;
    for spec in &team.panes {
        std::fs::create_dir_all(spec.cwd(workspace.root())).context("create pane cwd")?;
    }

    // Single-writer guard: only one ui host may originate message-state
    // writes. A second host can watch, not route.
    let _ui_lock = acquire_ui_lock(&workspace)?;

    let cancel = CancellationToken::new();
    let client = DaemonClient::connect(ClientConfig::new(
        config.endpoint_path(),
        config.workspace.clone(),
    ))
    .await?;

    let tracker = Arc::new(PaneTracker::new());
    let (events, _) = broadcast::channel::<CoordEvent>(1024);

    // Event pump: fold daemon events into the tracker, persist exec
    // session ids, and surface pane activity to host subscribers.
    tokio::spawn(event_pump(
        client.subscribe(),
        Arc::clone(&tracker),
        workspace.clone(),
        events.clone(),
        cancel.clone(),
    ));

    // Injection pipeline + sweeper.
    let pipeline = InjectionPipeline::new(client.clone(), Arc::clone(&tracker), cancel.clone());
    tokio::spawn(sweeper::run(Arc::clone(&pipeline), cancel.clone()));

    // Spawn (or reattach) the team's panes, resuming stored session ids.
    let session_state = workspace.read_session_state();
    for spec in &team.panes {
        tracker.register(spec.id, spec.role, spec.mode());
        pipeline.register_pane(spec.id, spec.role, spec.mode());
        let resume_session = session_state
            .0
            .get(&spec.id.to_string())
            .and_then(|entry| entry.session_id.clone());
        client
            .send(Command::Spawn {
                pane: spec.id,
                role: spec.role,
                command: spec.command.clone(),
                cwd: spec.cwd(workspace.root()),
                mode: spec.mode(),
                cols: config.cols,
                rows: config.rows,
                resume_session,
            })
            .await
            .with_context(|| format!("spawn pane {}", spec.id))?;
    }

    // Trigger watcher → router.
    let (batch_tx, batch_rx) = mpsc::channel(256);
    let watcher = TriggerWatcher::new(workspace.triggers_dir());
    tokio::spawn(watcher.run(batch_tx, cancel.clone()));
    let router = Router::new(
        workspace.clone(),
        Arc::clone(&tracker),
        Arc::clone(&pipeline),
        events.clone(),
    );
    tokio::spawn(router.run(batch_rx, cancel.clone()));

    // Supervisor, with the pipeline's stuck probe feeding its hint queue.
    let (stuck_tx, stuck_rx) = mpsc::channel::<PaneId>(64);
    pipeline.set_stuck_probe(move |pane| {
        let _ = stuck_tx.try_send(pane);
    });
    let supervisor = Supervisor::new(
        SupervisorConfig {
            heartbeat_interval: std::time::Duration::from_millis(config.heartbeat_interval_ms),
            stuck_threshold: std::time::Duration::from_millis(config.stuck_threshold_ms),
            max_nudges: config.max_nudges,
            lead_heartbeat: config.lead_heartbeat,
            ..SupervisorConfig::default()
        },
        workspace.clone(),
        Arc::clone(&tracker),
        Arc::clone(&pipeline),
        client.clone(),
        team,
        events.clone(),
        config.cols,
        config.rows,
    );
    tokio::spawn(supervisor.run(stuck_rx, cancel.clone()));

    // Sync-file tracker.
    let sync_tracker = SyncTracker::new(workspace.clone(), events.clone());
    tokio::spawn(sync_tracker.run(cancel.clone()));

    // Coordination event log (the host's own visibility surface).
    tokio::spawn(log_events(events.subscribe(), cancel.clone()));

    info!(workspace = %workspace.root().display(), "hivemind host running");
    wait_for_shutdown().await?;
    info!("shutting down host (panes keep running in the daemon)");
    cancel.cancel();
    client.close();
    Ok(())
}

/// Fold daemon events into the client-side mirror and persist exec-mode
/// session ids as they appear.
async fn event_pump(
    mut rx: broadcast::Receiver<Event>,
    tracker: Arc<PaneTracker>,
    workspace: Workspace,
    events: broadcast::Sender<CoordEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = cancel.cancelled() => return,
        };
        let event = match event {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "host lagged behind daemon events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        tracker.observe(&event);
        match &event {
            Event::Activity { pane, state, detail } => {
                let _ = events.send(CoordEvent::PaneActivity {
                    pane: *pane,
                    state: *state,
                    detail: detail.clone(),
                });
            }
            Event::Spawned { pane, .. } => {
                if pane.session_id.is_some() {
                    persist_session(&workspace, pane.id, pane.session_id.clone(), Some(pane.mode));
                }
            }
            Event::Session { pane, session_id } => {
                persist_session(&workspace, *pane, Some(session_id.clone()), tracker.mode(*pane));
            }
            _ => {}
        }
    }
}

fn persist_session(
    workspace: &Workspace,
    pane: PaneId,
    session_id: Option<String>,
    mode: Option<hivemindd::pane::PaneMode>,
) {
    let mut state = workspace.read_session_state();
    state
        .0
        .insert(pane.to_string(), SessionEntry { session_id, mode, last_seen: now_ms() });
    if let Err(e) = workspace.write_session_state(&state) {
        warn!("session-state persist failed: {e:#}");
    }
}

async fn log_events(mut rx: broadcast::Receiver<CoordEvent>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = cancel.cancelled() => return,
        };
        match event {
            Ok(CoordEvent::UserAlert { pane, reason }) => {
                warn!(pane = %pane, reason, "user alert");
            }
            Ok(event) => {
                tracing::debug!(?event, "coordination event");
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut interrupt = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
    Ok(())
}
