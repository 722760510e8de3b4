// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon server: Unix-socket listener and command dispatch.
//!
//! Lifecycle events (`spawned`, `data`, `exit`, `activity`, `error`) are
//! broadcast to every connected client; `pong`, `panes`, and attach replay
//! go only to the requesting connection. Panes survive every client
//! disconnect — only `shutdown` or daemon death closes them.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use indexmap::IndexMap;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::lifecycle::InstanceGuard;
use crate::pane::{PaneId, PaneMode, PaneRecord};
use crate::protocol::{self, decode_payload, encode_payload, Command, Event};
use crate::session::PaneSession;

/// One pane slot. The record outlives the session so `list` keeps showing
/// dead panes until a `kill full` discards them.
struct PaneSlot {
    record: Arc<PaneRecord>,
    session: Option<PaneSession>,
}

struct Shared {
    panes: Mutex<IndexMap<PaneId, PaneSlot>>,
    events: broadcast::Sender<Event>,
    cancel: CancellationToken,
    ring_size: usize,
}

/// Run the daemon until `shutdown` or a termination signal.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let socket = config.endpoint_path();
    let guard = InstanceGuard::acquire(&config.workspace, &socket)?;

    let listener = UnixListener::bind(&socket)
        .with_context(|| format!("bind daemon socket {}", socket.display()))?;
    info!(socket = %socket.display(), "daemon listening");

    let (events, _) = broadcast::channel(1024);
    let shared = Arc::new(Shared {
        panes: Mutex::new(IndexMap::new()),
        events,
        cancel: CancellationToken::new(),
        ring_size: config.ring_size,
    });

    spawn_signal_watcher(shared.cancel.clone())?;

    loop {
        tokio::select! {
            conn = listener.accept() => {
                match conn {
                    Ok((stream, _addr)) => {
                        tokio::spawn(handle_client(stream, Arc::clone(&shared)));
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
            _ = shared.cancel.cancelled() => break,
        }
    }

    info!("daemon shutting down, closing panes");
    shutdown_all(&shared).await;
    guard.release();
    Ok(())
}

/// Watch SIGINT/SIGTERM and cancel the daemon token.
fn spawn_signal_watcher(cancel: CancellationToken) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut interrupt = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        cancel.cancel();
    });
    Ok(())
}

/// Close all pane sessions in parallel.
async fn shutdown_all(shared: &Shared) {
    let mut panes = shared.panes.lock().await;
    let mut set = JoinSet::new();
    for (_, slot) in panes.drain(..) {
        if let Some(session) = slot.session {
            set.spawn(async move { session.shutdown().await });
        }
    }
    drop(panes);
    while set.join_next().await.is_some() {}
}

async fn handle_client(stream: UnixStream, shared: Arc<Shared>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // Direct replies for this connection only.
    let (reply_tx, mut reply_rx) = mpsc::channel::<Event>(64);
    let mut broadcast_rx = shared.events.subscribe();
    let conn_done = CancellationToken::new();

    let writer_done = conn_done.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                // Direct replies first so attach replay lands before
                // subsequent live events on this connection.
                biased;
                reply = reply_rx.recv() => {
                    let Some(event) = reply else { break };
                    if protocol::write_message(&mut write_half, &event).await.is_err() {
                        break;
                    }
                }
                event = broadcast_rx.recv() => {
                    match event {
                        Ok(event) => {
                            if protocol::write_message(&mut write_half, &event).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "slow client lagged behind event stream");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = writer_done.cancelled() => break,
            }
        }
    });

    loop {
        let command: Option<Command> = match protocol::read_message(&mut reader).await {
            Ok(cmd) => cmd,
            Err(e) => {
                debug!("client read error: {e:#}");
                let _ = reply_tx
                    .send(Event::Error {
                        pane: None,
                        reason: "bad_request".to_string(),
                        message: format!("{e:#}"),
                    })
                    .await;
                break;
            }
        };
        let Some(command) = command else { break };
        dispatch(command, &shared, &reply_tx).await;
        if shared.cancel.is_cancelled() {
            break;
        }
    }

    conn_done.cancel();
    let _ = writer.await;
}

async fn dispatch(command: Command, shared: &Shared, reply_tx: &mpsc::Sender<Event>) {
    match command {
        Command::Spawn { pane, role, command, cwd, mode, cols, rows, resume_session } => {
            let mut panes = shared.panes.lock().await;

            // Reattach instead of disturbing a live child.
            if let Some(slot) = panes.get(&pane) {
                if slot.record.alive.load(Ordering::Acquire) {
                    let _ = shared
                        .events
                        .send(Event::Spawned { pane: slot.record.info(), reattached: true });
                    return;
                }
            }

            // Session id carries over across restarts unless the caller
            // supplies a fresh one.
            let carried_session = resume_session.or_else(|| {
                panes.get(&pane).and_then(|slot| slot.record.session_id.lock().clone())
            });

            let record = Arc::new(PaneRecord::new(pane, role, command, cwd, mode));
            record.set_session_id(carried_session);

            let session = match mode {
                PaneMode::Interactive => {
                    match PaneSession::spawn_interactive(
                        Arc::clone(&record),
                        cols,
                        rows,
                        shared.ring_size,
                        shared.events.clone(),
                    ) {
                        Ok(session) => session,
                        Err(e) => {
                            warn!(pane = %pane, "spawn failed: {e:#}");
                            let _ = reply_tx
                                .send(Event::Error {
                                    pane: Some(pane),
                                    reason: "spawn_failed".to_string(),
                                    message: format!("{e:#}"),
                                })
                                .await;
                            return;
                        }
                    }
                }
                PaneMode::Exec => PaneSession::spawn_exec(
                    Arc::clone(&record),
                    shared.ring_size,
                    shared.events.clone(),
                ),
            };

            panes.insert(pane, PaneSlot { record: Arc::clone(&record), session: Some(session) });
            drop(panes);
            info!(pane = %pane, role = %record.role, mode = ?record.mode, "pane spawned");
            let _ = shared.events.send(Event::Spawned { pane: record.info(), reattached: false });
        }

        Command::Write { pane, data } => {
            let payload = match decode_payload(&data) {
                Ok(payload) => Bytes::from(payload),
                Err(e) => {
                    let _ = reply_tx
                        .send(Event::Error {
                            pane: Some(pane),
                            reason: "bad_request".to_string(),
                            message: format!("{e:#}"),
                        })
                        .await;
                    return;
                }
            };
            let panes = shared.panes.lock().await;
            let Some(slot) = panes.get(&pane) else {
                drop(panes);
                let _ = unknown_pane(reply_tx, pane).await;
                return;
            };
            // Take a writer clone so a full pane queue cannot stall the
            // registry lock.
            let writer = slot.session.as_ref().map(|s| (s.writer(), Arc::clone(&s.record)));
            drop(panes);
            let result = match writer {
                Some((writer, record)) => {
                    record.mark_input();
                    writer
                        .send(payload)
                        .await
                        .map_err(|_| anyhow::anyhow!("pane {pane} input channel closed"))
                }
                None => Err(anyhow::anyhow!("pane {pane} has no running session")),
            };
            if let Err(e) = result {
                let _ = reply_tx
                    .send(Event::Error {
                        pane: Some(pane),
                        reason: "pty_write_failed".to_string(),
                        message: format!("{e:#}"),
                    })
                    .await;
            }
        }

        Command::Resize { pane, cols, rows } => {
            let panes = shared.panes.lock().await;
            if let Some(PaneSlot { session: Some(session), .. }) = panes.get(&pane) {
                session.resize(cols, rows);
            }
        }

        Command::Kill { pane, full } => {
            let mut panes = shared.panes.lock().await;
            let Some(slot) = panes.get_mut(&pane) else {
                drop(panes);
                let _ = unknown_pane(reply_tx, pane).await;
                return;
            };
            let session = slot.session.take();
            if full {
                panes.shift_remove(&pane);
            }
            drop(panes);
            if let Some(session) = session {
                session.shutdown().await;
            }
            info!(pane = %pane, full, "pane killed");
        }

        Command::List => {
            let panes = shared.panes.lock().await;
            let infos = panes.values().map(|slot| slot.record.info()).collect();
            drop(panes);
            let _ = reply_tx.send(Event::Panes { panes: infos }).await;
        }

        Command::Attach { pane } => {
            let panes = shared.panes.lock().await;
            let Some(slot) = panes.get(&pane) else {
                drop(panes);
                let _ = unknown_pane(reply_tx, pane).await;
                return;
            };
            let contents = slot
                .session
                .as_ref()
                .map(|s| s.scrollback.lock().contents())
                .unwrap_or_default();
            drop(panes);
            let _ = reply_tx
                .send(Event::Data { pane, data: encode_payload(&contents), replay: true })
                .await;
        }

        Command::Ping => {
            let _ = reply_tx.send(Event::Pong).await;
        }

        Command::Shutdown => {
            info!("shutdown requested by client");
            shared.cancel.cancel();
        }
    }
}

async fn unknown_pane(reply_tx: &mpsc::Sender<Event>, pane: PaneId) -> anyhow::Result<()> {
    reply_tx
        .send(Event::Error {
            pane: Some(pane),
            reason: "unknown_pane".to_string(),
            message: format!("pane {pane} is not registered"),
        })
        .await
        .map_err(|_| anyhow::anyhow!("client reply channel closed"))
}
