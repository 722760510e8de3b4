// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-pane session tasks.
//!
//! Each pane gets one long-running task that owns its child lifecycle,
//! feeds the scrollback ring, stamps activity timestamps, and broadcasts
//! protocol events. Interactive panes hold one PTY child for the session's
//! lifetime; exec panes spawn a child per queued payload, so the task loop
//! itself guarantees at most one in-flight child.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::exec::{ExecChild, ExecEmission};
use crate::pane::{ActivityState, PaneRecord};
use crate::protocol::{encode_payload, Event};
use crate::pty::{signal_pid, PtyChild};
use crate::ring::Scrollback;

/// Handle to a running pane session.
pub struct PaneSession {
    pub record: Arc<PaneRecord>,
    pub scrollback: Arc<Mutex<Scrollback>>,
    input_tx: mpsc::Sender<Bytes>,
    resize_tx: mpsc::Sender<(u16, u16)>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PaneSession {
    /// Spawn an interactive pane: one PTY child for the session lifetime.
    pub fn spawn_interactive(
        record: Arc<PaneRecord>,
        cols: u16,
        rows: u16,
        ring_size: usize,
        events: broadcast::Sender<Event>,
    ) -> anyhow::Result<Self> {
        let child = PtyChild::spawn(&record.command, &record.cwd, cols, rows)?;
        record.child_pid.store(child.pid(), Ordering::Release);
        record.alive.store(true, Ordering::Release);
        record.set_activity(ActivityState::Starting);

        let scrollback = Arc::new(Mutex::new(Scrollback::new(ring_size)));
        let (input_tx, input_rx) = mpsc::channel::<Bytes>(256);
        let (resize_tx, resize_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(interactive_loop(
            child,
            Arc::clone(&record),
            Arc::clone(&scrollback),
            events,
            input_rx,
            resize_rx,
            cancel.clone(),
        ));

        Ok(Self { record, scrollback, input_tx, resize_tx, cancel, task })
    }

    /// Start an exec pane slot. No child runs until the first write.
    pub fn spawn_exec(
        record: Arc<PaneRecord>,
        ring_size: usize,
        events: broadcast::Sender<Event>,
    ) -> Self {
        record.alive.store(true, Ordering::Release);
        record.set_activity(ActivityState::Ready);

        let scrollback = Arc::new(Mutex::new(Scrollback::new(ring_size)));
        let (input_tx, input_rx) = mpsc::channel::<Bytes>(256);
        let (resize_tx, _resize_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(exec_loop(
            Arc::clone(&record),
            Arc::clone(&scrollback),
            events,
            input_rx,
            cancel.clone(),
        ));

        Self { record, scrollback, input_tx, resize_tx, cancel, task }
    }

    /// Queue bytes for the pane. Fails when the session has ended.
    pub async fn write(&self, data: Bytes) -> anyhow::Result<()> {
        self.record.mark_input();
        self.input_tx
            .send(data)
            .await
            .map_err(|_| anyhow::anyhow!("pane {} input channel closed", self.record.id))
    }

    /// Clone of the input sender, so callers can write without holding the
    /// pane registry lock across a potentially-full queue.
    pub fn writer(&self) -> mpsc::Sender<Bytes> {
        self.input_tx.clone()
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        let _ = self.resize_tx.try_send((cols, rows));
    }

    /// Deliver a signal to the current child, if any. Exec panes without an
    /// in-flight child ignore this.
    pub fn signal(&self, signal: Signal) {
        let pid = self.record.child_pid.load(Ordering::Acquire);
        if pid != 0 {
            if let Err(e) = signal_pid(pid, signal) {
                debug!(pane = %self.record.id, %signal, "signal delivery failed: {e}");
            }
        }
    }

    /// Terminate the child and end the session task. The pane record
    /// survives unless the caller also discards it (`kill full`).
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.signal(Signal::SIGTERM);
        if let Err(e) = self.task.await {
            warn!(pane = %self.record.id, "session task join failed: {e}");
        }
        self.record.alive.store(false, Ordering::Release);
    }
}

async fn interactive_loop(
    child: PtyChild,
    record: Arc<PaneRecord>,
    scrollback: Arc<Mutex<Scrollback>>,
    events: broadcast::Sender<Event>,
    input_rx: mpsc::Receiver<Bytes>,
    resize_rx: mpsc::Receiver<(u16, u16)>,
    cancel: CancellationToken,
) {
    let pane = record.id;
    let pid = child.pid();
    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(256);

    let run_fut = child.run(out_tx, input_rx, resize_rx);
    tokio::pin!(run_fut);
    let mut hangup_sent = false;
    let mut output_done = false;

    let status = loop {
        tokio::select! {
            status = &mut run_fut => {
                match status {
                    Ok(status) => break status,
                    Err(e) => {
                        warn!(pane = %pane, "pty backend error: {e:#}");
                        break crate::pane::ExitStatus { code: Some(1), signal: None };
                    }
                }
            }
            chunk = out_rx.recv(), if !output_done => {
                match chunk {
                    Some(chunk) => {
                        scrollback.lock().push(&chunk);
                        record.mark_output();
                        let _ = events.send(Event::Data {
                            pane,
                            data: encode_payload(&chunk),
                            replay: false,
                        });
                    }
                    None => output_done = true,
                }
            }
            _ = cancel.cancelled(), if !hangup_sent => {
                // Ask the child to exit; the run future completes when the
                // PTY reaches EOF.
                hangup_sent = true;
                let _ = signal_pid(pid, Signal::SIGHUP);
            }
        }
    };

    // Capture any output that raced the exit.
    while let Ok(chunk) = out_rx.try_recv() {
        scrollback.lock().push(&chunk);
        record.mark_output();
        let _ = events.send(Event::Data { pane, data: encode_payload(&chunk), replay: false });
    }

    record.alive.store(false, Ordering::Release);
    record.child_pid.store(0, Ordering::Release);
    record.set_activity(ActivityState::Idle);
    debug!(pane = %pane, code = ?status.code, signal = ?status.signal, "pane child exited");
    let _ = events.send(Event::Exit { pane, code: status.code, signal: status.signal });
}

async fn exec_loop(
    record: Arc<PaneRecord>,
    scrollback: Arc<Mutex<Scrollback>>,
    events: broadcast::Sender<Event>,
    mut input_rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    let pane = record.id;

    loop {
        let payload = tokio::select! {
            payload = input_rx.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        let resume = record.session_id.lock().clone();
        let child = match ExecChild::spawn(&record.command, &record.cwd, resume.as_deref()) {
            Ok(child) => child,
            Err(e) => {
                warn!(pane = %pane, "exec spawn failed: {e:#}");
                let _ = events.send(Event::Error {
                    pane: Some(pane),
                    reason: "pty_write_failed".to_string(),
                    message: format!("{e:#}"),
                });
                continue;
            }
        };
        record.child_pid.store(child.pid().unwrap_or(0), Ordering::Release);
        record.set_activity(ActivityState::Starting);

        let (emit_tx, mut emit_rx) = mpsc::channel::<ExecEmission>(64);
        let run_fut = child.run(payload, emit_tx);
        tokio::pin!(run_fut);
        let mut term_sent = false;
        let mut emissions_done = false;

        let outcome = loop {
            tokio::select! {
                outcome = &mut run_fut => break outcome,
                emission = emit_rx.recv(), if !emissions_done => {
                    match emission {
                        Some(emission) => forward_emission(&record, &scrollback, &events, emission),
                        None => emissions_done = true,
                    }
                }
                _ = cancel.cancelled(), if !term_sent => {
                    // kill_on_drop reaps the child when the future drops.
                    term_sent = true;
                    let pid = record.child_pid.load(Ordering::Acquire);
                    if pid != 0 {
                        let _ = signal_pid(pid, Signal::SIGTERM);
                    }
                }
            }
        };
        while let Ok(emission) = emit_rx.try_recv() {
            forward_emission(&record, &scrollback, &events, emission);
        }

        record.child_pid.store(0, Ordering::Release);
        match outcome {
            Ok(outcome) => {
                if let Some(session_id) = outcome.session_id {
                    record.set_session_id(Some(session_id.clone()));
                    let _ = events.send(Event::Session { pane, session_id });
                }
                record.set_activity(ActivityState::Done);
                let _ = events.send(Event::Exit {
                    pane,
                    code: outcome.status.code,
                    signal: outcome.status.signal,
                });
            }
            Err(e) => {
                warn!(pane = %pane, "exec run failed: {e:#}");
                record.set_activity(ActivityState::Error);
                let _ = events.send(Event::Error {
                    pane: Some(pane),
                    reason: "pty_write_failed".to_string(),
                    message: format!("{e:#}"),
                });
            }
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    record.alive.store(false, Ordering::Release);
    record.child_pid.store(0, Ordering::Release);
}

fn forward_emission(
    record: &PaneRecord,
    scrollback: &Mutex<Scrollback>,
    events: &broadcast::Sender<Event>,
    emission: ExecEmission,
) {
    match emission {
        ExecEmission::Data(chunk) => {
            scrollback.lock().push(&chunk);
            record.mark_output();
            let _ = events.send(Event::Data {
                pane: record.id,
                data: encode_payload(&chunk),
                replay: false,
            });
        }
        ExecEmission::Activity { state, detail } => {
            record.set_activity(state);
            let _ = events.send(Event::Activity { pane: record.id, state, detail });
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
