// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process fake daemon for unit tests.
//!
//! Speaks the real wire protocol over a Unix socket in a temp dir, records
//! every `write` payload, answers `ping`/`list`, and lets tests push
//! events to all connected clients.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::BufReader;
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc};

use hivemindd::pane::{ActivityState, PaneId, PaneInfo, PaneMode, Role};
use hivemindd::protocol::{self, decode_payload, Command, Event};

use crate::client::{ClientConfig, DaemonClient};

pub fn pane_info(id: u8, role: Role, mode: PaneMode) -> PaneInfo {
    PaneInfo {
        id: PaneId(id),
        role,
        mode,
        alive: true,
        session_id: None,
        activity: ActivityState::Idle,
        last_output_ms: 0,
        last_input_ms: 0,
        last_activity_ms: 0,
    }
}

pub struct FakeDaemon {
    _dir: tempfile::TempDir,
    pub socket: PathBuf,
    pub writes: Arc<Mutex<Vec<(PaneId, Vec<u8>)>>>,
    events: broadcast::Sender<Event>,
    /// When set, every `write` is answered with an `exit {code:0}` event,
    /// imitating an exec pane completing its turn.
    auto_exit: Arc<AtomicBool>,
}

impl FakeDaemon {
    pub async fn start() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let socket = dir.path().join("term.sock");
        let listener = UnixListener::bind(&socket)?;

        let writes: Arc<Mutex<Vec<(PaneId, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let (events, _) = broadcast::channel::<Event>(256);
        let auto_exit = Arc::new(AtomicBool::new(false));

        let accept_writes = Arc::clone(&writes);
        let accept_events = events.clone();
        let accept_auto_exit = Arc::clone(&auto_exit);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let writes = Arc::clone(&accept_writes);
                let events = accept_events.clone();
                let auto_exit = Arc::clone(&accept_auto_exit);
                tokio::spawn(serve_connection(stream, writes, events, auto_exit));
            }
        });

        Ok(Self { _dir: dir, socket, writes, events, auto_exit })
    }

    pub async fn client(&self) -> anyhow::Result<DaemonClient> {
        let config =
            ClientConfig::new(self.socket.clone(), self.socket.clone()).without_spawn();
        DaemonClient::connect(config).await
    }

    /// Push an event to every connected client.
    pub fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    pub fn enable_auto_exit(&self) {
        self.auto_exit.store(true, Ordering::Release);
    }

    /// Payloads written to the given pane, in arrival order.
    pub fn written_to(&self, pane: PaneId) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .iter()
            .filter(|(id, _)| *id == pane)
            .map(|(_, data)| data.clone())
            .collect()
    }
}

async fn serve_connection(
    mut stream: tokio::net::UnixStream,
    writes: Arc<Mutex<Vec<(PaneId, Vec<u8>)>>>,
    events: broadcast::Sender<Event>,
    auto_exit: Arc<AtomicBool>,
) {
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);
    let mut event_rx = events.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::channel::<Event>(64);

    loop {
        tokio::select! {
            reply = reply_rx.recv() => {
                let Some(event) = reply else { break };
                if protocol::write_message(&mut write_half, &event).await.is_err() {
                    break;
                }
            }
            event = event_rx.recv() => {
                let Ok(event) = event else { break };
                if protocol::write_message(&mut write_half, &event).await.is_err() {
                    break;
                }
            }
            command = protocol::read_message::<_, Command>(&mut reader) => {
                let Ok(Some(command)) = command else { break };
                match command {
                    Command::Write { pane, data } => {
                        if let Ok(payload) = decode_payload(&data) {
                            writes.lock().push((pane, payload));
                        }
                        if auto_exit.load(Ordering::Acquire) {
                            let _ = events.send(Event::Exit { pane, code: Some(0), signal: None });
                        }
                    }
                    Command::Ping => {
                        let _ = reply_tx.send(Event::Pong).await;
                    }
                    Command::List => {
                        let _ = reply_tx.send(Event::Panes { panes: vec![] }).await;
                    }
                    _ => {}
                }
            }
        }
    }
}
