// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client.
//!
//! Connects to the terminal daemon's socket, auto-spawning the `hivemindd`
//! binary when absent, and reconnects with bounded exponential backoff on
//! transient errors. Inbound events are demultiplexed to broadcast
//! subscribers; once reconnection is exhausted every send fails fast with
//! `daemon_unavailable`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nix::fcntl::{Flock, FlockArg};
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hivemindd::pane::{PaneId, PaneInfo};
use hivemindd::protocol::{self, Command, Event};

use crate::error::ErrorCode;
use crate::workspace::Workspace;

/// How the client reaches (and if needed, starts) the daemon.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: PathBuf,
    pub workspace: PathBuf,
    /// Spawn `hivemindd` detached when the socket is unreachable.
    pub spawn_daemon: bool,
    /// Bounded connect attempts before reporting `daemon_unavailable`.
    pub max_connect_attempts: u32,
}

impl ClientConfig {
    pub fn new(endpoint: PathBuf, workspace: PathBuf) -> Self {
        Self { endpoint, workspace, spawn_daemon: true, max_connect_attempts: 5 }
    }

    pub fn without_spawn(mut self) -> Self {
        self.spawn_daemon = false;
        self
    }
}

/// Handle to the daemon connection. Cheap to clone.
#[derive(Clone)]
pub struct DaemonClient {
    cmd_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<Event>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl DaemonClient {
    /// Connect, auto-spawning the daemon when configured, and start the
    /// I/O loop.
    pub async fn connect(config: ClientConfig) -> anyhow::Result<Self> {
        let stream = establish(&config).await?;
        info!(endpoint = %config.endpoint.display(), "connected to daemon");

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(256);
        let (events, _) = broadcast::channel(1024);
        let connected = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        tokio::spawn(io_loop(
            stream,
            config,
            cmd_rx,
            events.clone(),
            Arc::clone(&connected),
            cancel.clone(),
        ));

        Ok(Self { cmd_tx, events, connected, cancel })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queue a command for the daemon. Fails fast when disconnected so
    /// injection attempts surface `daemon_unavailable` instead of hanging.
    pub async fn send(&self, command: Command) -> anyhow::Result<()> {
        if !self.is_connected() {
            anyhow::bail!("{}: daemon connection lost", ErrorCode::DaemonUnavailable);
        }
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("{}: client io loop ended", ErrorCode::DaemonUnavailable))
    }

    /// Write raw bytes to a pane.
    pub async fn write_bytes(&self, pane: PaneId, data: &[u8]) -> anyhow::Result<()> {
        self.send(Command::Write { pane, data: protocol::encode_payload(data) }).await
    }

    /// Round-trip a `list` and collect the pane snapshot.
    pub async fn list_panes(&self, timeout: Duration) -> anyhow::Result<Vec<PaneInfo>> {
        let mut rx = self.subscribe();
        self.send(Command::List).await?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .context("timed out waiting for pane list")?;
            match event {
                Ok(Event::Panes { panes }) => return Ok(panes),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("{}: event stream closed", ErrorCode::DaemonUnavailable)
                }
            }
        }
    }

    /// Liveness probe.
    pub async fn ping(&self, timeout: Duration) -> anyhow::Result<()> {
        let mut rx = self.subscribe();
        self.send(Command::Ping).await?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .context("timed out waiting for pong")?;
            match event {
                Ok(Event::Pong) => return Ok(()),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("{}: event stream closed", ErrorCode::DaemonUnavailable)
                }
            }
        }
    }

    /// Stop the I/O loop. The daemon and its panes keep running.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Connect with bounded backoff, spawning the daemon after the first miss.
async fn establish(config: &ClientConfig) -> anyhow::Result<UnixStream> {
    let mut spawned = false;
    for attempt in 0..config.max_connect_attempts {
        match UnixStream::connect(&config.endpoint).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(
                    attempt = attempt + 1,
                    endpoint = %config.endpoint.display(),
                    "daemon connect failed: {e}",
                );
                if config.spawn_daemon && !spawned {
                    spawn_daemon_process(&config.workspace, &config.endpoint)?;
                    spawned = true;
                }
                let delay = Duration::from_millis(200 * 2u64.pow(attempt));
                tokio::time::sleep(delay).await;
            }
        }
    }
    anyhow::bail!(
        "{}: cannot reach daemon at {} after {} attempts",
        ErrorCode::DaemonUnavailable,
        config.endpoint.display(),
        config.max_connect_attempts,
    )
}

/// Locate and start `hivemindd` detached from this process.
fn spawn_daemon_process(workspace: &Path, endpoint: &Path) -> anyhow::Result<()> {
    let binary = find_daemon_binary();
    info!(binary = %binary.display(), "spawning terminal daemon");
    std::process::Command::new(&binary)
        .arg("--workspace")
        .arg(workspace)
        .arg("--endpoint")
        .arg(endpoint)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .with_context(|| format!("spawn daemon binary {}", binary.display()))?;
    Ok(())
}

/// Resolve the daemon binary: explicit override, then a sibling of the
/// current executable, then `$PATH`.
fn find_daemon_binary() -> PathBuf {
    if let Some(path) = std::env::var_os("HIVEMIND_DAEMON_BIN") {
        return PathBuf::from(path);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("hivemindd");
            if sibling.exists() {
                return sibling;
            }
        }
    }
    PathBuf::from("hivemindd")
}

/// Connection I/O loop: pump commands out and events in, reconnecting on
/// transient errors until retries are exhausted or the client closes.
async fn io_loop(
    mut stream: UnixStream,
    config: ClientConfig,
    mut cmd_rx: mpsc::Receiver<Command>,
    events: broadcast::Sender<Event>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        // Scope the split halves so the stream can be replaced on reconnect.
        {
            let (read_half, mut write_half) = stream.split();
            let mut reader = BufReader::new(read_half);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    command = cmd_rx.recv() => {
                        let Some(command) = command else { return };
                        if let Err(e) = protocol::write_message(&mut write_half, &command).await {
                            warn!("daemon write failed: {e:#}");
                            break;
                        }
                    }
                    event = protocol::read_message::<_, Event>(&mut reader) => {
                        match event {
                            Ok(Some(event)) => {
                                let _ = events.send(event);
                            }
                            Ok(None) => {
                                warn!("daemon closed the connection");
                                break;
                            }
                            Err(e) => {
                                warn!("daemon read failed: {e:#}");
                                break;
                            }
                        }
                    }
                }
            }
        }

        // Transient failure: reconnect with the same bounded backoff. The
        // daemon never spawns twice from here — a dead daemon means pane
        // state is gone and the host must resync via `spawned` events.
        connected.store(false, Ordering::Release);
        match establish(&config).await {
            Ok(new_stream) => {
                info!("reconnected to daemon");
                connected.store(true, Ordering::Release);
                stream = new_stream;
            }
            Err(e) => {
                warn!("daemon reconnect exhausted: {e:#}");
                return;
            }
        }
    }
}

/// Advisory single-writer lock on the message-state file.
///
/// Only one `ui`-role client may hold it; a second host can observe events
/// but must not originate message-state writes.
pub struct UiLock {
    _lock: Flock<std::fs::File>,
}

/// Acquire the message-state writer lock, non-blocking.
pub fn acquire_ui_lock(workspace: &Workspace) -> anyhow::Result<UiLock> {
    let path = workspace.message_state_lock_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("create workspace dir")?;
    }
    let file = std::fs::File::create(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(lock) => Ok(UiLock { _lock: lock }),
        Err((_, errno)) => anyhow::bail!(
            "another ui client holds the message-state lock ({}): {errno}",
            path.display(),
        ),
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
