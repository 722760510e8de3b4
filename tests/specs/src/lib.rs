// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end daemon smoke tests.
//!
//! Spawns the real `hivemindd` binary against a temp workspace and hands
//! out protocol clients over its Unix socket.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use hivemind::client::{ClientConfig, DaemonClient};

/// Resolve the path to the compiled `hivemindd` binary.
pub fn daemon_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("hivemindd")
}

/// A running daemon process rooted in its own temp workspace.
pub struct DaemonProcess {
    child: Child,
    pub workspace: tempfile::TempDir,
    pub socket: PathBuf,
}

impl DaemonProcess {
    /// Start the daemon and wait until its socket accepts connections.
    pub fn start() -> anyhow::Result<Self> {
        let workspace = tempfile::tempdir()?;
        let socket = workspace.path().join("term.sock");

        let child = Command::new(daemon_binary())
            .arg("--workspace")
            .arg(workspace.path())
            .arg("--endpoint")
            .arg(&socket)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let daemon = Self { child, workspace, socket };
        daemon.wait_for_socket(Duration::from_secs(15))?;
        Ok(daemon)
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn pid_file(&self) -> PathBuf {
        self.workspace.path().join("daemon.pid")
    }

    fn wait_for_socket(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if std::os::unix::net::UnixStream::connect(&self.socket).is_ok() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        anyhow::bail!("daemon socket never came up at {}", self.socket.display())
    }

    /// Connect a protocol client to this daemon.
    pub async fn client(&self) -> anyhow::Result<DaemonClient> {
        let config = ClientConfig::new(self.socket.clone(), self.workspace.path().to_path_buf())
            .without_spawn();
        DaemonClient::connect(config).await
    }

    /// True while the daemon process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait for the process to exit on its own.
    pub fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !self.is_running() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        false
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
