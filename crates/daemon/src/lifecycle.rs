// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: endpoint resolution, pid file, single-instance guard.
//!
//! The daemon refuses to start while a live pid file exists AND the socket
//! accepts connections; anything else is treated as stale residue from a
//! crashed daemon and cleaned up.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{info, warn};

/// Default socket path: `$XDG_RUNTIME_DIR/hivemind-terminal.sock`, with a
/// tmp-dir fallback when the runtime dir is unset.
pub fn default_endpoint() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("hivemind-terminal.sock"),
        _ => std::env::temp_dir().join("hivemind-terminal.sock"),
    }
}

/// Pid file location inside the workspace.
pub fn pid_path(workspace: &Path) -> PathBuf {
    workspace.join("daemon.pid")
}

/// Read the daemon pid file, if present and parseable.
pub fn read_pid(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok()
}

/// Whether a process with the given pid exists (signal 0 probe).
pub fn process_exists(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Whether a Unix socket is accepting connections.
pub fn probe_socket(path: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(path).is_ok()
}

/// Filesystem claim on the daemon's pid file and socket path.
///
/// Held for the daemon's lifetime; `Drop` removes both files so a crashed
/// daemon leaves at most a stale pid behind (cleaned on the next acquire).
pub struct InstanceGuard {
    pid_file: PathBuf,
    socket: PathBuf,
}

impl InstanceGuard {
    /// Claim the workspace for this daemon process.
    ///
    /// Fails when another daemon is demonstrably alive: its pid file names
    /// a running process and its socket accepts connections. Stale files
    /// from a dead daemon are removed.
    pub fn acquire(workspace: &Path, socket: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(workspace)
            .with_context(|| format!("create workspace dir {}", workspace.display()))?;

        let pid_file = pid_path(workspace);
        if let Some(pid) = read_pid(&pid_file) {
            if process_exists(pid) && probe_socket(socket) {
                bail!("daemon already running (pid {pid}, socket {})", socket.display());
            }
            warn!(pid, "removing stale daemon pid file");
        }
        let _ = std::fs::remove_file(&pid_file);
        if socket.exists() && !probe_socket(socket) {
            warn!(socket = %socket.display(), "removing stale daemon socket");
            let _ = std::fs::remove_file(socket);
        }

        std::fs::write(&pid_file, format!("{}\n", std::process::id()))
            .with_context(|| format!("write pid file {}", pid_file.display()))?;
        info!(pid = std::process::id(), socket = %socket.display(), "daemon claimed workspace");

        Ok(Self { pid_file, socket: socket.to_path_buf() })
    }

    /// Remove the pid file and socket.
    pub fn release(&self) {
        let _ = std::fs::remove_file(&self.pid_file);
        let _ = std::fs::remove_file(&self.socket);
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
