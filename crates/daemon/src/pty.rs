// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Native PTY backend for interactive panes.
//!
//! Each interactive pane runs its CLI on a fresh pseudo-terminal. The
//! child's lifetime is bound to the daemon, not to any client connection;
//! only an explicit kill or daemon shutdown takes it down.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

use crate::pane::ExitStatus;

const READ_CHUNK_BYTES: usize = 8192;

/// How long a dropped child gets to react to the hangup before the hard
/// kill.
const DROP_KILL_GRACE: Duration = Duration::from_millis(50);

/// A pane child attached to a PTY master.
///
/// The master fd is registered with the tokio reactor; all I/O goes
/// through readiness-guarded non-blocking calls.
pub struct PtyChild {
    master: AsyncFd<OwnedFd>,
    child: Pid,
}

impl PtyChild {
    /// Fork a child on a new PTY and exec the pane command inside `cwd`.
    // forkpty needs an unsafe block; see the SAFETY note at the call site.
    #[allow(unsafe_code)]
    pub fn spawn(command: &[String], cwd: &Path, cols: u16, rows: u16) -> anyhow::Result<Self> {
        // Build argv up front: nothing may allocate on the child side of
        // the fork.
        let argv = to_argv(command)?;
        let window = window_size(cols, rows);

        // SAFETY: between fork and exec the child is restricted to
        // async-signal-safe operations. The branch below only changes
        // directory, sets two environment variables, and execs; argv was
        // fully prepared before the fork.
        let forked = unsafe { forkpty(&window, None) }.context("forkpty")?;

        match forked {
            ForkptyResult::Child => {
                let _ = std::env::set_current_dir(cwd);
                std::env::set_var("TERM", "xterm-256color");
                std::env::set_var("HIVEMIND", "1");
                execvp(&argv[0], &argv).context("execvp")?;
                unreachable!();
            }
            ForkptyResult::Parent { master, child } => {
                mark_nonblocking(&master)?;
                let master = AsyncFd::new(master).context("register pty master")?;
                Ok(Self { master, child })
            }
        }
    }

    pub fn pid(&self) -> u32 {
        self.child.as_raw() as u32
    }

    /// Pump I/O until the child exits or all input senders drop.
    ///
    /// - `output_tx` carries raw PTY output chunks.
    /// - `input_rx` carries bytes to write to the child.
    /// - `resize_rx` carries (cols, rows) window updates.
    pub async fn run(
        self,
        output_tx: mpsc::Sender<Bytes>,
        mut input_rx: mpsc::Receiver<Bytes>,
        mut resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> anyhow::Result<ExitStatus> {
        let child = self.child;
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        let mut input_open = true;
        let mut resize_open = true;

        loop {
            tokio::select! {
                read = self.read_output(&mut buf) => {
                    match read {
                        Ok(0) => break,
                        Ok(n) => {
                            if output_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                                break;
                            }
                        }
                        // EIO from the master means the slave end is gone:
                        // the child exited. Treat it as EOF, not a failure.
                        Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                        Err(e) => return Err(e).context("read pty master"),
                    }
                }
                bytes = input_rx.recv(), if input_open => {
                    match bytes {
                        Some(bytes) => self.feed_input(&bytes).await.context("write pty master")?,
                        // Senders gone; keep draining output until the
                        // child is done.
                        None => input_open = false,
                    }
                }
                update = resize_rx.recv(), if resize_open => {
                    match update {
                        Some((cols, rows)) => self.set_window(cols, rows)?,
                        None => resize_open = false,
                    }
                }
            }
        }

        // waitpid blocks; park it on the blocking pool.
        let status = tokio::task::spawn_blocking(move || reap(child))
            .await
            .context("join reap thread")??;
        Ok(status)
    }

    /// One readiness-guarded read from the master.
    async fn read_output(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.master.readable().await?;
            let attempt =
                guard.try_io(|afd| nix::unistd::read(afd, buf).map_err(errno_io));
            match attempt {
                Ok(result) => return result,
                Err(_not_ready) => continue,
            }
        }
    }

    /// Write the whole buffer to the master, waiting out short writes.
    async fn feed_input(&self, bytes: &[u8]) -> io::Result<()> {
        let mut done = 0;
        while done < bytes.len() {
            let mut guard = self.master.writable().await?;
            let attempt =
                guard.try_io(|afd| nix::unistd::write(afd.get_ref(), &bytes[done..]).map_err(errno_io));
            match attempt {
                Ok(written) => done += written?,
                Err(_not_ready) => continue,
            }
        }
        Ok(())
    }

    // The winsize ioctl has no safe wrapper in our nix feature set.
    #[allow(unsafe_code)]
    fn set_window(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let window = window_size(cols, rows);

        // SAFETY: `self.master` owns a live PTY master fd and `window` is a
        // fully initialized Winsize on the stack. TIOCSWINSZ only reads the
        // struct (and signals the child with SIGWINCH as a side effect).
        let rc = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &window) };
        if rc < 0 {
            bail!("winsize ioctl: {}", io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for PtyChild {
    fn drop(&mut self) {
        // Teardown is best-effort: hang up, give the child a moment, and
        // hard-kill only if it is demonstrably still running. An already
        // reaped pid must not be signalled again (it may have been reused).
        let _ = kill(self.child, Signal::SIGHUP);
        std::thread::sleep(DROP_KILL_GRACE);
        if let Ok(WaitStatus::StillAlive) = waitpid(self.child, Some(WaitPidFlag::WNOHANG)) {
            let _ = kill(self.child, Signal::SIGKILL);
            let _ = waitpid(self.child, Some(WaitPidFlag::WNOHANG));
        }
    }
}

/// Deliver a signal to a child by raw pid. Used by kill/interrupt handling
/// where the session task owns the [`PtyChild`] itself.
pub fn signal_pid(pid: u32, signal: Signal) -> anyhow::Result<()> {
    kill(Pid::from_raw(pid as i32), signal).context("signal delivery failed")?;
    Ok(())
}

fn window_size(cols: u16, rows: u16) -> Winsize {
    Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 }
}

fn to_argv(command: &[String]) -> anyhow::Result<Vec<CString>> {
    if command.is_empty() {
        bail!("pane command is empty");
    }
    command
        .iter()
        .map(|arg| CString::new(arg.as_bytes()).with_context(|| format!("bad argument {arg:?}")))
        .collect()
}

fn mark_nonblocking(fd: &impl std::os::fd::AsFd) -> io::Result<()> {
    let current = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL).map_err(errno_io)?);
    fcntl(fd, FcntlArg::F_SETFL(current | OFlag::O_NONBLOCK)).map_err(errno_io)?;
    Ok(())
}

fn errno_io(errno: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

/// Wait for the child to exit and translate the wait status.
fn reap(child: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus { code: Some(code), signal: None });
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(signal as i32) });
            }
            // Stop/continue notifications are not exits; keep waiting.
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => {}
            Err(nix::errno::Errno::ECHILD) => {
                // Someone else reaped it (e.g. Drop after an abort).
                return Ok(ExitStatus { code: None, signal: None });
            }
            Err(e) => bail!("waitpid: {e}"),
        }
    }
}
