// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trigger directory watcher.
//!
//! Tails every routable file under `triggers/`, tracking a byte offset and
//! inode identity per file and holding partial trailing lines until the
//! newline arrives. Agents append concurrently, so the watcher is
//! order-agnostic on line boundaries; CRLF and LF parse identically. Uses
//! `notify` for filesystem events with a short polling fallback.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::workspace::RouteTarget;

/// New complete lines from one trigger file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerBatch {
    pub target: RouteTarget,
    pub lines: Vec<String>,
}

#[derive(Debug, Default)]
struct TailState {
    offset: u64,
    partial: String,
    /// `(dev, ino)` of the file the offset belongs to. A mismatch means
    /// the file was replaced, even if the new one is large enough to seek
    /// into at the stale offset.
    identity: Option<(u64, u64)>,
}

pub struct TriggerWatcher {
    dir: PathBuf,
    tails: HashMap<PathBuf, TailState>,
    poll_interval: Duration,
}

impl TriggerWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), tails: HashMap::new(), poll_interval: Duration::from_millis(50) }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Read newly appended complete lines across all routable files.
    pub fn read_new(&mut self) -> anyhow::Result<Vec<TriggerBatch>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut batches = Vec::new();
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("txt"))
            .collect();
        paths.sort();

        for path in paths {
            let Some(target) = route_target_of(&path) else {
                continue;
            };
            let state = self.tails.entry(path.clone()).or_default();
            let lines = read_tail(&path, state)?;
            if !lines.is_empty() {
                batches.push(TriggerBatch { target, lines });
            }
        }
        Ok(batches)
    }

    /// Watch until cancelled, sending batches as they appear.
    pub async fn run(mut self, batch_tx: mpsc::Sender<TriggerBatch>, cancel: CancellationToken) {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let _watcher = self.setup_notify_watcher(wake_tx);

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = wake_rx.recv() => {}
                _ = poll.tick() => {}
            }

            match self.read_new() {
                Ok(batches) => {
                    for batch in batches {
                        if batch_tx.send(batch).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!("trigger scan failed: {e:#}"),
            }
        }
    }

    /// Filesystem-event wakeups on the trigger directory. The returned
    /// watcher must be kept alive.
    fn setup_notify_watcher(
        &self,
        wake_tx: mpsc::Sender<()>,
    ) -> Option<notify::RecommendedWatcher> {
        use notify::{RecursiveMode, Watcher};

        let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
            let _ = wake_tx.try_send(());
        })
        .ok()?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive).ok()?;
        Some(watcher)
    }
}

fn route_target_of(path: &Path) -> Option<RouteTarget> {
    let stem = path.file_stem()?.to_str()?;
    RouteTarget::from_stem(stem)
}

/// Read the appended tail of one file: new complete lines, with the last
/// unterminated fragment held in `state.partial` until its newline lands.
fn read_tail(path: &Path, state: &mut TailState) -> anyhow::Result<Vec<String>> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };

    // Stat the open file, not the path, so the identity matches what we
    // are about to read. A changed (dev, ino) or a shrunken file both
    // invalidate the tail: start over from byte zero.
    let meta = file.metadata()?;
    let identity = (meta.dev(), meta.ino());
    if state.identity != Some(identity) || meta.len() < state.offset {
        state.offset = 0;
        state.partial.clear();
        state.identity = Some(identity);
    }

    file.seek(SeekFrom::Start(state.offset))?;
    let mut new = String::new();
    let read = file.read_to_string(&mut new)?;
    if read == 0 {
        return Ok(vec![]);
    }
    state.offset += read as u64;

    let mut data = std::mem::take(&mut state.partial);
    data.push_str(&new);

    let mut lines: Vec<String> = Vec::new();
    let mut rest = data.as_str();
    while let Some(pos) = rest.find('\n') {
        let line = rest[..pos].trim_end_matches('\r');
        if !line.is_empty() {
            lines.push(line.to_string());
        }
        rest = &rest[pos + 1..];
    }
    state.partial = rest.to_string();
    Ok(lines)
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod tests;
