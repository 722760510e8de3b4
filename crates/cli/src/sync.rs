// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sync-file tracker.
//!
//! Watches the designated files under `sync/` (shared context, blockers,
//! errors) for mtime changes, marks them dirty, and surfaces
//! `sync-file-changed` events. Components that push a file's contents to
//! panes report back which panes are current.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use hivemindd::pane::PaneId;

use crate::event::CoordEvent;
use crate::workspace::{Workspace, SYNC_FILES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Dirty,
    Synced,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncEntry {
    pub mtime_ms: u64,
    pub last_synced_panes: Vec<PaneId>,
    pub status: SyncStatus,
}

pub struct SyncTracker {
    workspace: Workspace,
    entries: Mutex<IndexMap<String, SyncEntry>>,
    events: broadcast::Sender<CoordEvent>,
}

impl SyncTracker {
    pub fn new(workspace: Workspace, events: broadcast::Sender<CoordEvent>) -> Arc<Self> {
        Arc::new(Self { workspace, entries: Mutex::new(IndexMap::new()), events })
    }

    /// Compare mtimes against the tracked state; files that changed go
    /// dirty and emit `sync-file-changed`. Returns the changed names.
    pub fn scan(&self) -> anyhow::Result<Vec<String>> {
        let mut changed = Vec::new();
        for name in SYNC_FILES {
            let Some((_, mtime_ms)) = self.workspace.read_sync(name)? else {
                continue;
            };
            let mut entries = self.entries.lock();
            let stale = entries.get(name).map(|e| e.mtime_ms != mtime_ms).unwrap_or(true);
            if stale {
                entries.insert(
                    name.to_string(),
                    SyncEntry { mtime_ms, last_synced_panes: Vec::new(), status: SyncStatus::Dirty },
                );
                drop(entries);
                changed.push(name.to_string());
                let _ = self
                    .events
                    .send(CoordEvent::SyncFileChanged { file: name.to_string(), mtime_ms });
            }
        }
        Ok(changed)
    }

    /// Record that the file's current contents reached the given panes.
    pub fn mark_synced(&self, name: &str, panes: Vec<PaneId>) {
        if let Some(entry) = self.entries.lock().get_mut(name) {
            entry.last_synced_panes = panes;
            entry.status = SyncStatus::Synced;
        }
    }

    /// Record a deliberate skip (e.g. gated panes).
    pub fn mark_skipped(&self, name: &str) {
        if let Some(entry) = self.entries.lock().get_mut(name) {
            entry.status = SyncStatus::Skipped;
        }
    }

    pub fn entry(&self, name: &str) -> Option<SyncEntry> {
        self.entries.lock().get(name).cloned()
    }

    /// Watch the sync directory until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let _watcher = self.setup_notify_watcher(wake_tx);

        let mut poll = tokio::time::interval(Duration::from_secs(1));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = wake_rx.recv() => {}
                _ = poll.tick() => {}
            }
            if let Err(e) = self.scan() {
                warn!("sync scan failed: {e:#}");
            }
        }
    }

    fn setup_notify_watcher(
        &self,
        wake_tx: mpsc::Sender<()>,
    ) -> Option<notify::RecommendedWatcher> {
        use notify::{RecursiveMode, Watcher};

        let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
            let _ = wake_tx.try_send(());
        })
        .ok()?;
        watcher.watch(&self.workspace.sync_dir(), RecursiveMode::NonRecursive).ok()?;
        Some(watcher)
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
