// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem-backed workspace store.
//!
//! Single source of truth for coordination: shared state (`state.json`),
//! per-role trigger files, sequence tracking (`message-state.json`),
//! per-pane session ids (`session-state.json`), and the sync files.
//! Documents are replaced atomically (temp + rename) so a reader sees
//! either the pre- or post-write document, never a torn one. A corrupt
//! document is backed up (`.corrupt.<ts>`) and replaced with defaults.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use hivemindd::pane::{now_ms, PaneMode, Role};

use crate::error::ErrorCode;

/// Files under `sync/` whose changes are tracked for the team.
pub const SYNC_FILES: [&str; 3] = ["shared_context.md", "blockers.md", "errors.md"];

/// Cap on the recent-errors list carried in `state.json`.
const MAX_RECENT_ERRORS: usize = 50;

/// Addressing target derived from a trigger filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteTarget {
    Role(Role),
    /// Broadcast channel: fans out to every pane except the sender.
    All,
}

impl RouteTarget {
    pub fn stem(&self) -> &'static str {
        match self {
            Self::Role(role) => role.trigger_stem(),
            Self::All => "all",
        }
    }

    /// Resolve a trigger filename stem. Unknown stems are not routable.
    pub fn from_stem(stem: &str) -> Option<Self> {
        if stem == "all" {
            return Some(Self::All);
        }
        Role::from_trigger_stem(stem).map(Self::Role)
    }
}

/// Workflow phase recorded in `state.json`. Unrecognized phases from other
/// tools deserialize as `Unknown` rather than failing the whole document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Planning,
    Executing,
    CheckpointFix,
    NeedsAttention,
    #[serde(other)]
    Unknown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::CheckpointFix => "checkpoint_fix",
            Self::NeedsAttention => "needs_attention",
            Self::Unknown => "unknown",
        }
    }

    /// Whether trigger deliveries to the worker panes may proceed.
    pub fn allows_worker_dispatch(&self) -> bool {
        matches!(self, Self::Executing | Self::CheckpointFix)
    }
}

/// One entry in the recent-errors ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentError {
    pub at_ms: u64,
    pub message: String,
}

/// The shared `state.json` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceState {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub agent_claims: IndexMap<String, String>,
    #[serde(default)]
    pub worker_state: IndexMap<String, String>,
    #[serde(default)]
    pub recent_errors: Vec<RecentError>,
}

impl WorkspaceState {
    /// Record an error, keeping the ring bounded.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.recent_errors.push(RecentError { at_ms: now_ms(), message: message.into() });
        let excess = self.recent_errors.len().saturating_sub(MAX_RECENT_ERRORS);
        if excess > 0 {
            self.recent_errors.drain(..excess);
        }
    }
}

/// Per-recipient sequence bookkeeping in `message-state.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipientSequences {
    /// Highest seq this recipient has sent (as a sender).
    #[serde(default)]
    pub outbound: u64,
    /// Highest seq already acted on, per sender.
    #[serde(rename = "lastSeen", default)]
    pub last_seen: IndexMap<String, u64>,
}

/// The `message-state.json` document. Single-writer: only the Router
/// persists it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageState {
    #[serde(default)]
    pub sequences: IndexMap<String, RecipientSequences>,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: u64,
}

/// One pane's persisted session identity in `session-state.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub mode: Option<PaneMode>,
    #[serde(rename = "lastSeen", default)]
    pub last_seen: u64,
}

/// The `session-state.json` document, keyed by pane id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState(pub IndexMap<String, SessionEntry>);

/// Handle on a workspace directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory skeleton (triggers/, sync/, queue/).
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        for dir in [self.root.clone(), self.triggers_dir(), self.sync_dir(), self.queue_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create workspace dir {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn message_state_path(&self) -> PathBuf {
        self.root.join("message-state.json")
    }

    pub fn session_state_path(&self) -> PathBuf {
        self.root.join("session-state.json")
    }

    pub fn triggers_dir(&self) -> PathBuf {
        self.root.join("triggers")
    }

    pub fn sync_dir(&self) -> PathBuf {
        self.root.join("sync")
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.root.join("queue")
    }

    /// Lock file guarding message-state writes (one `ui` client at a time).
    pub fn message_state_lock_path(&self) -> PathBuf {
        self.root.join("message-state.lock")
    }

    pub fn trigger_path(&self, target: RouteTarget) -> PathBuf {
        self.triggers_dir().join(format!("{}.txt", target.stem()))
    }

    // -- state.json ---------------------------------------------------------

    /// Read the shared state, or a zero-valued default when the file is
    /// missing or unparseable. A corrupt file is backed up first.
    pub fn read_state(&self) -> WorkspaceState {
        self.read_document(&self.state_path())
    }

    /// Atomic replace of the shared state. Surfaced as [`ErrorCode::StateIo`]
    /// on failure; callers never retry silently.
    pub fn write_state(&self, state: &WorkspaceState) -> anyhow::Result<()> {
        self.write_document(&self.state_path(), state)
    }

    // -- message-state.json -------------------------------------------------

    pub fn read_message_state(&self) -> MessageState {
        self.read_document(&self.message_state_path())
    }

    pub fn write_message_state(&self, state: &MessageState) -> anyhow::Result<()> {
        let mut stamped = state.clone();
        stamped.updated_at = now_ms();
        self.write_document(&self.message_state_path(), &stamped)
    }

    // -- session-state.json -------------------------------------------------

    pub fn read_session_state(&self) -> SessionState {
        self.read_document(&self.session_state_path())
    }

    pub fn write_session_state(&self, state: &SessionState) -> anyhow::Result<()> {
        self.write_document(&self.session_state_path(), state)
    }

    // -- triggers -----------------------------------------------------------

    /// Append a line to a role's trigger file. A trailing newline is added
    /// when missing so concurrent appenders stay line-aligned.
    pub fn append_trigger(&self, target: RouteTarget, text: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(self.triggers_dir()).context("create triggers dir")?;
        let path = self.trigger_path(target);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open trigger file {}", path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("append trigger {}", path.display()))?;
        if !text.ends_with('\n') {
            file.write_all(b"\n").context("terminate trigger line")?;
        }
        Ok(())
    }

    // -- sync files ---------------------------------------------------------

    pub fn sync_path(&self, name: &str) -> PathBuf {
        self.sync_dir().join(name)
    }

    /// Read a sync file with its mtime (epoch ms). `None` when absent.
    pub fn read_sync(&self, name: &str) -> anyhow::Result<Option<(String, u64)>> {
        let path = self.sync_path(name);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read sync file {name}")),
        };
        Ok(Some((contents, file_mtime_ms(&path)?)))
    }

    /// Replace a sync file, returning the new mtime (epoch ms).
    pub fn write_sync(&self, name: &str, body: &str) -> anyhow::Result<u64> {
        std::fs::create_dir_all(self.sync_dir()).context("create sync dir")?;
        let path = self.sync_path(name);
        write_atomic(&path, body.as_bytes())
            .with_context(|| format!("{}: write sync file {name}", ErrorCode::StateIo))?;
        file_mtime_ms(&path)
    }

    /// Append to a sync file (used for the shared errors log).
    pub fn append_sync(&self, name: &str, text: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(self.sync_dir()).context("create sync dir")?;
        let path = self.sync_path(name);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open sync file {name}"))?;
        file.write_all(text.as_bytes()).with_context(|| format!("append sync file {name}"))?;
        if !text.ends_with('\n') {
            file.write_all(b"\n").context("terminate sync line")?;
        }
        Ok(())
    }

    // -- document plumbing --------------------------------------------------

    fn read_document<T: DeserializeOwned + Default>(&self, path: &Path) -> T {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
            Err(e) => {
                warn!(path = %path.display(), "document read failed: {e}");
                return T::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %path.display(), "corrupt document, backing up: {e}");
                backup_corrupt(path);
                T::default()
            }
        }
    }

    fn write_document<T: Serialize>(&self, path: &Path, doc: &T) -> anyhow::Result<()> {
        let mut bytes = serde_json::to_vec_pretty(doc)
            .with_context(|| format!("{}: serialize {}", ErrorCode::StateIo, path.display()))?;
        bytes.push(b'\n');
        write_atomic(path, &bytes)
            .with_context(|| format!("{}: write {}", ErrorCode::StateIo, path.display()))
    }
}

/// Write to a temp file in the same directory, fsync, then rename over the
/// destination. A crash mid-write leaves the old document intact.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

/// Move a corrupt document aside as `<name>.corrupt.<ts>`.
fn backup_corrupt(path: &Path) {
    let backup = path.with_extension(format!("corrupt.{}", now_ms()));
    if let Err(e) = std::fs::rename(path, &backup) {
        warn!(path = %path.display(), "corrupt backup failed: {e}");
    }
}

fn file_mtime_ms(path: &Path) -> anyhow::Result<u64> {
    let meta = std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let mtime = meta.modified().with_context(|| format!("mtime of {}", path.display()))?;
    Ok(mtime.duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64)
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
