// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pane model shared by the daemon and its clients.
//!
//! A pane is a logical slot bound to one team role and at most one child
//! process. The daemon owns the live records; clients see [`PaneInfo`]
//! snapshots through `list` and `spawned` events.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Identity of a pane slot (1-based small integer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaneId(pub u8);

impl fmt::Display for PaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Team roles. Wire tokens are uppercase (`ARCHITECT`, `IMPLEMENTER_A`);
/// trigger files are kebab-case (`implementer-a.txt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Architect,
    Orchestrator,
    ImplementerA,
    ImplementerB,
    Investigator,
    Reviewer,
}

impl Role {
    /// All roles in pane order.
    pub const ALL: [Role; 6] = [
        Role::Architect,
        Role::Orchestrator,
        Role::ImplementerA,
        Role::ImplementerB,
        Role::Investigator,
        Role::Reviewer,
    ];

    /// Uppercase wire token used in trigger-line prefixes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architect => "ARCHITECT",
            Self::Orchestrator => "ORCHESTRATOR",
            Self::ImplementerA => "IMPLEMENTER_A",
            Self::ImplementerB => "IMPLEMENTER_B",
            Self::Investigator => "INVESTIGATOR",
            Self::Reviewer => "REVIEWER",
        }
    }

    /// Parse an uppercase wire token (e.g. `"REVIEWER"`).
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "ARCHITECT" => Some(Self::Architect),
            "ORCHESTRATOR" => Some(Self::Orchestrator),
            "IMPLEMENTER_A" => Some(Self::ImplementerA),
            "IMPLEMENTER_B" => Some(Self::ImplementerB),
            "INVESTIGATOR" => Some(Self::Investigator),
            "REVIEWER" => Some(Self::Reviewer),
            _ => None,
        }
    }

    /// Trigger file stem for this role (`implementer-a` → `implementer-a.txt`).
    pub fn trigger_stem(&self) -> &'static str {
        match self {
            Self::Architect => "architect",
            Self::Orchestrator => "orchestrator",
            Self::ImplementerA => "implementer-a",
            Self::ImplementerB => "implementer-b",
            Self::Investigator => "investigator",
            Self::Reviewer => "reviewer",
        }
    }

    /// Parse a trigger file stem (`"implementer-a"`).
    pub fn from_trigger_stem(stem: &str) -> Option<Self> {
        Role::ALL.iter().copied().find(|r| r.trigger_stem() == stem)
    }

    /// True for the two worker panes whose routing is workflow-gated.
    pub fn is_worker(&self) -> bool {
        matches!(self, Self::ImplementerA | Self::ImplementerB)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the pane's CLI consumes input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaneMode {
    /// Persistent REPL on a PTY; messages are typed and submitted with Enter.
    Interactive,
    /// One-shot child per message; the payload is piped to stdin.
    Exec,
}

/// Coarse activity classification derived from pane output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Idle,
    Starting,
    Thinking,
    Streaming,
    Tool,
    Command,
    File,
    Done,
    Ready,
    Error,
}

impl ActivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Thinking => "thinking",
            Self::Streaming => "streaming",
            Self::Tool => "tool",
            Self::Command => "command",
            Self::File => "file",
            Self::Done => "done",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    /// Map a structured activity token from an exec-mode stream.
    /// Unknown tokens are reported as `None` and ignored upstream.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "idle" => Some(Self::Idle),
            "starting" | "init" => Some(Self::Starting),
            "thinking" => Some(Self::Thinking),
            "streaming" | "message" => Some(Self::Streaming),
            "tool" | "tool_use" => Some(Self::Tool),
            "command" => Some(Self::Command),
            "file" => Some(Self::File),
            "done" | "result" => Some(Self::Done),
            "ready" => Some(Self::Ready),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit status of a pane child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// Snapshot of a pane reported by `list` and `spawned`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaneInfo {
    pub id: PaneId,
    pub role: Role,
    pub mode: PaneMode,
    pub alive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub activity: ActivityState,
    pub last_output_ms: u64,
    pub last_input_ms: u64,
    pub last_activity_ms: u64,
}

/// Live pane record owned by the daemon. Timestamps are epoch millis kept
/// in atomics so session tasks and the command dispatcher never contend.
pub struct PaneRecord {
    pub id: PaneId,
    pub role: Role,
    pub command: Vec<String>,
    pub cwd: PathBuf,
    pub mode: PaneMode,
    pub alive: AtomicBool,
    pub child_pid: AtomicU32,
    pub session_id: parking_lot::Mutex<Option<String>>,
    pub activity: parking_lot::Mutex<ActivityState>,
    pub last_output_ms: AtomicU64,
    pub last_input_ms: AtomicU64,
    pub last_activity_ms: AtomicU64,
}

impl PaneRecord {
    pub fn new(id: PaneId, role: Role, command: Vec<String>, cwd: PathBuf, mode: PaneMode) -> Self {
        Self {
            id,
            role,
            command,
            cwd,
            mode,
            alive: AtomicBool::new(false),
            child_pid: AtomicU32::new(0),
            session_id: parking_lot::Mutex::new(None),
            activity: parking_lot::Mutex::new(ActivityState::Starting),
            last_output_ms: AtomicU64::new(0),
            last_input_ms: AtomicU64::new(0),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub fn mark_output(&self) {
        let now = now_ms();
        self.last_output_ms.store(now, Ordering::Relaxed);
        self.last_activity_ms.store(now, Ordering::Relaxed);
    }

    pub fn mark_input(&self) {
        let now = now_ms();
        self.last_input_ms.store(now, Ordering::Relaxed);
        self.last_activity_ms.store(now, Ordering::Relaxed);
    }

    pub fn set_activity(&self, state: ActivityState) {
        *self.activity.lock() = state;
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn set_session_id(&self, id: Option<String>) {
        *self.session_id.lock() = id;
    }

    pub fn info(&self) -> PaneInfo {
        PaneInfo {
            id: self.id,
            role: self.role,
            mode: self.mode,
            alive: self.alive.load(Ordering::Acquire),
            session_id: self.session_id.lock().clone(),
            activity: *self.activity.lock(),
            last_output_ms: self.last_output_ms.load(Ordering::Relaxed),
            last_input_ms: self.last_input_ms.load(Ordering::Relaxed),
            last_activity_ms: self.last_activity_ms.load(Ordering::Relaxed),
        }
    }
}

/// Current time as epoch milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "pane_tests.rs"]
mod tests;
