// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

use hivemindd::pane::{ActivityState, PaneId, Role};

/// Coordination events surfaced to host subscribers, superseding the raw
/// daemon events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum CoordEvent {
    PaneActivity {
        pane: PaneId,
        state: ActivityState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    SyncFileChanged {
        file: String,
        mtime_ms: u64,
    },
    TriggerBlocked {
        sender: String,
        recipient: Role,
        reason: String,
    },
    DeliveryAck {
        delivery_id: String,
        pane: PaneId,
        success: bool,
        verified: bool,
    },
    UserAlert {
        pane: PaneId,
        reason: String,
    },
    HeartbeatStateChanged {
        interval_ms: u64,
        mode: HeartbeatMode,
    },
}

/// Adaptive heartbeat band the supervisor is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatMode {
    Idle,
    Active,
    Busy,
}

impl HeartbeatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Busy => "busy",
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
