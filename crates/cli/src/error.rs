// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed taxonomy of coordination errors.
///
/// These are carried in delivery results and events, never panics; the
/// host keeps running through every one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Atomic write of `state.json` / message-state failed.
    StateIo,
    /// Client cannot reach the daemon after bounded retries.
    DaemonUnavailable,
    /// Daemon could not write bytes to the child.
    PtyWriteFailed,
    /// Input focus could not be established (DOM hosts only; kept for
    /// API compatibility).
    FocusFailed,
    /// The submission keystroke could not be delivered.
    EnterFailed,
    /// Enter was sent but no confirming output arrived in the verify
    /// window. Advisory — not a delivery failure.
    VerificationFailed,
    /// Per-pane FIFO exceeded its high-water mark.
    QueueFull,
    /// A delivery record aged out before all recipients acked.
    DeliveryTimeout,
    /// Malformed trigger line; delivered unsequenced instead.
    TriggerParse,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StateIo => "state_io",
            Self::DaemonUnavailable => "daemon_unavailable",
            Self::PtyWriteFailed => "pty_write_failed",
            Self::FocusFailed => "focus_failed",
            Self::EnterFailed => "enter_failed",
            Self::VerificationFailed => "verification_failed",
            Self::QueueFull => "queue_full",
            Self::DeliveryTimeout => "delivery_timeout",
            Self::TriggerParse => "trigger_parse",
        }
    }

    /// True for reasons that mean the message did not reach the pane.
    /// `lastSeen` never advances past a delivery that failed with one of
    /// these.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            Self::DaemonUnavailable
                | Self::PtyWriteFailed
                | Self::FocusFailed
                | Self::EnterFailed
                | Self::QueueFull
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
