// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exec-mode delivery.
//!
//! There is no Enter to send: the daemon pipes the payload to a fresh
//! child's stdin and the delivery completes when that child exits (or the
//! stream carries a structured completion marker). Focus and verify steps
//! do not apply. The first message per pane is prefixed with an identity
//! preamble so the agent knows its role and how to address teammates.

use std::time::Duration;

use tokio::sync::broadcast;

use hivemindd::pane::{ActivityState, PaneId, Role};
use hivemindd::protocol::Event;

use crate::client::DaemonClient;
use crate::error::ErrorCode;

use super::InjectionResult;

/// Generous cap on one exec turn; past it the delivery is reported
/// submitted-but-unverified, mirroring the interactive verify exhaustion.
const EXEC_COMPLETE_MAX: Duration = Duration::from_secs(600);

/// Identity preamble injected before the first message of an exec pane.
pub(crate) fn identity_preamble(role: Role) -> String {
    let roster = Role::ALL.map(|r| r.as_str()).join(", ");
    format!(
        "[HIVEMIND IDENTITY] You are {role}. Your team: {roster}. \
         Send messages by appending `({role} #<seq>): <body>` lines to \
         `triggers/<recipient>.txt` (or `triggers/all.txt` to broadcast) \
         in the shared workspace; number your messages sequentially \
         starting at 1.",
    )
}

/// Deliver one payload to an exec pane and wait for turn completion.
pub(crate) async fn deliver(client: &DaemonClient, pane: PaneId, payload: &str) -> InjectionResult {
    // Subscribe before writing so the completion event cannot be missed.
    let mut rx = client.subscribe();

    if client.write_bytes(pane, payload.as_bytes()).await.is_err() {
        let reason = if client.is_connected() {
            ErrorCode::PtyWriteFailed
        } else {
            ErrorCode::DaemonUnavailable
        };
        return InjectionResult::failed(reason);
    }

    let deadline = tokio::time::Instant::now() + EXEC_COMPLETE_MAX;
    loop {
        let event = match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(event) => event,
            Err(_) => return InjectionResult::unverified(),
        };
        match event {
            Ok(Event::Exit { pane: p, .. }) if p == pane => return InjectionResult::ok(),
            Ok(Event::Activity { pane: p, state: ActivityState::Done, .. }) if p == pane => {
                return InjectionResult::ok();
            }
            Ok(Event::Error { pane: Some(p), reason, .. }) if p == pane => {
                let code = if reason == "pty_write_failed" {
                    ErrorCode::PtyWriteFailed
                } else {
                    ErrorCode::DaemonUnavailable
                };
                return InjectionResult::failed(code);
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                return InjectionResult::failed(ErrorCode::DaemonUnavailable);
            }
        }
    }
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod tests;
