// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interactive (REPL-style) delivery.
//!
//! The CLI reads a line from its PTY and submits on Enter. Submission under
//! active output is unreliable, so the writer adapts its Enter delay to
//! output recency, clears leftover input with Ctrl-U first, and verifies
//! that the submission actually took effect by watching for fresh output.
//! In a terminal host the reference's focus/synthetic-key steps collapse to
//! writing a carriage return.

use std::time::Duration;

use crate::client::DaemonClient;
use crate::error::ErrorCode;
use crate::track::PaneTracker;

use super::InjectionResult;

use hivemindd::pane::{now_ms, PaneId};

/// Enter delay when the pane produced output within the last 100 ms.
pub(crate) const ENTER_DELAY_BUSY: Duration = Duration::from_millis(300);
/// Enter delay when output is 100–500 ms old.
pub(crate) const ENTER_DELAY_ACTIVE: Duration = Duration::from_millis(150);
/// Enter delay for a quiet pane.
pub(crate) const ENTER_DELAY_QUIET: Duration = Duration::from_millis(50);

/// Output younger than this counts as "recent" for idle checks.
pub(crate) const OUTPUT_RECENCY_MS: u64 = 500;
/// Window after our own Enter in which output is assumed to be its echo.
pub(crate) const ENTER_ECHO_GRACE_MS: u64 = 75;
/// Verify cadence and attempt bound.
const VERIFY_POLL: Duration = Duration::from_millis(200);
const VERIFY_ATTEMPTS: u32 = 5;
/// Upper bound on waiting for the pane to go idle between retries.
const IDLE_WAIT_MAX: Duration = Duration::from_secs(10);

/// Line-kill control character, clears a stuck input line.
const CTRL_U: &[u8] = &[0x15];

/// Pick the Enter delay from output recency (§4.4 step 1 constants).
pub(crate) fn adaptive_enter_delay(ms_since_output: u64) -> Duration {
    if ms_since_output <= 100 {
        ENTER_DELAY_BUSY
    } else if ms_since_output <= 500 {
        ENTER_DELAY_ACTIVE
    } else {
        ENTER_DELAY_QUIET
    }
}

fn write_failure(client: &DaemonClient) -> InjectionResult {
    if client.is_connected() {
        InjectionResult::failed(ErrorCode::PtyWriteFailed)
    } else {
        InjectionResult::failed(ErrorCode::DaemonUnavailable)
    }
}

/// Deliver one message to an interactive pane and confirm submission.
pub(crate) async fn deliver(
    client: &DaemonClient,
    tracker: &PaneTracker,
    pane: PaneId,
    text: &str,
) -> InjectionResult {
    let delay = adaptive_enter_delay(tracker.ms_since_output(pane));

    // Daemon-side write failures come back as error events, not send
    // errors; subscribe before writing so none are missed.
    let mut errors = client.subscribe();

    // Clear any stuck input left by a previous failed submission.
    // Errors here are tolerated; the write below is the real probe.
    let _ = client.write_bytes(pane, CTRL_U).await;

    if client.write_bytes(pane, text.as_bytes()).await.is_err() {
        return write_failure(client);
    }
    tracker.note_input(pane);

    tokio::time::sleep(delay).await;
    if let Some(result) = check_write_errors(&mut errors, pane) {
        return result;
    }

    if client.write_bytes(pane, b"\r").await.is_err() {
        let mut result = write_failure(client);
        if result.reason == Some(ErrorCode::PtyWriteFailed) {
            result.reason = Some(ErrorCode::EnterFailed);
        }
        return result;
    }
    let mut enter_at = now_ms();

    // Verify-and-retry: confirmed when fresh output lands after the Enter
    // (past the echo grace). Exhaustion is NOT a failure — Enter was sent.
    for attempt in 1..=VERIFY_ATTEMPTS {
        tokio::time::sleep(VERIFY_POLL).await;
        if let Some(result) = check_write_errors(&mut errors, pane) {
            return result;
        }
        if tracker.output_after(pane, enter_at + ENTER_ECHO_GRACE_MS) {
            return InjectionResult::ok();
        }
        if attempt == VERIFY_ATTEMPTS {
            break;
        }
        wait_for_idle(tracker, pane, IDLE_WAIT_MAX).await;
        if client.write_bytes(pane, b"\r").await.is_err() {
            return InjectionResult::failed(ErrorCode::EnterFailed);
        }
        enter_at = now_ms();
    }

    InjectionResult::unverified()
}

/// Scan buffered events for a daemon-side write failure on this pane.
fn check_write_errors(
    errors: &mut tokio::sync::broadcast::Receiver<hivemindd::protocol::Event>,
    pane: PaneId,
) -> Option<InjectionResult> {
    loop {
        match errors.try_recv() {
            Ok(hivemindd::protocol::Event::Error { pane: Some(p), reason, .. })
                if p == pane && reason == "pty_write_failed" =>
            {
                return Some(InjectionResult::failed(ErrorCode::PtyWriteFailed));
            }
            Ok(_) => continue,
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return None,
        }
    }
}

/// Poll until the pane has been output-quiet for [`OUTPUT_RECENCY_MS`], or
/// the cap elapses.
pub(crate) async fn wait_for_idle(tracker: &PaneTracker, pane: PaneId, max: Duration) {
    let deadline = tokio::time::Instant::now() + max;
    loop {
        if tracker.ms_since_output(pane) >= OUTPUT_RECENCY_MS {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
#[path = "interactive_tests.rs"]
mod tests;
