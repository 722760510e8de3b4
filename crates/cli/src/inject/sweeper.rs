// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stuck-injection sweeper.
//!
//! Safety net for deliveries that submitted but never verified: while the
//! record is young and the pane has gone quiet, re-issue Enter. Old records
//! are dropped — at that point the user or the supervisor owns recovery.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use hivemindd::pane::now_ms;

use super::InjectionPipeline;

/// Sweep cadence.
pub(crate) const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
/// The pane must have been output-quiet this long before a re-Enter.
pub(crate) const SWEEP_IDLE_MS: u64 = 10_000;
/// Records older than this are dropped instead of retried.
pub(crate) const SWEEP_MAX_AGE_MS: u64 = 300_000;

/// Run the sweeper until cancelled.
pub async fn run(pipeline: Arc<InjectionPipeline>, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(SWEEP_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = cancel.cancelled() => return,
        }
        sweep_once(&pipeline).await;
    }
}

/// One sweep pass over the stuck records.
pub(crate) async fn sweep_once(pipeline: &InjectionPipeline) {
    for (pane, record) in pipeline.stuck_panes() {
        let age = now_ms().saturating_sub(record.first_seen_ms);
        if age > SWEEP_MAX_AGE_MS {
            info!(pane = %pane, age_ms = age, "dropping aged stuck record");
            pipeline.clear_stuck(pane);
            continue;
        }
        if pipeline.tracker().ms_since_output(pane) < SWEEP_IDLE_MS {
            continue;
        }
        debug!(pane = %pane, retry = record.retry_count + 1, "sweeper re-issuing enter");
        if pipeline.client().write_bytes(pane, b"\r").await.is_ok() {
            pipeline.bump_stuck_retry(pane);
        }
    }
}

#[cfg(test)]
#[path = "sweeper_tests.rs"]
mod tests;
