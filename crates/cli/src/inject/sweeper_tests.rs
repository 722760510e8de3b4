// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use hivemindd::pane::{now_ms, PaneId, PaneMode, Role};

use crate::test_support::FakeDaemon;
use crate::track::PaneTracker;

use super::super::{InjectionPipeline, StuckRecord};
use super::{sweep_once, SWEEP_MAX_AGE_MS};

async fn pipeline_with_stuck(
    pane: PaneId,
    age_ms: u64,
) -> anyhow::Result<(FakeDaemon, Arc<InjectionPipeline>)> {
    let daemon = FakeDaemon::start().await?;
    let client = daemon.client().await?;
    let tracker = Arc::new(PaneTracker::new());
    tracker.register(pane, Role::ImplementerA, PaneMode::Interactive);
    let pipeline = InjectionPipeline::new(client, tracker, CancellationToken::new());
    pipeline.stuck.lock().insert(
        pane,
        StuckRecord {
            message_id: uuid::Uuid::new_v4(),
            first_seen_ms: now_ms().saturating_sub(age_ms),
            retry_count: 0,
        },
    );
    Ok((daemon, pipeline))
}

#[tokio::test]
async fn idle_pane_gets_enter_reissued() -> anyhow::Result<()> {
    let pane = PaneId(3);
    let (daemon, pipeline) = pipeline_with_stuck(pane, 60_000).await?;

    sweep_once(&pipeline).await;
    // Give the fake daemon a beat to record the write.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(daemon.written_to(pane), vec![b"\r".to_vec()]);
    let stuck = pipeline.stuck_panes();
    assert_eq!(stuck[0].1.retry_count, 1);
    Ok(())
}

#[tokio::test]
async fn recently_active_pane_is_left_alone() -> anyhow::Result<()> {
    let pane = PaneId(4);
    let (daemon, pipeline) = pipeline_with_stuck(pane, 60_000).await?;
    pipeline.tracker().note_output(pane);

    sweep_once(&pipeline).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(daemon.written_to(pane).is_empty());
    assert_eq!(pipeline.stuck_panes()[0].1.retry_count, 0);
    Ok(())
}

#[tokio::test]
async fn aged_records_are_dropped_without_retry() -> anyhow::Result<()> {
    let pane = PaneId(5);
    let (daemon, pipeline) = pipeline_with_stuck(pane, SWEEP_MAX_AGE_MS + 1_000).await?;

    sweep_once(&pipeline).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The user or supervisor takes over from here.
    assert!(daemon.written_to(pane).is_empty());
    assert!(pipeline.stuck_panes().is_empty());
    Ok(())
}
