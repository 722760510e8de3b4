// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use hivemindd::pane::{PaneId, PaneMode, Role};

use crate::error::ErrorCode;
use crate::test_support::FakeDaemon;
use crate::track::PaneTracker;

use super::*;

async fn pipeline_with_daemon() -> anyhow::Result<(FakeDaemon, Arc<InjectionPipeline>)> {
    let daemon = FakeDaemon::start().await?;
    let client = daemon.client().await?;
    let tracker = Arc::new(PaneTracker::new());
    let pipeline = InjectionPipeline::new(client, tracker, CancellationToken::new());
    Ok((daemon, pipeline))
}

#[tokio::test]
async fn exec_fifo_preserves_order_and_injects_identity_once() -> anyhow::Result<()> {
    let (daemon, pipeline) = pipeline_with_daemon().await?;
    daemon.enable_auto_exit();
    let pane = PaneId(2);
    pipeline.tracker().register(pane, Role::Orchestrator, PaneMode::Exec);
    pipeline.register_pane(pane, Role::Orchestrator, PaneMode::Exec);

    let mut waiters = Vec::new();
    for text in ["first", "second", "third"] {
        let (tx, rx) = oneshot::channel();
        pipeline.enqueue(pane, text, tx).map_err(|e| anyhow::anyhow!("enqueue: {e}"))?;
        waiters.push(rx);
    }
    for rx in waiters {
        let result = tokio::time::timeout(Duration::from_secs(10), rx).await??;
        assert!(result.success);
    }

    let writes = daemon.written_to(pane);
    assert_eq!(writes.len(), 3);
    let first = String::from_utf8_lossy(&writes[0]).to_string();
    assert!(first.starts_with("[HIVEMIND IDENTITY]"));
    assert!(first.ends_with("first"));
    assert_eq!(writes[1], b"second".to_vec());
    assert_eq!(writes[2], b"third".to_vec());
    Ok(())
}

#[tokio::test]
async fn unknown_pane_is_a_delivery_failure() -> anyhow::Result<()> {
    let (_daemon, pipeline) = pipeline_with_daemon().await?;
    let (tx, _rx) = oneshot::channel();
    assert_eq!(pipeline.enqueue(PaneId(9), "lost", tx), Err(ErrorCode::PtyWriteFailed));
    Ok(())
}

#[tokio::test]
async fn queue_accepts_high_water_and_rejects_one_past() -> anyhow::Result<()> {
    let (_daemon, pipeline) = pipeline_with_daemon().await?;
    let pane = PaneId(4);
    // Interactive pane with no output: each delivery occupies the worker
    // for the full verify window, so the queue backs up deterministically.
    pipeline.tracker().register(pane, Role::ImplementerB, PaneMode::Interactive);
    pipeline.register_pane(pane, Role::ImplementerB, PaneMode::Interactive);

    // One delivery in flight…
    let (tx, _in_flight) = oneshot::channel();
    pipeline.enqueue(pane, "in flight", tx).map_err(|e| anyhow::anyhow!("{e}"))?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // …then exactly the high-water mark of queued messages is accepted.
    let mut pending = Vec::new();
    for i in 0..QUEUE_HIGH_WATER {
        let (tx, rx) = oneshot::channel();
        pipeline
            .enqueue(pane, format!("queued {i}"), tx)
            .map_err(|e| anyhow::anyhow!("enqueue {i}: {e}"))?;
        pending.push(rx);
    }

    // One past the mark rejects and resolves its completion with queue_full.
    let (tx, rx) = oneshot::channel();
    assert_eq!(pipeline.enqueue(pane, "overflow", tx), Err(ErrorCode::QueueFull));
    let result = rx.await?;
    assert_eq!(result, InjectionResult::failed(ErrorCode::QueueFull));
    Ok(())
}

#[tokio::test]
async fn unverified_delivery_arms_sweeper_and_probe() -> anyhow::Result<()> {
    let (_daemon, pipeline) = pipeline_with_daemon().await?;
    let pane = PaneId(3);
    pipeline.tracker().register(pane, Role::ImplementerA, PaneMode::Interactive);
    pipeline.register_pane(pane, Role::ImplementerA, PaneMode::Interactive);

    let probed: Arc<Mutex<Vec<PaneId>>> = Arc::new(Mutex::new(Vec::new()));
    let probe_log = Arc::clone(&probed);
    pipeline.set_stuck_probe(move |pane| probe_log.lock().push(pane));

    // Silent pane: submission succeeds but never verifies.
    let result = pipeline.deliver(pane, "(ARCHITECT #5): do X").await;
    assert!(result.success);
    assert!(!result.verified);

    assert_eq!(probed.lock().as_slice(), &[pane]);
    let stuck = pipeline.stuck_panes();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].0, pane);
    assert_eq!(stuck[0].1.retry_count, 0);
    Ok(())
}
