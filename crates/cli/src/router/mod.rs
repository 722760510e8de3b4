// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trigger & sequence router.
//!
//! A single task turns trigger-file changes into injections with
//! exactly-once-per-seq semantics per `(sender, recipient)` pair. Dedup,
//! the session-banner reset, and `lastSeen` advancement all happen on this
//! one task, making them linearizable against each other. `lastSeen` for a
//! pair advances only after that recipient's injection acked success;
//! per-pair tracking lets one recipient of a broadcast succeed while
//! another is retried without risking duplication at the first.

pub mod delivery;
pub mod metrics;
pub mod parse;
pub mod seq;
pub mod watch;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hivemindd::pane::{now_ms, PaneId, PaneMode, Role};

use crate::event::CoordEvent;
use crate::inject::{InjectionPipeline, InjectionResult};
use crate::track::PaneTracker;
use crate::workspace::{RouteTarget, Workspace};

use delivery::{AckOutcome, DeliveryRecord, DeliveryTracker};
use metrics::{MetricKind, MetricsSnapshot, RouterMetrics};
use parse::ParsedLine;
use seq::SequenceTracker;
use watch::TriggerBatch;

/// Minimum gap between consecutive recipients of one broadcast, to avoid
/// thundering-herd submission across panes.
const BROADCAST_STAGGER: Duration = Duration::from_millis(100);

/// An injection result returning from the pipeline for one recipient.
#[derive(Debug)]
struct AckMsg {
    delivery_id: Uuid,
    pane: PaneId,
    result: InjectionResult,
}

pub struct Router {
    workspace: Workspace,
    tracker: Arc<PaneTracker>,
    pipeline: Arc<InjectionPipeline>,
    events: broadcast::Sender<CoordEvent>,
    seqs: SequenceTracker,
    deliveries: DeliveryTracker,
    metrics: Arc<Mutex<RouterMetrics>>,
    ack_tx: mpsc::Sender<AckMsg>,
    ack_rx: mpsc::Receiver<AckMsg>,
}

impl Router {
    pub fn new(
        workspace: Workspace,
        tracker: Arc<PaneTracker>,
        pipeline: Arc<InjectionPipeline>,
        events: broadcast::Sender<CoordEvent>,
    ) -> Self {
        let seqs = SequenceTracker::new(workspace.read_message_state());
        let (ack_tx, ack_rx) = mpsc::channel(256);
        Self {
            workspace,
            tracker,
            pipeline,
            events,
            seqs,
            deliveries: DeliveryTracker::new(),
            metrics: Arc::new(Mutex::new(RouterMetrics::new())),
            ack_tx,
            ack_rx,
        }
    }

    /// Read-only handle on the rolling ledger.
    pub fn metrics_handle(&self) -> Arc<Mutex<RouterMetrics>> {
        Arc::clone(&self.metrics)
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.lock().snapshot()
    }

    /// Run until cancelled, consuming watcher batches and injection acks.
    pub async fn run(mut self, mut batches: mpsc::Receiver<TriggerBatch>, cancel: CancellationToken) {
        let mut expiry = tokio::time::interval(Duration::from_secs(1));
        expiry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                batch = batches.recv() => {
                    match batch {
                        Some(batch) => self.handle_batch(batch),
                        None => break,
                    }
                }
                ack = self.ack_rx.recv() => {
                    if let Some(ack) = ack {
                        self.handle_ack(ack);
                    }
                }
                _ = expiry.tick() => self.expire_deliveries(),
                _ = cancel.cancelled() => break,
            }
        }
        info!("router stopped");
    }

    fn handle_batch(&mut self, batch: TriggerBatch) {
        for line in &batch.lines {
            self.handle_line(batch.target, line);
        }
    }

    fn handle_line(&mut self, target: RouteTarget, line: &str) {
        let parsed = parse::parse(line);

        if let (Some(sender), Some(seq)) = (parsed.sender.as_deref(), parsed.seq) {
            self.seqs.note_outbound(sender, seq);
        }

        let recipients = self.route(target, &parsed);
        if recipients.is_empty() {
            return;
        }

        // One gate read per line; the gate enforces a human-visible
        // workflow, not an invariant.
        let phase = self.workspace.read_state().phase;

        let mut deliverable: Vec<(PaneId, Role)> = Vec::new();
        for (pane, recipient) in recipients {
            if recipient.is_worker() && !phase.allows_worker_dispatch() {
                debug!(%recipient, phase = phase.as_str(), "delivery blocked by workflow gate");
                self.record_metric(MetricKind::Blocked, pane);
                let _ = self.events.send(CoordEvent::TriggerBlocked {
                    sender: parsed.sender.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
                    recipient,
                    reason: format!("phase={}", phase.as_str()),
                });
                continue;
            }

            if let (Some(sender), Some(seq)) = (parsed.sender.as_deref(), parsed.seq) {
                if !self.seqs.admit(sender, recipient, seq, parsed.session_banner()) {
                    debug!(
                        sender,
                        %recipient,
                        seq,
                        last_seen = self.seqs.last_seen(sender, recipient),
                        "skipping duplicate seq",
                    );
                    self.record_metric(MetricKind::SkippedDuplicate, pane);
                    continue;
                }
            }

            deliverable.push((pane, recipient));
        }

        if deliverable.is_empty() {
            return;
        }

        let record = DeliveryRecord::new(parsed.sender.clone(), parsed.seq, &deliverable);
        let delivery_id = record.id;
        self.deliveries.open(record);

        for (pane, _) in &deliverable {
            self.record_metric(MetricKind::Sent, *pane);
        }

        // Dispatch off-task: recipients are staggered and each completion
        // flows back through the ack channel.
        for (index, (pane, _)) in deliverable.iter().enumerate() {
            let pipeline = Arc::clone(&self.pipeline);
            let ack_tx = self.ack_tx.clone();
            let text = parsed.raw.clone();
            let pane = *pane;
            tokio::spawn(async move {
                if index > 0 {
                    tokio::time::sleep(BROADCAST_STAGGER * index as u32).await;
                }
                let (done_tx, done_rx) = oneshot::channel();
                let result = match pipeline.enqueue(pane, text, done_tx) {
                    Ok(()) => done_rx
                        .await
                        .unwrap_or_else(|_| InjectionResult::failed(crate::error::ErrorCode::PtyWriteFailed)),
                    Err(code) => InjectionResult::failed(code),
                };
                let _ = ack_tx.send(AckMsg { delivery_id, pane, result }).await;
            });
        }
    }

    /// Map a route target to concrete panes. Broadcasts exclude the sender.
    fn route(&self, target: RouteTarget, parsed: &ParsedLine) -> Vec<(PaneId, Role)> {
        match target {
            RouteTarget::Role(role) => match self.tracker.pane_for_role(role) {
                Some(pane) => vec![(pane, role)],
                None => {
                    warn!(%role, "no pane bound to recipient role");
                    vec![]
                }
            },
            RouteTarget::All => {
                let sender_role = parsed.sender.as_deref().and_then(Role::from_token);
                self.tracker
                    .panes()
                    .into_iter()
                    .filter(|(_, role)| Some(*role) != sender_role)
                    .collect()
            }
        }
    }

    fn handle_ack(&mut self, ack: AckMsg) {
        // Capture metadata before the tracker consumes the ack; a late ack
        // for an expired record has nothing to act on.
        let Some(record) = self.deliveries.get(ack.delivery_id) else {
            debug!(delivery = %ack.delivery_id, "ack for unknown delivery (late or expired)");
            return;
        };
        let sender = record.sender.clone();
        let seq = record.seq;
        let created_ms = record.created_ms;

        let _ = self.events.send(CoordEvent::DeliveryAck {
            delivery_id: ack.delivery_id.to_string(),
            pane: ack.pane,
            success: ack.result.success,
            verified: ack.result.verified,
        });

        let outcome = self.deliveries.ack(ack.delivery_id, ack.pane, ack.result);
        let first_ack = match &outcome {
            AckOutcome::Pending { first_ack } | AckOutcome::Complete { first_ack, .. } => *first_ack,
            AckOutcome::Unknown => return,
        };
        if first_ack {
            self.metrics.lock().record_latency(now_ms().saturating_sub(created_ms));
        }

        if ack.result.success {
            self.record_metric(MetricKind::Delivered, ack.pane);
            // Per-pair advancement: this recipient has now acted on the seq.
            if let (Some(sender), Some(seq)) = (sender, seq) {
                if let Some(recipient) = self.tracker.role_of(ack.pane) {
                    self.seqs.record_delivered(&sender, recipient, seq);
                    self.persist_sequences();
                }
            }
        } else {
            self.record_metric(MetricKind::Failed, ack.pane);
        }

        if let AckOutcome::Complete { record, .. } = outcome {
            debug!(
                delivery = %record.id,
                succeeded = record.all_succeeded(),
                acks = record.acks.len(),
                "delivery complete",
            );
        }
    }

    fn expire_deliveries(&mut self) {
        for record in self.deliveries.expire(now_ms()) {
            warn!(
                delivery = %record.id,
                sender = record.sender.as_deref().unwrap_or("-"),
                seq = record.seq.unwrap_or(0),
                outstanding = record.pending.len(),
                "delivery timed out; lastSeen not advanced",
            );
            for (pane, _) in &record.pending {
                self.record_metric(MetricKind::TimedOut, *pane);
            }
        }
    }

    fn record_metric(&self, kind: MetricKind, pane: PaneId) {
        let mode = self.tracker.mode(pane).unwrap_or(PaneMode::Interactive);
        self.metrics.lock().record(kind, mode, Some(pane));
    }

    fn persist_sequences(&self) {
        if let Err(e) = self.workspace.write_message_state(self.seqs.state()) {
            error!("message-state persist failed: {e:#}");
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
