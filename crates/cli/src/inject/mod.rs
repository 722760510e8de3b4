// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Injection pipeline: deliver one message to one pane and confirm
//! submission.
//!
//! Each pane gets a dedicated worker task draining a bounded FIFO; the
//! worker itself is the serialization point, so a pane never has more than
//! one in-flight delivery. Enqueues past the high-water mark fail with
//! `queue_full`, which the router treats like any delivery failure.

pub mod exec;
pub mod interactive;
pub mod sweeper;

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hivemindd::pane::{now_ms, PaneId, PaneMode, Role};

use crate::client::DaemonClient;
use crate::error::ErrorCode;
use crate::track::PaneTracker;

/// Per-pane FIFO capacity; one past this mark rejects with `queue_full`.
pub const QUEUE_HIGH_WATER: usize = 100;

/// Outcome of one injection attempt.
///
/// `success=false` means the message did not reach the pane. A message
/// that WAS submitted but never produced confirming output reports
/// `success=true, verified=false` — retrying it upstream would risk a
/// duplicate delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionResult {
    pub success: bool,
    pub verified: bool,
    pub reason: Option<ErrorCode>,
}

impl InjectionResult {
    pub fn ok() -> Self {
        Self { success: true, verified: true, reason: None }
    }

    pub fn unverified() -> Self {
        Self { success: true, verified: false, reason: Some(ErrorCode::VerificationFailed) }
    }

    pub fn failed(reason: ErrorCode) -> Self {
        Self { success: false, verified: false, reason: Some(reason) }
    }
}

/// A queued delivery.
struct Job {
    text: String,
    done: oneshot::Sender<InjectionResult>,
}

/// Record of an injection that submitted but never verified. The sweeper
/// re-issues Enter for these while they are young.
#[derive(Debug, Clone)]
pub struct StuckRecord {
    pub message_id: uuid::Uuid,
    pub first_seen_ms: u64,
    pub retry_count: u32,
}

type StuckProbe = Box<dyn Fn(PaneId) + Send + Sync>;

pub struct InjectionPipeline {
    client: DaemonClient,
    tracker: Arc<PaneTracker>,
    queues: Mutex<IndexMap<PaneId, mpsc::Sender<Job>>>,
    stuck: Mutex<IndexMap<PaneId, StuckRecord>>,
    identity_injected: Mutex<HashSet<PaneId>>,
    /// Bound after construction to break the pipeline ↔ supervisor cycle.
    stuck_probe: Mutex<Option<StuckProbe>>,
    cancel: CancellationToken,
}

impl InjectionPipeline {
    pub fn new(
        client: DaemonClient,
        tracker: Arc<PaneTracker>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            tracker,
            queues: Mutex::new(IndexMap::new()),
            stuck: Mutex::new(IndexMap::new()),
            identity_injected: Mutex::new(HashSet::new()),
            stuck_probe: Mutex::new(None),
            cancel,
        })
    }

    /// Late-bind the supervisor's stuck callback (see DESIGN notes on the
    /// ownership cycle).
    pub fn set_stuck_probe(&self, probe: impl Fn(PaneId) + Send + Sync + 'static) {
        *self.stuck_probe.lock() = Some(Box::new(probe));
    }

    /// Start the worker task for a pane. Idempotent per pane id.
    pub fn register_pane(self: &Arc<Self>, pane: PaneId, role: Role, mode: PaneMode) {
        let mut queues = self.queues.lock();
        if queues.contains_key(&pane) {
            return;
        }
        let (tx, rx) = mpsc::channel::<Job>(QUEUE_HIGH_WATER);
        queues.insert(pane, tx);
        drop(queues);
        tokio::spawn(Arc::clone(self).worker(pane, role, mode, rx));
    }

    /// Queue one message for a pane. The only public delivery operation.
    pub fn enqueue(
        &self,
        pane: PaneId,
        text: impl Into<String>,
        done: oneshot::Sender<InjectionResult>,
    ) -> Result<(), ErrorCode> {
        let queues = self.queues.lock();
        let Some(tx) = queues.get(&pane) else {
            return Err(ErrorCode::PtyWriteFailed);
        };
        match tx.try_send(Job { text: text.into(), done }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                let _ = job.done.send(InjectionResult::failed(ErrorCode::QueueFull));
                Err(ErrorCode::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                let _ = job.done.send(InjectionResult::failed(ErrorCode::PtyWriteFailed));
                Err(ErrorCode::PtyWriteFailed)
            }
        }
    }

    /// Queue a message and await its result (operator sends, supervisor
    /// prompts).
    pub async fn deliver(&self, pane: PaneId, text: impl Into<String>) -> InjectionResult {
        let (tx, rx) = oneshot::channel();
        if let Err(code) = self.enqueue(pane, text, tx) {
            return InjectionResult::failed(code);
        }
        rx.await.unwrap_or_else(|_| InjectionResult::failed(ErrorCode::PtyWriteFailed))
    }

    /// Snapshot of panes with unverified submissions.
    pub fn stuck_panes(&self) -> Vec<(PaneId, StuckRecord)> {
        self.stuck.lock().iter().map(|(id, r)| (*id, r.clone())).collect()
    }

    pub(crate) fn clear_stuck(&self, pane: PaneId) {
        self.stuck.lock().shift_remove(&pane);
    }

    pub(crate) fn bump_stuck_retry(&self, pane: PaneId) {
        if let Some(record) = self.stuck.lock().get_mut(&pane) {
            record.retry_count += 1;
        }
    }

    pub(crate) fn client(&self) -> &DaemonClient {
        &self.client
    }

    pub(crate) fn tracker(&self) -> &PaneTracker {
        &self.tracker
    }

    /// Worker: drains the pane FIFO in caller order, one delivery at a time.
    async fn worker(self: Arc<Self>, pane: PaneId, role: Role, mode: PaneMode, mut rx: mpsc::Receiver<Job>) {
        loop {
            let job = tokio::select! {
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
                _ = self.cancel.cancelled() => break,
            };

            let result = match mode {
                PaneMode::Interactive => {
                    interactive::deliver(&self.client, &self.tracker, pane, &job.text).await
                }
                PaneMode::Exec => {
                    let first = self.identity_injected.lock().insert(pane);
                    let payload = if first {
                        format!("{}\n{}", exec::identity_preamble(role), job.text)
                    } else {
                        job.text.clone()
                    };
                    exec::deliver(&self.client, pane, &payload).await
                }
            };

            match result.reason {
                Some(ErrorCode::VerificationFailed) => {
                    debug!(pane = %pane, "injection unverified, tracking for sweeper");
                    self.stuck.lock().entry(pane).or_insert_with(|| StuckRecord {
                        message_id: uuid::Uuid::new_v4(),
                        first_seen_ms: now_ms(),
                        retry_count: 0,
                    });
                    if let Some(probe) = self.stuck_probe.lock().as_ref() {
                        probe(pane);
                    }
                }
                Some(reason) if !result.success => {
                    warn!(pane = %pane, %reason, "injection failed");
                }
                _ => {
                    // Confirmed delivery clears any stale stuck record.
                    self.clear_stuck(pane);
                }
            }

            let _ = job.done.send(result);
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
