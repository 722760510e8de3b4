// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-dispatch delivery bookkeeping.
//!
//! One record per routed message tracks the outstanding recipients; the
//! sequence store only advances for pairs whose injection acked success,
//! and records that outlive the timeout are cleared without advancing
//! anything.

use std::time::Duration;

use indexmap::IndexMap;
use uuid::Uuid;

use hivemindd::pane::{now_ms, PaneId, Role};

use crate::inject::InjectionResult;

/// A record is abandoned when not fully acked within this window.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// One recipient's acknowledgement.
#[derive(Debug, Clone)]
pub struct Ack {
    pub pane: PaneId,
    pub recipient: Role,
    pub result: InjectionResult,
    pub at_ms: u64,
}

/// Bookkeeping for a single routed message.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub sender: Option<String>,
    pub seq: Option<u64>,
    pub created_ms: u64,
    /// Recipients still owing an ack.
    pub pending: IndexMap<PaneId, Role>,
    pub acks: Vec<Ack>,
}

impl DeliveryRecord {
    pub fn new(sender: Option<String>, seq: Option<u64>, recipients: &[(PaneId, Role)]) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            seq,
            created_ms: now_ms(),
            pending: recipients.iter().copied().collect(),
            acks: Vec::new(),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.pending.is_empty() && self.acks.iter().all(|a| a.result.success)
    }
}

/// Outcome of applying one ack.
#[derive(Debug)]
pub enum AckOutcome {
    /// Recorded; other recipients still outstanding.
    Pending { first_ack: bool },
    /// Final ack arrived; the record is complete and removed.
    Complete { record: DeliveryRecord, first_ack: bool },
    /// No such delivery (already timed out or never opened).
    Unknown,
}

#[derive(Default)]
pub struct DeliveryTracker {
    records: IndexMap<Uuid, DeliveryRecord>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, record: DeliveryRecord) -> Uuid {
        let id = record.id;
        self.records.insert(id, record);
        id
    }

    pub fn outstanding(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, id: Uuid) -> Option<&DeliveryRecord> {
        self.records.get(&id)
    }

    /// Apply one recipient's result.
    pub fn ack(&mut self, id: Uuid, pane: PaneId, result: InjectionResult) -> AckOutcome {
        let Some(record) = self.records.get_mut(&id) else {
            return AckOutcome::Unknown;
        };
        let Some(recipient) = record.pending.shift_remove(&pane) else {
            return AckOutcome::Unknown;
        };
        let first_ack = record.acks.is_empty();
        record.acks.push(Ack { pane, recipient, result, at_ms: now_ms() });

        if record.pending.is_empty() {
            let record = self
                .records
                .shift_remove(&id)
                .unwrap_or_else(|| DeliveryRecord::new(None, None, &[]));
            AckOutcome::Complete { record, first_ack }
        } else {
            AckOutcome::Pending { first_ack }
        }
    }

    /// Remove and return records older than [`DELIVERY_TIMEOUT`].
    pub fn expire(&mut self, now: u64) -> Vec<DeliveryRecord> {
        let cutoff = now.saturating_sub(DELIVERY_TIMEOUT.as_millis() as u64);
        let expired: Vec<Uuid> = self
            .records
            .iter()
            .filter(|(_, r)| r.created_ms < cutoff)
            .map(|(id, _)| *id)
            .collect();
        expired.into_iter().filter_map(|id| self.records.shift_remove(&id)).collect()
    }
}

#[cfg(test)]
#[path = "delivery_tests.rs"]
mod tests;
