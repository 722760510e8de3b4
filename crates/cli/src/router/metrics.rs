// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rolling router ledger: delivery counters bucketed by pane mode, plus
//! sent→first-ack latency samples. Capped; exposed read-only.

use std::collections::VecDeque;

use serde::Serialize;

use hivemindd::pane::{now_ms, PaneId, PaneMode};

/// Event cap for the rolling ledger.
const LEDGER_CAP: usize = 2000;
/// Latency sample cap.
const LATENCY_CAP: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Sent,
    Delivered,
    Failed,
    TimedOut,
    SkippedDuplicate,
    Blocked,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricEvent {
    pub at_ms: u64,
    pub kind: MetricKind,
    pub mode: PaneMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pane: Option<PaneId>,
}

/// Counter pair bucketed by pane mode.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ModeCounter {
    pub interactive: u64,
    pub exec: u64,
}

impl ModeCounter {
    fn bump(&mut self, mode: PaneMode) {
        match mode {
            PaneMode::Interactive => self.interactive += 1,
            PaneMode::Exec => self.exec += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.interactive + self.exec
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MetricCounters {
    pub sent: ModeCounter,
    pub delivered: ModeCounter,
    pub failed: ModeCounter,
    pub timed_out: ModeCounter,
    pub skipped_duplicate: ModeCounter,
    pub blocked: ModeCounter,
}

/// Read-only snapshot for operators and tests.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: MetricCounters,
    pub ledger_len: usize,
    pub latency_samples: usize,
    pub latency_mean_ms: Option<u64>,
}

#[derive(Default)]
pub struct RouterMetrics {
    counters: MetricCounters,
    ledger: VecDeque<MetricEvent>,
    latency_ms: VecDeque<u64>,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: MetricKind, mode: PaneMode, pane: Option<PaneId>) {
        match kind {
            MetricKind::Sent => self.counters.sent.bump(mode),
            MetricKind::Delivered => self.counters.delivered.bump(mode),
            MetricKind::Failed => self.counters.failed.bump(mode),
            MetricKind::TimedOut => self.counters.timed_out.bump(mode),
            MetricKind::SkippedDuplicate => self.counters.skipped_duplicate.bump(mode),
            MetricKind::Blocked => self.counters.blocked.bump(mode),
        }
        if self.ledger.len() == LEDGER_CAP {
            self.ledger.pop_front();
        }
        self.ledger.push_back(MetricEvent { at_ms: now_ms(), kind, mode, pane });
    }

    /// Record the sent→first-ack latency for one delivery.
    pub fn record_latency(&mut self, ms: u64) {
        if self.latency_ms.len() == LATENCY_CAP {
            self.latency_ms.pop_front();
        }
        self.latency_ms.push_back(ms);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency_mean_ms = if self.latency_ms.is_empty() {
            None
        } else {
            Some(self.latency_ms.iter().sum::<u64>() / self.latency_ms.len() as u64)
        };
        MetricsSnapshot {
            counters: self.counters,
            ledger_len: self.ledger.len(),
            latency_samples: self.latency_ms.len(),
            latency_mean_ms,
        }
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
