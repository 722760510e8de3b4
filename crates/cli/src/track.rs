// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side mirror of pane liveness.
//!
//! The injection pipeline, router, and supervisor all need per-pane
//! activity timestamps without a daemon round trip. The tracker folds the
//! daemon event stream into atomics that those components read freely.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use hivemindd::pane::{now_ms, ActivityState, PaneId, PaneMode, Role};
use hivemindd::protocol::Event;

pub struct PaneStats {
    pub role: Role,
    pub mode: PaneMode,
    pub alive: AtomicBool,
    pub activity: Mutex<ActivityState>,
    pub session_id: Mutex<Option<String>>,
    /// When the pane was registered; a freshly spawned pane that has not
    /// spoken yet is measured from here, not from epoch zero.
    pub started_ms: AtomicU64,
    pub last_output_ms: AtomicU64,
    pub last_input_ms: AtomicU64,
}

impl PaneStats {
    fn new(role: Role, mode: PaneMode) -> Self {
        Self {
            role,
            mode,
            alive: AtomicBool::new(false),
            activity: Mutex::new(ActivityState::Starting),
            session_id: Mutex::new(None),
            started_ms: AtomicU64::new(now_ms()),
            last_output_ms: AtomicU64::new(0),
            last_input_ms: AtomicU64::new(0),
        }
    }
}

#[derive(Default)]
pub struct PaneTracker {
    panes: RwLock<IndexMap<PaneId, Arc<PaneStats>>>,
}

impl PaneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pane before spawn so lookups never race the daemon.
    pub fn register(&self, pane: PaneId, role: Role, mode: PaneMode) {
        self.panes.write().entry(pane).or_insert_with(|| Arc::new(PaneStats::new(role, mode)));
    }

    /// Fold one daemon event into the mirror.
    pub fn observe(&self, event: &Event) {
        match event {
            Event::Spawned { pane, .. } => {
                if let Some(stats) = self.stats(pane.id) {
                    stats.alive.store(pane.alive, Ordering::Release);
                    *stats.session_id.lock() = pane.session_id.clone();
                    *stats.activity.lock() = pane.activity;
                }
            }
            Event::Data { pane, replay, .. } => {
                if !replay {
                    self.note_output(*pane);
                }
            }
            Event::Exit { pane, .. } => {
                if let Some(stats) = self.stats(*pane) {
                    stats.alive.store(false, Ordering::Release);
                }
            }
            Event::Activity { pane, state, .. } => {
                if let Some(stats) = self.stats(*pane) {
                    *stats.activity.lock() = *state;
                    stats.last_output_ms.store(now_ms(), Ordering::Relaxed);
                }
            }
            Event::Session { pane, session_id } => {
                if let Some(stats) = self.stats(*pane) {
                    *stats.session_id.lock() = Some(session_id.clone());
                }
            }
            Event::Error { .. } | Event::Panes { .. } | Event::Pong => {}
        }
    }

    pub fn note_output(&self, pane: PaneId) {
        if let Some(stats) = self.stats(pane) {
            stats.alive.store(true, Ordering::Release);
            stats.last_output_ms.store(now_ms(), Ordering::Relaxed);
        }
    }

    pub fn note_input(&self, pane: PaneId) {
        if let Some(stats) = self.stats(pane) {
            stats.last_input_ms.store(now_ms(), Ordering::Relaxed);
        }
    }

    pub fn stats(&self, pane: PaneId) -> Option<Arc<PaneStats>> {
        self.panes.read().get(&pane).cloned()
    }

    pub fn is_alive(&self, pane: PaneId) -> bool {
        self.stats(pane).map(|s| s.alive.load(Ordering::Acquire)).unwrap_or(false)
    }

    pub fn mode(&self, pane: PaneId) -> Option<PaneMode> {
        self.stats(pane).map(|s| s.mode)
    }

    pub fn last_output_ms(&self, pane: PaneId) -> u64 {
        self.stats(pane).map(|s| s.last_output_ms.load(Ordering::Relaxed)).unwrap_or(0)
    }

    /// Milliseconds since the pane last produced output. `u64::MAX` when it
    /// never has.
    pub fn ms_since_output(&self, pane: PaneId) -> u64 {
        let last = self.last_output_ms(pane);
        if last == 0 {
            return u64::MAX;
        }
        now_ms().saturating_sub(last)
    }

    /// Milliseconds since the pane showed any sign of life: output, or
    /// registration for a pane that has not spoken yet.
    pub fn ms_since_activity(&self, pane: PaneId) -> u64 {
        let Some(stats) = self.stats(pane) else {
            return u64::MAX;
        };
        let last = stats
            .last_output_ms
            .load(Ordering::Relaxed)
            .max(stats.started_ms.load(Ordering::Relaxed));
        now_ms().saturating_sub(last)
    }

    /// Whether output arrived strictly after the given instant (epoch ms).
    pub fn output_after(&self, pane: PaneId, after_ms: u64) -> bool {
        self.last_output_ms(pane) > after_ms
    }

    pub fn pane_for_role(&self, role: Role) -> Option<PaneId> {
        self.panes.read().iter().find(|(_, s)| s.role == role).map(|(id, _)| *id)
    }

    pub fn role_of(&self, pane: PaneId) -> Option<Role> {
        self.stats(pane).map(|s| s.role)
    }

    /// All registered panes in registration order.
    pub fn panes(&self) -> Vec<(PaneId, Role)> {
        self.panes.read().iter().map(|(id, s)| (*id, s.role)).collect()
    }
}

#[cfg(test)]
#[path = "track_tests.rs"]
mod tests;
