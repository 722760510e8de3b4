// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use hivemindd::pane::{now_ms, ActivityState, PaneId, PaneMode, Role};
use hivemindd::protocol::{encode_payload, Event};

use super::PaneTracker;

#[test]
fn unknown_panes_read_as_dead_and_silent() {
    let tracker = PaneTracker::new();
    assert!(!tracker.is_alive(PaneId(1)));
    assert_eq!(tracker.ms_since_output(PaneId(1)), u64::MAX);
    assert!(!tracker.output_after(PaneId(1), 0));
}

#[test]
fn data_events_stamp_output() {
    let tracker = PaneTracker::new();
    tracker.register(PaneId(1), Role::Architect, PaneMode::Interactive);

    let before = now_ms();
    tracker.observe(&Event::Data {
        pane: PaneId(1),
        data: encode_payload(b"output"),
        replay: false,
    });
    assert!(tracker.is_alive(PaneId(1)));
    assert!(tracker.last_output_ms(PaneId(1)) >= before);
    assert!(tracker.output_after(PaneId(1), before.saturating_sub(1)));
}

#[test]
fn replayed_scrollback_is_not_fresh_output() {
    let tracker = PaneTracker::new();
    tracker.register(PaneId(2), Role::Orchestrator, PaneMode::Interactive);
    tracker.observe(&Event::Data {
        pane: PaneId(2),
        data: encode_payload(b"old"),
        replay: true,
    });
    assert_eq!(tracker.last_output_ms(PaneId(2)), 0);
}

#[test]
fn exit_marks_pane_dead() {
    let tracker = PaneTracker::new();
    tracker.register(PaneId(3), Role::ImplementerA, PaneMode::Interactive);
    tracker.note_output(PaneId(3));
    assert!(tracker.is_alive(PaneId(3)));

    tracker.observe(&Event::Exit { pane: PaneId(3), code: Some(0), signal: None });
    assert!(!tracker.is_alive(PaneId(3)));
}

#[test]
fn activity_updates_state_and_counts_as_liveness() {
    let tracker = PaneTracker::new();
    tracker.register(PaneId(4), Role::ImplementerB, PaneMode::Exec);
    tracker.observe(&Event::Activity {
        pane: PaneId(4),
        state: ActivityState::Tool,
        detail: None,
    });
    let stats = match tracker.stats(PaneId(4)) {
        Some(stats) => stats,
        None => unreachable!("pane registered above"),
    };
    assert_eq!(*stats.activity.lock(), ActivityState::Tool);
    assert!(tracker.last_output_ms(PaneId(4)) > 0);
}

#[test]
fn role_lookup() {
    let tracker = PaneTracker::new();
    tracker.register(PaneId(1), Role::Architect, PaneMode::Interactive);
    tracker.register(PaneId(5), Role::Investigator, PaneMode::Exec);

    assert_eq!(tracker.pane_for_role(Role::Investigator), Some(PaneId(5)));
    assert_eq!(tracker.pane_for_role(Role::Reviewer), None);
    assert_eq!(tracker.role_of(PaneId(1)), Some(Role::Architect));
    assert_eq!(tracker.panes().len(), 2);
    assert_eq!(tracker.mode(PaneId(5)), Some(PaneMode::Exec));
}
