// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use hivemindd::pane::{now_ms, PaneId, Role};

use crate::error::ErrorCode;
use crate::inject::InjectionResult;

use super::*;

fn recipients() -> Vec<(PaneId, Role)> {
    vec![(PaneId(3), Role::ImplementerA), (PaneId(4), Role::ImplementerB)]
}

#[test]
fn record_completes_when_all_recipients_ack() {
    let mut tracker = DeliveryTracker::new();
    let record = DeliveryRecord::new(Some("ARCHITECT".to_string()), Some(7), &recipients());
    let id = tracker.open(record);
    assert_eq!(tracker.outstanding(), 1);

    match tracker.ack(id, PaneId(3), InjectionResult::ok()) {
        AckOutcome::Pending { first_ack } => assert!(first_ack),
        other => unreachable!("expected pending, got {other:?}"),
    }

    match tracker.ack(id, PaneId(4), InjectionResult::ok()) {
        AckOutcome::Complete { record, first_ack } => {
            assert!(!first_ack);
            assert!(record.all_succeeded());
            assert_eq!(record.acks.len(), 2);
        }
        other => unreachable!("expected complete, got {other:?}"),
    }
    assert_eq!(tracker.outstanding(), 0);
}

#[test]
fn partial_failure_is_not_a_success() {
    let mut tracker = DeliveryTracker::new();
    let id = tracker.open(DeliveryRecord::new(Some("ARCHITECT".to_string()), Some(1), &recipients()));

    let _ = tracker.ack(id, PaneId(3), InjectionResult::ok());
    match tracker.ack(id, PaneId(4), InjectionResult::failed(ErrorCode::PtyWriteFailed)) {
        AckOutcome::Complete { record, .. } => assert!(!record.all_succeeded()),
        other => unreachable!("expected complete, got {other:?}"),
    }
}

#[test]
fn duplicate_and_unknown_acks_are_rejected() {
    let mut tracker = DeliveryTracker::new();
    let id = tracker.open(DeliveryRecord::new(None, None, &[(PaneId(2), Role::Orchestrator)]));

    // Pane not part of the delivery.
    assert!(matches!(tracker.ack(id, PaneId(9), InjectionResult::ok()), AckOutcome::Unknown));

    assert!(matches!(
        tracker.ack(id, PaneId(2), InjectionResult::ok()),
        AckOutcome::Complete { .. },
    ));
    // Record is gone now.
    assert!(matches!(tracker.ack(id, PaneId(2), InjectionResult::ok()), AckOutcome::Unknown));
}

#[test]
fn expiry_clears_only_aged_records() {
    let mut tracker = DeliveryTracker::new();
    let mut old = DeliveryRecord::new(Some("REVIEWER".to_string()), Some(2), &recipients());
    old.created_ms = now_ms() - DELIVERY_TIMEOUT.as_millis() as u64 - 1_000;
    let old_id = old.id;
    tracker.open(old);
    tracker.open(DeliveryRecord::new(Some("REVIEWER".to_string()), Some(3), &recipients()));

    let expired = tracker.expire(now_ms());
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, old_id);
    assert_eq!(tracker.outstanding(), 1);

    // Late acks for the expired record no longer land anywhere.
    assert!(matches!(tracker.ack(old_id, PaneId(3), InjectionResult::ok()), AckOutcome::Unknown));
}
