// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use hivemindd::pane::{PaneId, Role};

use super::*;

#[test]
fn events_use_kebab_case_tags() -> anyhow::Result<()> {
    let event = CoordEvent::TriggerBlocked {
        sender: "ARCHITECT".to_string(),
        recipient: Role::ImplementerA,
        reason: "phase=planning".to_string(),
    };
    let json = serde_json::to_value(&event)?;
    assert_eq!(json["event"], "trigger-blocked");
    assert_eq!(json["recipient"], "IMPLEMENTER_A");
    Ok(())
}

#[test]
fn delivery_ack_round_trips() -> anyhow::Result<()> {
    let event = CoordEvent::DeliveryAck {
        delivery_id: "d-1".to_string(),
        pane: PaneId(3),
        success: true,
        verified: false,
    };
    let json = serde_json::to_string(&event)?;
    let back: CoordEvent = serde_json::from_str(&json)?;
    assert_eq!(back, event);
    Ok(())
}

#[test]
fn heartbeat_modes_have_wire_names() {
    assert_eq!(HeartbeatMode::Busy.as_str(), "busy");
    assert_eq!(HeartbeatMode::Idle.as_str(), "idle");
}
