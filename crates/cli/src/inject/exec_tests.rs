// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use hivemindd::pane::{PaneId, Role};
use hivemindd::protocol::Event;

use crate::error::ErrorCode;
use crate::test_support::FakeDaemon;

use super::*;

#[test]
fn preamble_names_role_roster_and_protocol() {
    let preamble = identity_preamble(Role::Investigator);
    assert!(preamble.contains("You are INVESTIGATOR"));
    assert!(preamble.contains("ARCHITECT"));
    assert!(preamble.contains("REVIEWER"));
    assert!(preamble.contains("triggers/all.txt"));
    assert!(preamble.contains("#<seq>"));
}

#[tokio::test]
async fn delivery_completes_on_child_exit() -> anyhow::Result<()> {
    let daemon = FakeDaemon::start().await?;
    daemon.enable_auto_exit();
    let client = daemon.client().await?;
    let pane = PaneId(2);

    let result = deliver(&client, pane, "summarize the diff").await;
    assert!(result.success);
    assert!(result.verified);

    let writes = daemon.written_to(pane);
    assert_eq!(writes, vec![b"summarize the diff".to_vec()]);

    client.close();
    Ok(())
}

#[tokio::test]
async fn delivery_completes_on_done_activity() -> anyhow::Result<()> {
    let daemon = FakeDaemon::start().await?;
    let client = daemon.client().await?;
    let pane = PaneId(5);

    let deliver_fut = deliver(&client, pane, "quick check");
    tokio::pin!(deliver_fut);

    let result = loop {
        tokio::select! {
            result = &mut deliver_fut => break result,
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                if !daemon.written_to(pane).is_empty() {
                    daemon.emit(Event::Activity {
                        pane,
                        state: hivemindd::pane::ActivityState::Done,
                        detail: None,
                    });
                }
            }
        }
    };

    assert!(result.success);
    assert!(result.verified);
    client.close();
    Ok(())
}

#[tokio::test]
async fn daemon_error_event_fails_the_delivery() -> anyhow::Result<()> {
    let daemon = FakeDaemon::start().await?;
    let client = daemon.client().await?;
    let pane = PaneId(6);

    let deliver_fut = deliver(&client, pane, "doomed");
    tokio::pin!(deliver_fut);

    let result = loop {
        tokio::select! {
            result = &mut deliver_fut => break result,
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                if !daemon.written_to(pane).is_empty() {
                    daemon.emit(Event::Error {
                        pane: Some(pane),
                        reason: "pty_write_failed".to_string(),
                        message: "spawn failed".to_string(),
                    });
                }
            }
        }
    };

    assert!(!result.success);
    assert_eq!(result.reason, Some(ErrorCode::PtyWriteFailed));
    client.close();
    Ok(())
}
