// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::pane::ActivityState;

use super::*;

#[test]
fn plain_text_lines_carry_no_signal() {
    assert_eq!(parse_stream_line("compiling..."), StreamSignal::default());
    assert_eq!(parse_stream_line("[1,2,3]"), StreamSignal::default());
}

#[test]
fn activity_tokens_map_to_states() {
    let signal = parse_stream_line(r#"{"type":"tool_use","tool":"Read"}"#);
    assert_eq!(signal.activity, Some((ActivityState::Tool, Some("Read".to_string()))));
    assert!(!signal.done);

    let signal = parse_stream_line(r#"{"type":"thinking"}"#);
    assert_eq!(signal.activity, Some((ActivityState::Thinking, None)));
}

#[test]
fn result_line_marks_completion() {
    let signal = parse_stream_line(r#"{"type":"result","session_id":"abc-123"}"#);
    assert!(signal.done);
    assert_eq!(signal.session_id.as_deref(), Some("abc-123"));
}

#[test]
fn unparseable_session_ids_treated_as_absent() {
    assert_eq!(parse_stream_line(r#"{"type":"init","session_id":42}"#).session_id, None);
    assert_eq!(parse_stream_line(r#"{"type":"init","session_id":""}"#).session_id, None);
    assert_eq!(
        parse_stream_line(r#"{"type":"init","session_id":"s-9"}"#).session_id.as_deref(),
        Some("s-9"),
    );
}

#[test]
fn unknown_type_is_ignored() {
    let signal = parse_stream_line(r#"{"type":"telemetry","session_id":"keep-me"}"#);
    assert_eq!(signal.activity, None);
    assert_eq!(signal.session_id.as_deref(), Some("keep-me"));
}

#[tokio::test]
async fn exec_child_pipes_payload_and_streams_output() -> anyhow::Result<()> {
    let child = ExecChild::spawn(&["cat".to_string()], &std::env::temp_dir(), None)?;
    let (emit_tx, mut emit_rx) = mpsc::channel(16);

    let outcome = child.run(Bytes::from_static(b"ping\n"), emit_tx).await?;
    assert_eq!(outcome.status.code, Some(0));
    assert_eq!(outcome.session_id, None);

    let mut data = Vec::new();
    while let Some(emission) = emit_rx.recv().await {
        if let ExecEmission::Data(chunk) = emission {
            data.extend_from_slice(&chunk);
        }
    }
    assert_eq!(data, b"ping\r\n");
    Ok(())
}

#[tokio::test]
async fn exec_child_captures_session_and_activity() -> anyhow::Result<()> {
    let script = r#"echo '{"type":"init","session_id":"sess-42"}'; echo '{"type":"result"}'"#;
    let child = ExecChild::spawn(
        &["sh".to_string(), "-c".to_string(), script.to_string()],
        &std::env::temp_dir(),
        None,
    )?;
    let (emit_tx, mut emit_rx) = mpsc::channel(16);

    let outcome = child.run(Bytes::new(), emit_tx).await?;
    assert_eq!(outcome.session_id.as_deref(), Some("sess-42"));

    let mut states = Vec::new();
    while let Some(emission) = emit_rx.recv().await {
        if let ExecEmission::Activity { state, .. } = emission {
            states.push(state);
        }
    }
    assert_eq!(states, vec![ActivityState::Starting, ActivityState::Done]);
    Ok(())
}

#[tokio::test]
async fn exec_child_reports_nonzero_exit() -> anyhow::Result<()> {
    let child = ExecChild::spawn(
        &["sh".to_string(), "-c".to_string(), "exit 3".to_string()],
        &std::env::temp_dir(),
        None,
    )?;
    let (emit_tx, _emit_rx) = mpsc::channel(16);
    let outcome = child.run(Bytes::new(), emit_tx).await?;
    assert_eq!(outcome.status.code, Some(3));
    Ok(())
}
