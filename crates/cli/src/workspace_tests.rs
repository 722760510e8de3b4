// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use hivemindd::pane::Role;

use super::*;

fn workspace() -> (tempfile::TempDir, Workspace) {
    #[allow(clippy::unwrap_used)]
    let dir = tempfile::tempdir().unwrap();
    let ws = Workspace::new(dir.path());
    (dir, ws)
}

#[test]
fn layout_is_created() -> anyhow::Result<()> {
    let (_dir, ws) = workspace();
    ws.ensure_layout()?;
    assert!(ws.triggers_dir().is_dir());
    assert!(ws.sync_dir().is_dir());
    assert!(ws.queue_dir().is_dir());
    Ok(())
}

#[test]
fn missing_state_reads_as_default() {
    let (_dir, ws) = workspace();
    let state = ws.read_state();
    assert_eq!(state, WorkspaceState::default());
    assert_eq!(state.phase, Phase::Idle);
}

#[test]
fn state_write_read_round_trip() -> anyhow::Result<()> {
    let (_dir, ws) = workspace();
    let mut state = WorkspaceState { phase: Phase::Executing, ..Default::default() };
    state.agent_claims.insert("IMPLEMENTER_A".to_string(), "task-7".to_string());
    state.push_error("checkpoint drift");

    ws.write_state(&state)?;
    let read = ws.read_state();
    assert_eq!(read.phase, Phase::Executing);
    assert_eq!(read.agent_claims.get("IMPLEMENTER_A").map(String::as_str), Some("task-7"));
    assert_eq!(read.recent_errors.len(), 1);

    // Idempotence: writing what we read reproduces the same document.
    ws.write_state(&read)?;
    assert_eq!(ws.read_state(), read);
    Ok(())
}

#[test]
fn corrupt_state_is_backed_up_and_replaced_with_defaults() -> anyhow::Result<()> {
    let (_dir, ws) = workspace();
    std::fs::create_dir_all(ws.root())?;
    std::fs::write(ws.state_path(), "{ not json")?;

    let state = ws.read_state();
    assert_eq!(state, WorkspaceState::default());
    assert!(!ws.state_path().exists());

    let backups: Vec<_> = std::fs::read_dir(ws.root())?
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("state.corrupt."))
        .collect();
    assert_eq!(backups.len(), 1);
    Ok(())
}

#[test]
fn unknown_phase_tolerated() -> anyhow::Result<()> {
    let (_dir, ws) = workspace();
    std::fs::create_dir_all(ws.root())?;
    std::fs::write(ws.state_path(), r#"{"phase":"migrating"}"#)?;
    assert_eq!(ws.read_state().phase, Phase::Unknown);
    Ok(())
}

#[test]
fn phase_gates_worker_dispatch() {
    assert!(Phase::Executing.allows_worker_dispatch());
    assert!(Phase::CheckpointFix.allows_worker_dispatch());
    assert!(!Phase::Planning.allows_worker_dispatch());
    assert!(!Phase::Idle.allows_worker_dispatch());
    assert!(!Phase::NeedsAttention.allows_worker_dispatch());
}

#[test]
fn recent_errors_ring_is_bounded() {
    let mut state = WorkspaceState::default();
    for i in 0..60 {
        state.push_error(format!("error {i}"));
    }
    assert_eq!(state.recent_errors.len(), 50);
    assert_eq!(state.recent_errors[0].message, "error 10");
}

#[test]
fn message_state_wire_field_names() -> anyhow::Result<()> {
    let (_dir, ws) = workspace();
    let mut state = MessageState::default();
    let entry = state.sequences.entry("REVIEWER".to_string()).or_default();
    entry.outbound = 4;
    entry.last_seen.insert("ARCHITECT".to_string(), 9);

    ws.write_message_state(&state)?;
    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(
        ws.message_state_path(),
    )?)?;
    assert_eq!(raw["sequences"]["REVIEWER"]["outbound"], 4);
    assert_eq!(raw["sequences"]["REVIEWER"]["lastSeen"]["ARCHITECT"], 9);
    assert!(raw["updatedAt"].as_u64().is_some_and(|v| v > 0));

    let read = ws.read_message_state();
    assert_eq!(read.sequences["REVIEWER"].last_seen["ARCHITECT"], 9);
    Ok(())
}

#[test]
fn session_state_round_trip() -> anyhow::Result<()> {
    let (_dir, ws) = workspace();
    let mut state = SessionState::default();
    state.0.insert(
        "3".to_string(),
        SessionEntry {
            session_id: Some("sess-abc".to_string()),
            mode: Some(hivemindd::pane::PaneMode::Exec),
            last_seen: 1234,
        },
    );
    ws.write_session_state(&state)?;
    assert_eq!(ws.read_session_state(), state);
    Ok(())
}

#[test]
fn trigger_append_adds_newline_and_accumulates() -> anyhow::Result<()> {
    let (_dir, ws) = workspace();
    ws.append_trigger(RouteTarget::Role(Role::Reviewer), "(ARCHITECT #1): look at this")?;
    ws.append_trigger(RouteTarget::Role(Role::Reviewer), "(ARCHITECT #2): and this\n")?;

    let contents = std::fs::read_to_string(ws.trigger_path(RouteTarget::Role(Role::Reviewer)))?;
    assert_eq!(contents, "(ARCHITECT #1): look at this\n(ARCHITECT #2): and this\n");
    Ok(())
}

#[test]
fn route_targets_resolve_stems() {
    assert_eq!(RouteTarget::from_stem("all"), Some(RouteTarget::All));
    assert_eq!(
        RouteTarget::from_stem("implementer-b"),
        Some(RouteTarget::Role(Role::ImplementerB)),
    );
    assert_eq!(RouteTarget::from_stem("queen"), None);
    assert_eq!(RouteTarget::All.stem(), "all");
}

#[test]
fn sync_files_report_mtime_and_missing() -> anyhow::Result<()> {
    let (_dir, ws) = workspace();
    assert!(ws.read_sync("blockers.md")?.is_none());

    let mtime = ws.write_sync("blockers.md", "none right now")?;
    assert!(mtime > 0);
    let (body, read_mtime) = ws.read_sync("blockers.md")?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(body, "none right now");
    assert_eq!(read_mtime, mtime);

    ws.append_sync("errors.md", "pane 4 stuck")?;
    let (body, _) = ws.read_sync("errors.md")?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(body, "pane 4 stuck\n");
    Ok(())
}
