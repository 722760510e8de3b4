// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;

use hivemindd::pane::Role;

use crate::workspace::RouteTarget;

use super::*;

fn append(path: &std::path::Path, text: &str) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())?;
    Ok(())
}

#[test]
fn missing_directory_reads_empty() -> anyhow::Result<()> {
    let mut watcher = TriggerWatcher::new("/nonexistent/triggers");
    assert!(watcher.read_new()?.is_empty());
    Ok(())
}

#[test]
fn reads_only_appended_tail_per_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let reviewer = dir.path().join("reviewer.txt");
    append(&reviewer, "(ARCHITECT #1): first\n")?;

    let mut watcher = TriggerWatcher::new(dir.path());
    let batches = watcher.read_new()?;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].target, RouteTarget::Role(Role::Reviewer));
    assert_eq!(batches[0].lines, vec!["(ARCHITECT #1): first".to_string()]);

    // Nothing new on a second scan.
    assert!(watcher.read_new()?.is_empty());

    append(&reviewer, "(ARCHITECT #2): second\n")?;
    let batches = watcher.read_new()?;
    assert_eq!(batches[0].lines, vec!["(ARCHITECT #2): second".to_string()]);
    Ok(())
}

#[test]
fn partial_line_is_held_until_newline_arrives() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("orchestrator.txt");
    append(&path, "(REVIEWER #1): half a mess")?;

    let mut watcher = TriggerWatcher::new(dir.path());
    assert!(watcher.read_new()?.is_empty());

    append(&path, "age\n")?;
    let batches = watcher.read_new()?;
    assert_eq!(batches[0].lines, vec!["(REVIEWER #1): half a message".to_string()]);
    Ok(())
}

#[test]
fn crlf_and_lf_parse_identically() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    append(&dir.path().join("architect.txt"), "(REVIEWER #1): crlf line\r\n(REVIEWER #2): lf line\n")?;

    let mut watcher = TriggerWatcher::new(dir.path());
    let batches = watcher.read_new()?;
    assert_eq!(
        batches[0].lines,
        vec!["(REVIEWER #1): crlf line".to_string(), "(REVIEWER #2): lf line".to_string()],
    );
    Ok(())
}

#[test]
fn unknown_stems_and_non_txt_files_are_ignored() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    append(&dir.path().join("queen.txt"), "(QUEEN #1): not part of this team\n")?;
    append(&dir.path().join("notes.md"), "scratch\n")?;

    let mut watcher = TriggerWatcher::new(dir.path());
    assert!(watcher.read_new()?.is_empty());
    Ok(())
}

#[test]
fn truncation_resets_the_tail() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("all.txt");
    append(&path, "(ARCHITECT #1): before\n")?;

    let mut watcher = TriggerWatcher::new(dir.path());
    let _ = watcher.read_new()?;

    std::fs::write(&path, "(ARCHITECT #1): rewritten\n")?;
    let batches = watcher.read_new()?;
    assert_eq!(batches[0].target, RouteTarget::All);
    assert_eq!(batches[0].lines, vec!["(ARCHITECT #1): rewritten".to_string()]);
    Ok(())
}

#[test]
fn replaced_file_with_new_inode_is_read_from_the_start() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("reviewer.txt");
    append(&path, "(ARCHITECT #1): short\n")?;

    let mut watcher = TriggerWatcher::new(dir.path());
    assert_eq!(watcher.read_new()?[0].lines.len(), 1);

    // Replace via rename so the new file's inode is guaranteed to differ
    // (both files exist at once), and its size is PAST the stale offset.
    // A length check alone would seek into the middle of the new file and
    // misparse whatever lands there.
    let staging = dir.path().join("reviewer.txt.new");
    append(&staging, "(ARCHITECT #1): a replacement file that is much longer than before\n")?;
    std::fs::rename(&staging, &path)?;

    let batches = watcher.read_new()?;
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0].lines,
        vec!["(ARCHITECT #1): a replacement file that is much longer than before".to_string()],
    );
    Ok(())
}

#[tokio::test]
async fn run_streams_batches() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let watcher = TriggerWatcher::new(dir.path());
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    let cancel = tokio_util::sync::CancellationToken::new();
    let handle = tokio::spawn(watcher.run(tx, cancel.clone()));

    append(&dir.path().join("investigator.txt"), "(ORCHESTRATOR #1): dig in\n")?;

    let batch = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("watcher ended"))?;
    assert_eq!(batch.target, RouteTarget::Role(Role::Investigator));
    assert_eq!(batch.lines, vec!["(ORCHESTRATOR #1): dig in".to_string()]);

    cancel.cancel();
    handle.await?;
    Ok(())
}
