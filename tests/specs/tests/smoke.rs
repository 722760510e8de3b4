// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests spawning the real `hivemindd` binary.

use std::path::PathBuf;
use std::time::Duration;

use hivemind_specs::DaemonProcess;
use hivemindd::pane::{PaneId, PaneMode, Role};
use hivemindd::protocol::{decode_payload, encode_payload, Command, Event};

const TIMEOUT: Duration = Duration::from_secs(15);

fn spawn_cmd(pane: u8, role: Role, command: &[&str], mode: PaneMode, cwd: PathBuf) -> Command {
    Command::Spawn {
        pane: PaneId(pane),
        role,
        command: command.iter().map(|s| s.to_string()).collect(),
        cwd,
        mode,
        cols: 120,
        rows: 40,
        resume_session: None,
    }
}

async fn wait_for<F>(rx: &mut tokio::sync::broadcast::Receiver<Event>, mut want: F) -> anyhow::Result<Event>
where
    F: FnMut(&Event) -> bool,
{
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv()).await??;
        if want(&event) {
            return Ok(event);
        }
    }
}

#[tokio::test]
async fn ping_and_pid_file() -> anyhow::Result<()> {
    let daemon = DaemonProcess::start()?;
    let client = daemon.client().await?;

    client.ping(TIMEOUT).await?;
    let recorded = std::fs::read_to_string(daemon.pid_file())?;
    assert_eq!(recorded.trim().parse::<u32>().ok(), Some(daemon.pid()));

    client.close();
    Ok(())
}

#[tokio::test]
async fn exec_pane_round_trip_with_session_capture() -> anyhow::Result<()> {
    let daemon = DaemonProcess::start()?;
    let client = daemon.client().await?;
    let mut rx = client.subscribe();
    let pane = PaneId(3);

    let script = r#"cat; echo '{"type":"result","session_id":"sess-e2e"}'"#;
    client
        .send(spawn_cmd(
            3,
            Role::ImplementerA,
            &["sh", "-c", script],
            PaneMode::Exec,
            daemon.workspace.path().to_path_buf(),
        ))
        .await?;
    wait_for(&mut rx, |e| matches!(e, Event::Spawned { pane: p, .. } if p.id == pane)).await?;

    client.send(Command::Write { pane, data: encode_payload(b"echo-me\n") }).await?;

    // The payload streams back, then the turn completes.
    let mut data = Vec::new();
    loop {
        let event = wait_for(&mut rx, |e| {
            matches!(e, Event::Data { pane: p, .. } | Event::Exit { pane: p, .. } | Event::Session { pane: p, .. } if *p == pane)
        })
        .await?;
        match event {
            Event::Data { data: chunk, .. } => data.extend_from_slice(&decode_payload(&chunk)?),
            Event::Exit { code, .. } => {
                assert_eq!(code, Some(0));
                break;
            }
            _ => {}
        }
    }
    let text = String::from_utf8_lossy(&data).to_string();
    assert!(text.contains("echo-me"));

    // The reported session id landed in the pane record.
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let panes = client.list_panes(TIMEOUT).await?;
        let session = panes
            .iter()
            .find(|p| p.id == pane)
            .and_then(|p| p.session_id.clone());
        if session.as_deref() == Some("sess-e2e") {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("session id never captured: {session:?}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    client.close();
    Ok(())
}

#[tokio::test]
async fn interactive_pane_survives_client_disconnect() -> anyhow::Result<()> {
    let mut daemon = DaemonProcess::start()?;

    // First "ui host" spawns a long-lived interactive pane.
    {
        let client = daemon.client().await?;
        let mut rx = client.subscribe();
        client
            .send(spawn_cmd(
                1,
                Role::Architect,
                &["sh", "-c", "echo pane-up; sleep 600"],
                PaneMode::Interactive,
                daemon.workspace.path().to_path_buf(),
            ))
            .await?;
        wait_for(&mut rx, |e| matches!(e, Event::Spawned { .. })).await?;
        wait_for(&mut rx, |e| matches!(e, Event::Data { .. })).await?;
        client.close(); // simulated UI crash: connection drops, no shutdown
    }

    assert!(daemon.is_running());

    // Second host reattaches: the pane is still alive, scrollback replays.
    let client = daemon.client().await?;
    let panes = client.list_panes(TIMEOUT).await?;
    assert_eq!(panes.len(), 1);
    assert!(panes[0].alive);

    let mut rx = client.subscribe();
    client.send(Command::Attach { pane: PaneId(1) }).await?;
    let replay = wait_for(&mut rx, |e| matches!(e, Event::Data { replay: true, .. })).await?;
    if let Event::Data { data, .. } = replay {
        let text = String::from_utf8_lossy(&decode_payload(&data)?).to_string();
        assert!(text.contains("pane-up"));
    }

    client.close();
    Ok(())
}

#[tokio::test]
async fn kill_preserves_pane_record_and_full_removes_it() -> anyhow::Result<()> {
    let daemon = DaemonProcess::start()?;
    let client = daemon.client().await?;
    let mut rx = client.subscribe();
    let pane = PaneId(2);

    client
        .send(spawn_cmd(
            2,
            Role::Orchestrator,
            &["sleep", "600"],
            PaneMode::Interactive,
            daemon.workspace.path().to_path_buf(),
        ))
        .await?;
    wait_for(&mut rx, |e| matches!(e, Event::Spawned { .. })).await?;

    client.send(Command::Kill { pane, full: false }).await?;
    wait_for(&mut rx, |e| matches!(e, Event::Exit { pane: p, .. } if *p == pane)).await?;

    // The record survives a plain kill.
    let panes = client.list_panes(TIMEOUT).await?;
    assert_eq!(panes.len(), 1);
    assert!(!panes[0].alive);

    client.send(Command::Kill { pane, full: true }).await?;
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if client.list_panes(TIMEOUT).await?.is_empty() {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("pane record never removed");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    client.close();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_daemon_and_cleans_pid_file() -> anyhow::Result<()> {
    let mut daemon = DaemonProcess::start()?;
    let client = daemon.client().await?;

    client.send(Command::Shutdown).await?;
    assert!(daemon.wait_for_exit(TIMEOUT));
    assert!(!daemon.pid_file().exists());

    client.close();
    Ok(())
}

#[tokio::test]
async fn second_daemon_refuses_same_workspace() -> anyhow::Result<()> {
    let daemon = DaemonProcess::start()?;
    let client = daemon.client().await?;
    client.ping(TIMEOUT).await?;

    // A second daemon on the same workspace + socket must refuse to start.
    let mut second = std::process::Command::new(hivemind_specs::daemon_binary())
        .arg("--workspace")
        .arg(daemon.workspace.path())
        .arg("--endpoint")
        .arg(&daemon.socket)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    let status = second.wait()?;
    assert!(!status.success());

    // The original daemon is unaffected.
    client.ping(TIMEOUT).await?;
    client.close();
    Ok(())
}
