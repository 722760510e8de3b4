// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exec-mode pane execution.
//!
//! An exec pane has no resident REPL: each `write` spawns a fresh child,
//! pipes the payload to its stdin, closes stdin, and streams stdout back
//! as `data` events. Structured JSONL lines on stdout are additionally
//! surfaced as `activity` events, and the child's reported session id is
//! captured so a later spawn can resume the conversation.

use std::path::Path;
use std::process::Stdio;

use anyhow::Context;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command as ProcessCommand;
use tokio::sync::mpsc;

use crate::pane::{ActivityState, ExitStatus};

/// Output emitted while an exec child runs.
#[derive(Debug, Clone)]
pub enum ExecEmission {
    Data(Bytes),
    Activity { state: ActivityState, detail: Option<String> },
}

/// Result of one exec run.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub status: ExitStatus,
    /// Session id the child reported, if any. Survives pane restarts.
    pub session_id: Option<String>,
}

/// Structured signal extracted from one stdout line.
#[derive(Debug, Default, PartialEq)]
pub struct StreamSignal {
    pub activity: Option<(ActivityState, Option<String>)>,
    pub session_id: Option<String>,
    /// True for an explicit completion marker (`"type":"done"` / `"result"`).
    pub done: bool,
}

/// Parse one exec stdout line for activity / session-id signals.
///
/// Non-JSON lines and JSON without a recognized `type` yield an empty
/// signal; the raw line still flows to subscribers as data.
pub fn parse_stream_line(line: &str) -> StreamSignal {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
        return StreamSignal::default();
    };
    let Some(obj) = value.as_object() else {
        return StreamSignal::default();
    };

    let session_id = obj
        .get("session_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_owned);

    let mut done = false;
    let activity = obj.get("type").and_then(|v| v.as_str()).and_then(|token| {
        let state = ActivityState::from_token(token)?;
        if state == ActivityState::Done {
            done = true;
        }
        let detail = obj
            .get("tool")
            .or_else(|| obj.get("detail"))
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        Some((state, detail))
    });

    StreamSignal { activity, session_id, done }
}

/// A spawned exec child, not yet fed its payload.
pub struct ExecChild {
    child: tokio::process::Child,
}

impl ExecChild {
    /// Spawn the pane command in `cwd`. When `resume_session` is set, a
    /// resume directive is appended so conversational context survives
    /// restarts.
    pub fn spawn(
        command: &[String],
        cwd: &Path,
        resume_session: Option<&str>,
    ) -> anyhow::Result<Self> {
        let (program, args) = command.split_first().context("pane command is empty")?;

        let mut cmd = ProcessCommand::new(program);
        cmd.args(args);
        if let Some(session) = resume_session {
            cmd.arg("--resume").arg(session);
        }
        cmd.current_dir(cwd)
            .env("HIVEMIND", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().with_context(|| format!("spawn exec child {program}"))?;
        Ok(Self { child })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Feed the payload, stream output until the child exits, and return
    /// the outcome. Emissions are best-effort; a dropped receiver does not
    /// abort the run.
    pub async fn run(
        mut self,
        payload: Bytes,
        emit_tx: mpsc::Sender<ExecEmission>,
    ) -> anyhow::Result<ExecOutcome> {
        if let Some(mut stdin) = self.child.stdin.take() {
            stdin.write_all(&payload).await.context("write exec stdin")?;
            stdin.shutdown().await.context("close exec stdin")?;
        }

        let stdout = self.child.stdout.take().context("exec child missing stdout")?;
        let stderr = self.child.stderr.take().context("exec child missing stderr")?;

        // stderr is opaque; forward it as raw data.
        let stderr_emit = emit_tx.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut bytes = line.into_bytes();
                bytes.extend_from_slice(b"\r\n");
                if stderr_emit.send(ExecEmission::Data(Bytes::from(bytes))).await.is_err() {
                    break;
                }
            }
        });

        let mut session_id = None;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await.context("read exec stdout")? {
            let signal = parse_stream_line(&line);
            if let Some(sid) = signal.session_id {
                session_id = Some(sid);
            }
            if let Some((state, detail)) = signal.activity {
                let _ = emit_tx.send(ExecEmission::Activity { state, detail }).await;
            }
            let mut bytes = line.into_bytes();
            bytes.extend_from_slice(b"\r\n");
            let _ = emit_tx.send(ExecEmission::Data(Bytes::from(bytes))).await;
        }

        let exit = self.child.wait().await.context("wait exec child")?;
        let _ = stderr_task.await;

        let status = exit_status(exit);
        Ok(ExecOutcome { status, session_id })
    }
}

fn exit_status(exit: std::process::ExitStatus) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus { code: exit.code(), signal: exit.signal() }
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod tests;
