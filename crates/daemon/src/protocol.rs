// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for the daemon socket.
//!
//! Newline-delimited JSON over a Unix domain socket. Requests carry a
//! `cmd` tag and are not correlated by id; lifecycle events carry an
//! `event` tag and are pushed to every connected client. Direct replies
//! (`pong`, `panes`, attach replay) go only to the requesting client.

use std::path::PathBuf;

use anyhow::Context;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use crate::pane::{ActivityState, PaneId, PaneInfo, PaneMode, Role};

/// Refuse lines beyond this size; a runaway writer cannot wedge the daemon.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Client → daemon commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Create a PTY for a pane, or reattach if the pane is already alive.
    Spawn {
        pane: PaneId,
        role: Role,
        command: Vec<String>,
        cwd: PathBuf,
        mode: PaneMode,
        cols: u16,
        rows: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_session: Option<String>,
    },
    /// Raw bytes to a pane (base64). For exec panes this starts a fresh
    /// child and pipes the payload to its stdin.
    Write { pane: PaneId, data: String },
    Resize { pane: PaneId, cols: u16, rows: u16 },
    /// Terminate the child. The pane record survives unless `full` is set.
    Kill {
        pane: PaneId,
        #[serde(default)]
        full: bool,
    },
    List,
    /// Replay the pane's scrollback to the requesting client.
    Attach { pane: PaneId },
    Ping,
    Shutdown,
}

/// Daemon → client events and replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Spawned {
        pane: PaneInfo,
        #[serde(default)]
        reattached: bool,
    },
    /// PTY output (base64). `replay` marks scrollback sent during attach.
    Data {
        pane: PaneId,
        data: String,
        #[serde(default)]
        replay: bool,
    },
    Exit {
        pane: PaneId,
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// Structured activity parsed from an exec-mode stream.
    Activity {
        pane: PaneId,
        state: ActivityState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// An exec child reported (or changed) its session identifier.
    Session { pane: PaneId, session_id: String },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pane: Option<PaneId>,
        reason: String,
        message: String,
    },
    Panes { panes: Vec<PaneInfo> },
    Pong,
}

/// Encode a raw payload for the `data` field.
pub fn encode_payload(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode a `data` field payload.
pub fn decode_payload(data: &str) -> anyhow::Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .context("invalid base64 payload")
}

/// Serialize a message as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(msg: &T) -> anyhow::Result<String> {
    let mut line = serde_json::to_string(msg).context("encode protocol message")?;
    line.push('\n');
    Ok(line)
}

/// Write one protocol message to an async writer.
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> anyhow::Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let line = encode_line(msg)?;
    writer.write_all(line.as_bytes()).await.context("write protocol line")?;
    writer.flush().await.context("flush protocol line")?;
    Ok(())
}

/// Read the next protocol message from a buffered line reader.
///
/// Returns `Ok(None)` on a clean EOF. Oversized lines fail the connection.
pub async fn read_message<R, T>(reader: &mut R) -> anyhow::Result<Option<T>>
where
    R: AsyncBufReadExt + Unpin,
    T: serde::de::DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .await
            .context("read protocol line")?;
        if n == 0 {
            return Ok(None);
        }
        if n > MAX_LINE_BYTES {
            anyhow::bail!("protocol line exceeds {MAX_LINE_BYTES} bytes");
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let msg = serde_json::from_str(trimmed)
            .with_context(|| format!("malformed protocol line: {trimmed}"))?;
        return Ok(Some(msg));
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
