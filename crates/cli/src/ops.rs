// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator subcommands: `daemon status`, `daemon stop`, `state show`.
//!
//! These never auto-spawn the daemon; a missing daemon is a nonzero exit,
//! not a reason to start one.

use std::time::Duration;

use hivemindd::lifecycle;
use hivemindd::protocol::Command;

use crate::client::{ClientConfig, DaemonClient};
use crate::config::Config;
use crate::workspace::Workspace;

const OP_TIMEOUT: Duration = Duration::from_secs(5);

fn op_client_config(config: &Config) -> ClientConfig {
    let mut client_config =
        ClientConfig::new(config.endpoint_path(), config.workspace.clone()).without_spawn();
    client_config.max_connect_attempts = 1;
    client_config
}

/// `hivemind daemon status` — report pid, endpoint, and pane count.
pub async fn daemon_status(config: &Config) -> i32 {
    let endpoint = config.endpoint_path();
    let pid = lifecycle::read_pid(&lifecycle::pid_path(&config.workspace));

    let client = match DaemonClient::connect(op_client_config(config)).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("daemon: not running ({e:#})");
            return 1;
        }
    };

    let panes = match client.list_panes(OP_TIMEOUT).await {
        Ok(panes) => panes,
        Err(e) => {
            eprintln!("daemon: unresponsive ({e:#})");
            client.close();
            return 1;
        }
    };

    println!("daemon: running");
    match pid {
        Some(pid) => println!("pid: {pid}"),
        None => println!("pid: unknown (no pid file)"),
    }
    println!("endpoint: {}", endpoint.display());
    println!("panes: {}", panes.len());
    for pane in panes {
        let session = pane.session_id.as_deref().unwrap_or("-");
        println!(
            "  {} {} [{}] alive={} activity={} session={}",
            pane.id,
            pane.role,
            match pane.mode {
                hivemindd::pane::PaneMode::Interactive => "interactive",
                hivemindd::pane::PaneMode::Exec => "exec",
            },
            pane.alive,
            pane.activity,
            session,
        );
    }
    client.close();
    0
}

/// `hivemind daemon stop` — ask the daemon to shut down (all PTYs die).
pub async fn daemon_stop(config: &Config) -> i32 {
    let client = match DaemonClient::connect(op_client_config(config)).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("daemon: not running ({e:#})");
            return 1;
        }
    };
    if let Err(e) = client.send(Command::Shutdown).await {
        eprintln!("error: {e:#}");
        client.close();
        return 1;
    }
    // Give the write a beat to flush before dropping the connection.
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.close();
    println!("shutdown sent");
    0
}

/// `hivemind state show` — print the shared state document.
pub fn state_show(config: &Config) -> i32 {
    let workspace = Workspace::new(&config.workspace);
    let state = workspace.read_state();
    match serde_json::to_string_pretty(&state) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

#[cfg(test)]
#[path = "ops_tests.rs"]
mod tests;
