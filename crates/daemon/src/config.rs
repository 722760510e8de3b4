// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

use crate::lifecycle::default_endpoint;

/// Terminal daemon for hivemind agent teams.
#[derive(Debug, Parser)]
#[command(name = "hivemindd", version, about)]
pub struct Config {
    /// Workspace directory holding coordination state.
    #[arg(long, env = "HIVEMIND_WORKSPACE")]
    pub workspace: PathBuf,

    /// Socket path override.
    #[arg(long, env = "HIVEMIND_DAEMON_ENDPOINT")]
    pub endpoint: Option<PathBuf>,

    /// Scrollback bytes retained per pane.
    #[arg(long, env = "HIVEMIND_RING_SIZE", default_value = "262144")]
    pub ring_size: usize,

    /// Log format (json or text).
    #[arg(long, env = "HIVEMIND_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "HIVEMIND_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Resolve the socket path, falling back to the platform default.
    pub fn endpoint_path(&self) -> PathBuf {
        self.endpoint.clone().unwrap_or_else(default_endpoint)
    }

    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workspace.as_os_str().is_empty() {
            anyhow::bail!("--workspace must not be empty");
        }
        if self.ring_size == 0 {
            anyhow::bail!("--ring-size must be positive");
        }
        match self.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => anyhow::bail!("invalid log format: {other}"),
        }
    }
}
