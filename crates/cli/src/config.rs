// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

use hivemindd::lifecycle::default_endpoint;
use hivemindd::pane::{PaneId, PaneMode, Role};

/// Coordination host for hivemind agent teams.
#[derive(Debug, Clone, Parser)]
#[command(name = "hivemind", version, about)]
pub struct Config {
    /// Workspace directory holding coordination state.
    #[arg(long, env = "HIVEMIND_WORKSPACE")]
    pub workspace: PathBuf,

    /// Daemon socket path override.
    #[arg(long, env = "HIVEMIND_DAEMON_ENDPOINT")]
    pub endpoint: Option<PathBuf>,

    /// Supervisor heartbeat interval in milliseconds.
    #[arg(long, env = "HIVEMIND_HEARTBEAT_INTERVAL_MS", default_value = "300000")]
    pub heartbeat_interval_ms: u64,

    /// Idle time after which a pane counts as stuck, in milliseconds.
    #[arg(long, env = "HIVEMIND_STUCK_THRESHOLD_MS", default_value = "60000")]
    pub stuck_threshold_ms: u64,

    /// Aggressive nudges before escalating past L1.
    #[arg(long, env = "HIVEMIND_MAX_NUDGES", default_value = "2")]
    pub max_nudges: u32,

    /// Team definition file (JSON). Defaults to a six-pane interactive team.
    #[arg(long, env = "HIVEMIND_TEAM_CONFIG")]
    pub team_config: Option<PathBuf>,

    /// Agent CLI for default-team panes.
    #[arg(long, env = "HIVEMIND_AGENT_COMMAND", default_value = "claude")]
    pub agent_command: String,

    /// Terminal columns for spawned panes.
    #[arg(long, env = "HIVEMIND_COLS", default_value = "200")]
    pub cols: u16,

    /// Terminal rows for spawned panes.
    #[arg(long, env = "HIVEMIND_ROWS", default_value = "50")]
    pub rows: u16,

    /// Periodic status-check prompts to the lead pane.
    #[arg(long, env = "HIVEMIND_LEAD_HEARTBEAT", default_value = "false")]
    pub lead_heartbeat: bool,

    /// Log format (json or text).
    #[arg(long, env = "HIVEMIND_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "HIVEMIND_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Resolve the daemon socket path.
    pub fn endpoint_path(&self) -> PathBuf {
        self.endpoint.clone().unwrap_or_else(default_endpoint)
    }

    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workspace.as_os_str().is_empty() {
            anyhow::bail!("--workspace must not be empty");
        }
        if self.heartbeat_interval_ms == 0 {
            anyhow::bail!("--heartbeat-interval-ms must be positive");
        }
        if self.stuck_threshold_ms == 0 {
            anyhow::bail!("--stuck-threshold-ms must be positive");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    /// Load the team definition, or build the default six-pane team.
    pub fn team(&self) -> anyhow::Result<TeamSpec> {
        match &self.team_config {
            Some(path) => TeamSpec::load(path),
            None => Ok(TeamSpec::default_team(&self.workspace, &self.agent_command)),
        }
    }
}

/// One pane's launch definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneSpec {
    pub id: PaneId,
    pub role: Role,
    pub command: Vec<String>,
    #[serde(default)]
    pub mode: Option<PaneMode>,
    /// Role-scoped working directory. Defaults to `<workspace>/<role-stem>`.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl PaneSpec {
    pub fn mode(&self) -> PaneMode {
        self.mode.unwrap_or(PaneMode::Interactive)
    }

    pub fn cwd(&self, workspace: &std::path::Path) -> PathBuf {
        self.cwd.clone().unwrap_or_else(|| workspace.join(self.role.trigger_stem()))
    }
}

/// The fixed team of panes this host coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSpec {
    pub panes: Vec<PaneSpec>,
}

impl TeamSpec {
    /// Default team: one interactive pane per role, pane ids 1..=6.
    pub fn default_team(workspace: &std::path::Path, agent_command: &str) -> Self {
        let panes = Role::ALL
            .iter()
            .enumerate()
            .map(|(i, role)| PaneSpec {
                id: PaneId(i as u8 + 1),
                role: *role,
                command: vec![agent_command.to_string()],
                mode: None,
                cwd: Some(workspace.join(role.trigger_stem())),
            })
            .collect();
        Self { panes }
    }

    /// Load and validate a team definition file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read team config {}", path.display()))?;
        let team: TeamSpec = serde_json::from_str(&contents)
            .with_context(|| format!("parse team config {}", path.display()))?;
        team.validate()?;
        Ok(team)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.panes.is_empty() {
            anyhow::bail!("team config has no panes");
        }
        for spec in &self.panes {
            if spec.command.is_empty() {
                anyhow::bail!("pane {} has an empty command", spec.id);
            }
        }
        let mut ids: Vec<_> = self.panes.iter().map(|p| p.id).collect();
        ids.sort();
        ids.dedup();
        if ids.len() != self.panes.len() {
            anyhow::bail!("team config has duplicate pane ids");
        }
        let mut roles: Vec<_> = self.panes.iter().map(|p| p.role).collect();
        roles.sort_by_key(|r| r.as_str());
        roles.dedup();
        if roles.len() != self.panes.len() {
            anyhow::bail!("team config has duplicate roles");
        }
        Ok(())
    }

    /// Pane bound to the given role.
    pub fn pane_for(&self, role: Role) -> Option<&PaneSpec> {
        self.panes.iter().find(|p| p.role == role)
    }

    /// The designated lead pane (orchestrator).
    pub fn lead(&self) -> Option<&PaneSpec> {
        self.pane_for(Role::Orchestrator)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
