// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use hivemind::config::Config;

#[derive(Parser)]
#[command(name = "hivemind", version, about = "Coordination host for hivemind agent teams.")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    subcommand: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the coordination host (default).
    Run,
    /// Operate on the terminal daemon.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Inspect shared workspace state.
    State {
        #[command(subcommand)]
        action: StateAction,
    },
}

#[derive(clap::Subcommand)]
enum DaemonAction {
    /// Report pid, endpoint, and pane count.
    Status,
    /// Send shutdown; all PTYs die.
    Stop,
}

#[derive(clap::Subcommand)]
enum StateAction {
    /// Print state.json.
    Show,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = cli.config;

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    match cli.subcommand {
        Some(Commands::Daemon { action: DaemonAction::Status }) => {
            std::process::exit(hivemind::ops::daemon_status(&config).await);
        }
        Some(Commands::Daemon { action: DaemonAction::Stop }) => {
            std::process::exit(hivemind::ops::daemon_stop(&config).await);
        }
        Some(Commands::State { action: StateAction::Show }) => {
            std::process::exit(hivemind::ops::state_show(&config));
        }
        Some(Commands::Run) | None => {
            init_tracing(&config.log_format, &config.log_level);
            if let Err(e) = hivemind::host::run(config).await {
                error!("fatal: {e:#}");
                std::process::exit(1);
            }
        }
    }
}

fn init_tracing(format: &str, level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    if format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
