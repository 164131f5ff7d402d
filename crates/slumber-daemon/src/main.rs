//! Slumber daemon entry point.
//!
//! Holds the game server's port while the server is stopped, answers
//! server-list pings with a "sleeping" entry, and starts the real server when
//! a player tries to join.
//!
//! # Usage
//!
//! ```text
//! slumber [OPTIONS]
//!
//! Options:
//!   --config <PATH>    Config file [default: platform config dir]
//!   --port   <PORT>    Game port to hold
//!   --bind   <IP>      Address to bind
//!   --script <PATH>    Server start script
//!   --shell  <SHELL>   Shell that runs the script
//!   --motd   <TEXT>    Message shown in the server list
//!   --init-config      Write the effective config to --config and exit
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable         | Overrides             |
//! |------------------|-----------------------|
//! | `SLUMBER_CONFIG` | `--config`            |
//! | `SLUMBER_PORT`   | `listener.port`       |
//! | `SLUMBER_BIND`   | `listener.bind_address` |
//! | `SLUMBER_SCRIPT` | `server.script`       |
//! | `SLUMBER_SHELL`  | `server.shell`        |
//! | `SLUMBER_MOTD`   | `status.motd`         |
//!
//! CLI args take precedence over environment variables, which take precedence
//! over the config file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use slumber_daemon::infrastructure::network::controller::PortController;
use slumber_daemon::infrastructure::storage::config::{
    config_file_path, load_config_from, save_config_to, AppConfig,
};
use slumber_daemon::infrastructure::supervisor::script::ScriptLauncher;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Sleep/wake front for a game server.
#[derive(Debug, Parser)]
#[command(
    name = "slumber",
    about = "Holds a game server's port while it sleeps and starts it on the first join",
    version
)]
struct Cli {
    /// Path of the TOML config file.
    #[arg(long, env = "SLUMBER_CONFIG")]
    config: Option<PathBuf>,

    /// TCP port shared by Slumber and the game server.
    #[arg(long, env = "SLUMBER_PORT")]
    port: Option<u16>,

    /// IP address to bind.  `0.0.0.0` accepts connections on every interface.
    #[arg(long, env = "SLUMBER_BIND")]
    bind: Option<String>,

    /// Script that starts the real server.
    #[arg(long, env = "SLUMBER_SCRIPT")]
    script: Option<PathBuf>,

    /// Shell used to run the script on non-Windows platforms.
    #[arg(long, env = "SLUMBER_SHELL")]
    shell: Option<String>,

    /// Message of the day shown in the server list while sleeping.
    #[arg(long, env = "SLUMBER_MOTD")]
    motd: Option<String>,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    init_config: bool,
}

impl Cli {
    /// Applies the command-line overrides on top of `config`.
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(script) = &self.script {
            config.server.script = script.clone();
        }
        if let Some(shell) = &self.shell {
            config.server.shell = shell.clone();
        }
        if let Some(motd) = &self.motd {
            config.status.motd = motd.clone();
        }
    }

    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => config_file_path().context("no --config given and no platform config directory"),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = cli.config_path()?;
    let mut config = load_config_from(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    // `RUST_LOG` wins; otherwise use the level from the config file.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level)),
        )
        .init();

    if cli.init_config {
        save_config_to(&config, &path)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        info!("wrote config to {}", path.display());
        return Ok(());
    }

    let launch = config.launch_command();
    info!(config = %path.display(), server = %launch, "Slumber starting");

    let (controller, handle) = PortController::bind(
        config.controller_config()?,
        config.status_responder(),
        Arc::new(ScriptLauncher::new(launch)),
    )
    .context("failed to take the game port")?;

    // Ctrl+C asks the controller to stop; it never relaunches after that.
    let shutdown = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                shutdown.shutdown();
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    controller.run().await?;

    info!("Slumber stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
