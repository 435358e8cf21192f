//! Warden - grid role instance bootstrapper
//!
//! This is the main CLI entry point for Warden.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use warden::agent::ClusterAgentController;
use warden::host::{Host, HostConfig};
use warden::process::OsSpawner;

/// Warden - grid role instance bootstrapper
#[derive(Parser)]
#[command(name = "warden")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Bootstraps and supervises a grid role instance", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap this role instance and supervise it until it exits
    Run {
        /// Host configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Seconds allowed for a graceful shutdown
        #[arg(long)]
        stop_timeout: Option<u64>,
    },

    /// Show what would be started without starting anything
    Plan {
        /// Host configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warden")
        .join("role.yaml")
}

fn load_config(path: Option<PathBuf>) -> Result<HostConfig> {
    let path = path.unwrap_or_else(default_config_path);
    HostConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

async fn stop(controller: Arc<ClusterAgentController>, timeout: Duration) -> Result<()> {
    tokio::task::spawn_blocking(move || controller.stop(timeout))
        .await
        .context("Stop task panicked")?
        .context("Teardown failed")
}

async fn run(config: HostConfig, stop_timeout: Duration) -> Result<()> {
    let host = Host::new(config);
    let controller = tokio::task::spawn_blocking(move || host.controller(Arc::new(OsSpawner::new())))
        .await
        .context("Startup task panicked")?
        .context("Failed to configure role instance")?;
    let controller = Arc::new(controller);

    let mut runner = {
        let controller = controller.clone();
        tokio::task::spawn_blocking(move || controller.run())
    };

    tokio::select! {
        result = &mut runner => {
            let outcome = result.context("Run task panicked")?;
            match &outcome {
                Ok(()) => info!("Role instance finished"),
                Err(e) => error!("Role instance failed: {}", e),
            }
            let stopped = stop(controller, stop_timeout).await;
            outcome.context("Bootstrap failed")?;
            stopped
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            let stopped = stop(controller, stop_timeout).await;
            if tokio::time::timeout(stop_timeout, &mut runner).await.is_err() {
                warn!("Bootstrap still in progress after stop, exiting anyway");
                if let Err(e) = &stopped {
                    error!("{:#}", e);
                }
                // the runtime would otherwise wait on the blocked run task
                std::process::exit(if stopped.is_ok() { 0 } else { 1 });
            }
            stopped
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run { config, stop_timeout } => {
            let config = load_config(config)?;
            let stop_timeout = stop_timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.timings.stop_timeout());
            run(config, stop_timeout).await?;
        }

        Commands::Plan { config } => {
            let host = Host::new(load_config(config)?);
            let plan = host.plan().context("Failed to resolve plan")?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }

    Ok(())
}
