//! DPP Controller daemon.
//!
//! Serves Configurator exchanges over TCP using keys and configuration
//! from a JSON settings file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dpp_controller::{Controller, ControllerError, ControllerSettings, Provisioning};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// DPP Controller
#[derive(Parser)]
#[command(name = "dpp-controller", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Settings file (JSON). Defaults apply when absent.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept connections (default if no command given)
    Serve,

    /// Print the bootstrap URI and exit
    Uri,
}

fn load(cli: &Cli) -> Result<ControllerSettings, ControllerError> {
    let mut settings = match &cli.config {
        Some(path) => ControllerSettings::load(path)?,
        None => ControllerSettings::default(),
    };
    if let Some(listen) = cli.listen {
        settings.listen = listen;
    }
    Ok(settings)
}

async fn serve(settings: ControllerSettings) -> Result<(), ControllerError> {
    let controller = Controller::bind(&settings).await?;
    info!(uri = %controller.provisioning().uri()?, "bootstrap");

    tokio::select! {
        result = controller.run() => result,
        _ = shutdown_signal() => {
            info!("shutting down");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match load(&cli) {
        Ok(settings) => match cli.command.unwrap_or(Commands::Serve) {
            Commands::Serve => serve(settings).await,
            Commands::Uri => Provisioning::from_settings(&settings)
                .and_then(|p| p.uri())
                .map(|uri| println!("{uri}")),
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "dpp-controller failed");
            ExitCode::FAILURE
        }
    }
}
