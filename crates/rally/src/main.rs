//! Entry point for the Rally game server.
//!
//! Loads configuration, assembles the kernel with the default subsystems,
//! starts it and runs until SIGINT/SIGTERM. Exits with status 1 when any
//! subsystem fails to start or stop.

mod cli;
mod config;
mod signals;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use cli::{Cli, Command, ServeArgs};

async fn serve(args: &ServeArgs) -> anyhow::Result<()> {
    let config = config::load(args).with_context(|| {
        format!("failed to load configuration from {}", args.config_dir.display())
    })?;
    let kernel = game_server::default_kernel(config).context("failed to assemble server")?;

    if let Err(e) = kernel.start().await {
        error!("❌ Startup failed: {}", e);
        if let Err(stop_error) = kernel.stop().await {
            error!("❌ Cleanup after failed startup: {}", stop_error);
        }
        return Err(e).context("startup failed");
    }

    info!("🚀 Rally {} is up", env!("CARGO_PKG_VERSION"));
    let signal = signals::wait_for_shutdown()
        .await
        .context("failed to install signal handlers")?;

    info!("🛑 Received {}, shutting down", signal);
    kernel.stop().await.context("shutdown failed")?;
    info!("👋 Goodbye");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command() {
        Command::Version => {
            println!("rally {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Command::Serve => match serve(&cli.serve).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("rally: {e:#}");
                ExitCode::FAILURE
            }
        },
    }
}
