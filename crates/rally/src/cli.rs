//! Command-line interface for the Rally server.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "rally", version, about = "Real-time game server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

impl Cli {
    /// The command to run; `serve` when none is given.
    pub fn command(&self) -> &Command {
        self.command.as_ref().unwrap_or(&Command::Serve)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Boot every subsystem and serve until interrupted (default)
    Serve,
    /// Print the version and exit
    Version,
}

/// Options that override the loaded configuration.
#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// Directory holding default.toml, <env>.toml and custom.toml
    #[arg(long, global = true, env = "RALLY_CONFIGS", default_value = "./configs")]
    pub config_dir: PathBuf,

    /// Environment name selecting <env>.toml
    #[arg(long = "env", global = true, env = "RALLY_ENV")]
    pub environment: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// HTTP listen address, e.g. 0.0.0.0:8080
    #[arg(short = 'b', long, global = true, value_name = "ADDRESS")]
    pub listen: Option<String>,
}
