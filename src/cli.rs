/// CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cdock::core::{ActionKind, ActionParams, DEFAULT_LOG_TAIL};

// Build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser)]
#[command(name = "cdock")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Config file (default: <config dir>/cdock/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Env file loaded before applying environment overrides (default: ./.env)
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Log file for the dashboard (default: <config dir>/cdock/cdock.log)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show containers and, with --samples, their resource usage
    Status {
        /// Number of sample intervals to wait before printing metrics
        #[arg(short, long, default_value = "0")]
        samples: u32,
    },

    /// Start a container
    Start { name: String },

    /// Stop a container
    Stop {
        name: String,

        /// Seconds to wait before killing the container
        #[arg(short, long)]
        timeout: Option<i64>,
    },

    /// Restart a container
    Restart {
        name: String,

        /// Seconds to wait before killing the container
        #[arg(short, long)]
        timeout: Option<i64>,
    },

    /// Pause a container
    Pause { name: String },

    /// Resume a paused container
    Resume { name: String },

    /// Kill a container
    Kill {
        name: String,

        /// Signal to send (default SIGKILL)
        #[arg(short, long)]
        signal: Option<String>,
    },

    /// Follow a container's logs until it exits
    Logs {
        name: String,

        /// Lines of history to print first
        #[arg(short = 'n', long, default_value_t = DEFAULT_LOG_TAIL)]
        tail: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigCommands {
    /// Print the effective configuration
    View,

    /// Print the config file location
    Path,

    /// Write the effective configuration to the config file
    Save,
}

impl Commands {
    /// Lifecycle subcommands as (container, action, params)
    pub fn lifecycle(&self) -> Option<(&str, ActionKind, ActionParams)> {
        let (name, action, params) = match self {
            Commands::Start { name } => (name, ActionKind::Start, ActionParams::default()),
            Commands::Stop { name, timeout } => (
                name,
                ActionKind::Stop,
                ActionParams {
                    timeout_secs: *timeout,
                    ..Default::default()
                },
            ),
            Commands::Restart { name, timeout } => (
                name,
                ActionKind::Restart,
                ActionParams {
                    timeout_secs: *timeout,
                    ..Default::default()
                },
            ),
            Commands::Pause { name } => (name, ActionKind::Pause, ActionParams::default()),
            Commands::Resume { name } => (name, ActionKind::Resume, ActionParams::default()),
            Commands::Kill { name, signal } => (
                name,
                ActionKind::Kill,
                ActionParams {
                    signal: signal.clone(),
                    ..Default::default()
                },
            ),
            Commands::Status { .. } | Commands::Logs { .. } | Commands::Config { .. } => return None,
        };

        Some((name.as_str(), action, params))
    }
}
