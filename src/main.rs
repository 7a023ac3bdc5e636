mod app;
mod cli;
mod screens;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use futures::StreamExt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;
use cdock::core::{ActionKind, ActionParams, DockerClient, StreamRegistry};
use cdock::utils::AppConfig;
use cli::{Cli, Commands, ConfigCommands};
use screens::dashboard::Column;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The dashboard owns the terminal, so its logs go to a file
    match cli.command {
        None => {
            let log_file = match cli.log_file.clone() {
                Some(path) => path,
                None => AppConfig::config_dir()?.join("cdock.log"),
            };
            init_tracing(Some(log_file), "info")?;
        }
        Some(_) => init_tracing(None, "warn")?,
    }

    let config = AppConfig::resolve(cli.config.as_deref(), cli.env_file.as_deref())?;

    match cli.command {
        None => {
            let client = DockerClient::connect(&config)?;
            if !client.check_docker().await {
                // The dashboard shows "disconnected" until the daemon answers
                warn!(endpoint = %client.endpoint(), "Docker daemon not reachable");
            }
            info!(endpoint = %client.endpoint(), "Starting dashboard");
            let mut app = App::new(&config, client);
            app.run().await?;
        }
        Some(Commands::Status { samples }) => {
            handle_status(&config, samples).await?;
        }
        Some(Commands::Logs { name, tail }) => {
            handle_logs(&config, &name, tail).await?;
        }
        Some(Commands::Config { command }) => {
            handle_config(&config, command.unwrap_or(ConfigCommands::View))?;
        }
        Some(command) => {
            if let Some((name, action, params)) = command.lifecycle() {
                handle_lifecycle(&config, name, action, params).await?;
            }
        }
    }

    Ok(())
}

fn init_tracing(log_file: Option<PathBuf>, default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

/// Connect and make sure the daemon answers before running a subcommand
async fn connect_checked(config: &AppConfig) -> Result<DockerClient> {
    let client = DockerClient::connect(config)?;
    if !client.check_docker().await {
        bail!("Docker daemon not reachable at {}", client.endpoint());
    }
    Ok(client)
}

async fn handle_status(config: &AppConfig, samples: u32) -> Result<()> {
    let client = connect_checked(config).await?;
    let registry = StreamRegistry::new(config.metric_settings(), config.action_pool);

    let mut views = registry.refresh_from(&client).await?;
    for _ in 0..samples {
        tokio::time::sleep(config.refresh_interval()).await;
        views = registry.refresh_from(&client).await?;
    }
    registry.shutdown();

    let version = client
        .version()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Docker {} at {}\n", version, client.endpoint());

    let columns: &[Column] = if samples > 0 {
        &[
            Column::Name,
            Column::Status,
            Column::Cpu,
            Column::Mem,
            Column::Max,
            Column::Rx,
            Column::Tx,
            Column::Ior,
            Column::Iow,
        ]
    } else {
        &[
            Column::Name,
            Column::Id,
            Column::Status,
            Column::Image,
            Column::Started,
        ]
    };

    let header: Vec<String> = columns.iter().map(|c| format!("{:<14}", c.title())).collect();
    println!("{}", header.join(" ").trim_end());
    println!("{}", "-".repeat(15 * columns.len()));

    let now = Utc::now();
    for view in &views {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| format!("{:<14}", c.text(view, now)))
            .collect();
        println!("{}", cells.join(" ").trim_end());
    }

    if views.is_empty() {
        println!("No containers");
    }

    Ok(())
}

async fn handle_lifecycle(config: &AppConfig, name: &str, action: ActionKind, params: ActionParams) -> Result<()> {
    let client = connect_checked(config).await?;
    let workload = client
        .find(name)
        .await?
        .with_context(|| format!("No container named {}", name))?;

    println!("{} {}...", action, name);
    workload.daemon.invoke(action, &params).await?;
    println!("✓ {} {} done", action, name);

    Ok(())
}

async fn handle_logs(config: &AppConfig, name: &str, tail: usize) -> Result<()> {
    let client = connect_checked(config).await?;
    let workload = client
        .find(name)
        .await?
        .with_context(|| format!("No container named {}", name))?;

    let mut stream = workload.daemon.open_log_stream(tail);
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        stdout.write_all(chunk?.as_bytes())?;
        stdout.flush()?;
    }

    Ok(())
}

fn handle_config(config: &AppConfig, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::View => {
            let rendered = toml::to_string_pretty(config).context("Failed to serialize config")?;
            println!("{}", rendered);
        }
        ConfigCommands::Path => {
            println!("{}", AppConfig::config_path()?.display());
        }
        ConfigCommands::Save => {
            config.save()?;
            println!("Saved to {}", AppConfig::config_path()?.display());
        }
    }

    Ok(())
}
