/// Application configuration management
/// Stores user preferences in ~/.config/cdock/config.toml, overridable from the environment

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::calculator::{InterfaceSelector, MetricSettings};
use crate::core::dispatcher::DEFAULT_ACTION_POOL_SIZE;

pub const DEFAULT_REFRESH_MS: u64 = 1000;
pub const DEFAULT_HEADER_COLOR: &str = "cyan";
pub const DEFAULT_COLUMNS: &[&str] = &[
    "name", "id", "status", "image", "cpu", "mem", "max", "rx", "tx", "ior", "iow", "created",
    "started", "ports", "command",
];

/// Lower bound for the poll tick
const MIN_REFRESH_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// unix:///var/run/docker.sock, tcp://host:2375 or http://host:2375
    pub docker_socket_url: Option<String>,
    /// List stopped containers too, not only running ones
    pub list_all_containers: bool,
    pub refresh_ms: u64,
    /// Interface feeding Rx/Tx; `*` sums all interfaces
    pub network_interface: String,
    pub action_pool: usize,
    pub columns: Vec<String>,
    pub header_color: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            docker_socket_url: None,
            list_all_containers: false,
            refresh_ms: DEFAULT_REFRESH_MS,
            network_interface: "eth0".to_string(),
            action_pool: DEFAULT_ACTION_POOL_SIZE,
            columns: DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            header_color: DEFAULT_HEADER_COLOR.to_string(),
        }
    }
}

impl AppConfig {
    /// Get config directory, creating it if needed
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine the user config directory")?
            .join("cdock");

        fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Config file, then `.env`, then process environment
    pub fn resolve(config_file: Option<&Path>, env_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };

        match env_file {
            Some(path) => {
                dotenv::from_path(path)
                    .with_context(|| format!("Failed to load env file {}", path.display()))?;
            }
            None => {
                if let Ok(path) = dotenv::dotenv() {
                    debug!(path = %path.display(), "Loaded .env");
                }
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from the default file
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Apply environment overrides. Values that do not parse keep the current
    /// setting and are logged.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DOCKER_SOCKET_URL") {
            let url = url.trim().to_string();
            self.docker_socket_url = (!url.is_empty()).then_some(url);
        }

        if let Some(value) = lookup("DOCKER_API_LIST_ALL_CONTAINERS") {
            match parse_bool(&value) {
                Some(all) => self.list_all_containers = all,
                None => warn!(%value, "Ignoring DOCKER_API_LIST_ALL_CONTAINERS"),
            }
        }

        if let Some(value) = lookup("CDOCK_REFRESH_MS") {
            match value.trim().parse::<u64>() {
                Ok(ms) if ms >= MIN_REFRESH_MS => self.refresh_ms = ms,
                _ => warn!(%value, "Ignoring CDOCK_REFRESH_MS"),
            }
        }

        if let Some(value) = lookup("CDOCK_NETWORK_INTERFACE") {
            match value.trim() {
                "" => warn!("Ignoring empty CDOCK_NETWORK_INTERFACE"),
                iface => self.network_interface = iface.to_string(),
            }
        }

        if let Some(value) = lookup("CDOCK_ACTION_POOL") {
            match value.trim().parse::<usize>() {
                Ok(size) if size > 0 => self.action_pool = size,
                _ => warn!(%value, "Ignoring CDOCK_ACTION_POOL"),
            }
        }

        if let Some(value) = lookup("CDOCK_COLUMNS") {
            let columns: Vec<String> = value
                .split(',')
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect();
            if columns.is_empty() {
                warn!(%value, "Ignoring CDOCK_COLUMNS");
            } else {
                self.columns = columns;
            }
        }

        if let Some(value) = lookup("TUI_HEADER_COLOR") {
            if !value.trim().is_empty() {
                self.header_color = value.trim().to_lowercase();
            }
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_ms.max(MIN_REFRESH_MS))
    }

    pub fn metric_settings(&self) -> MetricSettings {
        MetricSettings {
            interface: InterfaceSelector::parse(&self.network_interface),
            ..Default::default()
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
