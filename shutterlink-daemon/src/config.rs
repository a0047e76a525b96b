//! Daemon configuration.
//!
//! TOML file under the user config directory, with CLI overrides applied
//! on top. The naming section mirrors the settings contract the engine
//! consumes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shutterlink_protocol::{NodeSettings, PeerRole, TRANSFER_PORT};
use std::fs;
use std::path::PathBuf;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,

    #[serde(default)]
    pub naming: NamingSection,

    #[serde(default)]
    pub network: NetworkConfig,
}

/// Who this node is
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Display name advertised to peers (editors only)
    #[serde(default)]
    pub name: String,

    /// "tagger" or "editor"
    pub role: PeerRole,

    /// Base directory all destinations resolve under
    pub base_path: PathBuf,
}

/// Destination naming preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingSection {
    #[serde(default = "default_template")]
    pub folder_template: String,

    #[serde(default = "default_true")]
    pub use_day_folders: bool,

    #[serde(default = "default_true")]
    pub reset_numbering_daily: bool,

    #[serde(default = "default_day_prefix")]
    pub day_prefix: String,

    #[serde(default = "default_current_day")]
    pub current_day: String,
}

impl Default for NamingSection {
    fn default() -> Self {
        Self {
            folder_template: default_template(),
            use_day_folders: true,
            reset_numbering_daily: true,
            day_prefix: default_day_prefix(),
            current_day: default_current_day(),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_template() -> String {
    "{num:02d} - {name}".to_string()
}

fn default_true() -> bool {
    true
}

fn default_day_prefix() -> String {
    "DAY".to_string()
}

fn default_current_day() -> String {
    "DAY 1".to_string()
}

fn default_port() -> u16 {
    TRANSFER_PORT
}

impl Config {
    /// Default config file location: `<config dir>/shutterlink/daemon.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shutterlink")
            .join("daemon.toml")
    }

    /// Directory for the history and sent-log files.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shutterlink")
    }

    pub fn load(path: &PathBuf) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn save(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, contents).context("failed to write config file")?;
        Ok(())
    }

    /// The settings contract the engine consumes.
    pub fn settings(&self) -> NodeSettings {
        NodeSettings {
            display_name: self.node.name.clone(),
            role: self.node.role,
            base_path: self.node.base_path.clone(),
            folder_template: self.naming.folder_template.clone(),
            use_day_folders: self.naming.use_day_folders,
            reset_numbering_daily: self.naming.reset_numbering_daily,
            day_prefix: self.naming.day_prefix.clone(),
            current_day: self.naming.current_day.clone(),
        }
    }
}
