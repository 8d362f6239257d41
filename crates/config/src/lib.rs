//! Configuration management for datacrew
//!
//! Loads and saves provider credentials, agent defaults and data source
//! settings from a JSON file under the data directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{config_path, data_dir, ensure_dir, memory_dir, transcript_path};

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("◆ CONFIG IO ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("◆ CONFIG PARSE ERROR: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Model provider access
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

/// Defaults applied to every agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: u32,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_turns: default_max_turns(),
            max_delegation_depth: default_max_delegation_depth(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_turns() -> u32 {
    20
}

fn default_max_delegation_depth() -> u32 {
    3
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentsConfig {
    #[serde(default)]
    pub defaults: AgentDefaults,
}

/// SQLite data source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://mock_fin_app.sqlite".to_string()
}

/// Dashboarding service credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_dashboard_url")]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_dashboard_database_id")]
    pub database_id: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            url: default_dashboard_url(),
            username: String::new(),
            password: String::new(),
            database_id: default_dashboard_database_id(),
        }
    }
}

fn default_dashboard_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_dashboard_database_id() -> u64 {
    2
}

/// Transcript memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Snapshot path; defaults to the data directory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default = "default_memory_max_turns")]
    pub max_turns: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_turns: default_memory_max_turns(),
        }
    }
}

fn default_memory_max_turns() -> usize {
    100
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl Config {
    /// Load from the default location
    pub async fn load() -> Result<Self> {
        let path = config_path();
        Self::load_from(&path).await
    }

    /// Load from a specific location, falling back to defaults when missing
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("◆ NO CONFIG AT {:?}, USING DEFAULTS", path);
            return Ok(Config::default());
        }

        debug!("◆ LOADING CONFIG FROM {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save to the default location
    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to a specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("◆ SAVING CONFIG TO {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Provider API key, falling back to the environment
    pub fn api_key(&self) -> Option<String> {
        if !self.provider.api_key.is_empty() {
            return Some(self.provider.api_key.clone());
        }

        std::env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty())
    }

    /// Provider base URL override
    pub fn api_base(&self) -> Option<String> {
        self.provider
            .api_base
            .clone()
            .filter(|base| !base.is_empty())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key().is_some()
    }

    pub fn default_model(&self) -> String {
        self.agents.defaults.model.clone()
    }

    pub fn max_turns(&self) -> u32 {
        self.agents.defaults.max_turns
    }

    pub fn max_delegation_depth(&self) -> u32 {
        self.agents.defaults.max_delegation_depth
    }

    /// Transcript snapshot path, expanding a leading `~/`
    pub fn transcript_path(&self) -> PathBuf {
        match &self.memory.path {
            Some(path) => expand_home(path),
            None => transcript_path(),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Create the default config file and memory directory
pub async fn init() -> Result<Config> {
    let config_path = config_path();

    if config_path.exists() {
        warn!("◆ CONFIG ALREADY EXISTS AT {:?}", config_path);
    } else {
        let config = Config::default();
        config.save().await?;
        info!("◆ CONFIG CREATED AT {:?}", config_path);
    }

    let memory = memory_dir();
    ensure_dir(&memory).await?;
    info!("◆ MEMORY DIRECTORY READY AT {:?}", memory);

    Config::load().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home_plain_path() {
        assert_eq!(expand_home("/tmp/x.json"), PathBuf::from("/tmp/x.json"));
    }

    #[test]
    fn test_expand_home_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/a/b.json"), home.join("a/b.json"));
            assert_eq!(expand_home("~"), home);
        }
    }

    #[test]
    fn test_api_base_empty_is_none() {
        let mut config = Config::default();
        config.provider.api_base = Some(String::new());
        assert!(config.api_base().is_none());

        config.provider.api_base = Some("http://localhost:8000/v1".to_string());
        assert_eq!(
            config.api_base().as_deref(),
            Some("http://localhost:8000/v1")
        );
    }
}
