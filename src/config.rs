use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::update::{
    UpdateSettings, DEFAULT_BACKUP_SUFFIX, DEFAULT_DOWNLOAD_DIR, DEFAULT_USER_AGENT,
    DEFAULT_VERSION_FILE,
};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Release metadata endpoint, e.g. a GitHub `releases/latest` URL
    pub api_url: Option<String>,

    pub version_file: PathBuf,

    /// Where downloaded archives are staged before install
    pub download_dir: PathBuf,

    pub restart_delay_secs: u64,

    pub backup_suffix: String,

    pub show_progress: bool,

    pub user_agent: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: None,
            version_file: PathBuf::from(DEFAULT_VERSION_FILE),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            restart_delay_secs: 5,
            backup_suffix: DEFAULT_BACKUP_SUFFIX.to_string(),
            show_progress: true,
            user_agent: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("respawn")
            .join("config.toml")
    }

    /// Resolve into updater settings. `api_url` must be set by now.
    pub fn to_settings(&self) -> Result<UpdateSettings> {
        let api_url = self
            .api_url
            .clone()
            .context("No release API URL configured (set api_url or pass --api-url)")?;

        let mut settings = UpdateSettings::new(api_url);
        settings.user_agent = self
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        settings.version_file = self.version_file.clone();
        settings.download_dir = self.download_dir.clone();
        settings.restart_delay = Duration::from_secs(self.restart_delay_secs);
        settings.backup_suffix = self.backup_suffix.clone();
        settings.show_progress = self.show_progress;
        Ok(settings)
    }
}
