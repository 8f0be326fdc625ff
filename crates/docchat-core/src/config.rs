use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, anyhow};

use crate::stream::LineMode;

pub const DEFAULT_API_URL: &str = "http://localhost:8001";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub request_timeout_secs: u64,
    pub health_timeout_secs: u64,
    pub upload_timeout_secs: u64,
    pub health_poll_secs: u64,
    pub cache_limit: usize,
    pub max_upload_mb: u64,
    pub line_mode: LineMode,
    pub storage_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: 10,
            health_timeout_secs: 5,
            upload_timeout_secs: 120,
            health_poll_secs: 30,
            cache_limit: 20,
            max_upload_mb: 50,
            line_mode: LineMode::Buffered,
            storage_dir: None,
        }
    }

    /// Load the config file (defaults when missing), then apply `API_URL`.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_env(std::env::var("API_URL").ok());
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    /// Read a config file; a missing file yields the defaults.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    /// Write to the user config file and return its path.
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    pub fn apply_env(&mut self, api_url: Option<String>) {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_url = url;
        }
    }

    /// Base URL without trailing slashes, ready for joining paths.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_secs(self.health_poll_secs.max(1))
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }

    /// Directory for the message cache and log file.
    pub fn storage_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.storage_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;
        Ok(data_dir.join("docchat"))
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("docchat").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_expectations() {
        let config = Config::new();
        assert_eq!(config.api_url, "http://localhost:8001");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.health_timeout(), Duration::from_secs(5));
        assert_eq!(config.upload_timeout(), Duration::from_secs(120));
        assert_eq!(config.cache_limit, 20);
        assert_eq!(config.line_mode, LineMode::Buffered);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"api_url":"http://rag:9000/","line_mode":"per_chunk"}"#).unwrap();
        assert_eq!(config.base_url(), "http://rag:9000");
        assert_eq!(config.line_mode, LineMode::PerChunk);
        assert_eq!(config.upload_timeout_secs, 120);
    }

    #[test]
    fn env_url_overrides_unless_blank() {
        let mut config = Config::new();
        config.apply_env(Some("  ".to_string()));
        assert_eq!(config.api_url, DEFAULT_API_URL);

        config.apply_env(Some("http://example:8080".to_string()));
        assert_eq!(config.api_url, "http://example:8080");
    }

    #[test]
    fn save_creates_directories_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::new();
        config.api_url = "http://rag.internal:9000".to_string();
        config.line_mode = LineMode::PerChunk;
        config.save_to(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  \"api_url\""));
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::new());
    }
}
