use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PresetError, Result};

/// Environment variable that relocates the data directory away from `~/.laserpresets`.
pub const HOME_ENV: &str = "LASERPRESETS_HOME";

/// Budget of the browser's synchronized storage area, in bytes.
pub const DEFAULT_CLOUD_QUOTA: usize = 102_400;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dev_mode: bool,
    pub ui_poll_ms: u64,
    pub bridge_poll_ms: u64,
    pub cloud_quota_bytes: usize,
    pub channel_capacity: usize,
    pub daemon_port: u16,
    pub cloud_sync_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dev_mode: false,
            ui_poll_ms: 750,
            bridge_poll_ms: 5000,
            cloud_quota_bytes: DEFAULT_CLOUD_QUOTA,
            channel_capacity: 64,
            daemon_port: 21430,
            cloud_sync_secs: 60,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn ui_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ui_poll_ms)
    }

    pub fn bridge_poll_interval(&self) -> Duration {
        Duration::from_millis(self.bridge_poll_ms)
    }

    pub fn cloud_sync_interval(&self) -> Duration {
        Duration::from_secs(self.cloud_sync_secs)
    }
}

/// Filesystem layout of the data directory.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Paths { root: root.into() }
    }

    /// `$LASERPRESETS_HOME` when set, otherwise `~/.laserpresets`.
    pub fn from_env() -> Result<Self> {
        if let Some(dir) = std::env::var_os(HOME_ENV) {
            return Ok(Paths::new(dir));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| PresetError::Config("Could not find home directory".to_string()))?;
        Ok(Paths::new(home.join(".laserpresets")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn local_document(&self) -> PathBuf {
        self.root.join("local.json")
    }

    pub fn cloud_dir(&self) -> PathBuf {
        self.root.join("cloud")
    }

    pub fn log_file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.cloud_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.cloud_quota_bytes, 102_400);
        assert_eq!(config.ui_poll_interval(), Duration::from_millis(750));
        assert_eq!(config.bridge_poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "dev_mode = true\ndaemon_port = 9000\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.dev_mode);
        assert_eq!(config.daemon_port, 9000);
        assert_eq!(config.channel_capacity, 64);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            ui_poll_ms: 1000,
            ..Config::default()
        };
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "ui_poll_ms = \"soon\"").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, PresetError::Config(_)));
    }
}
