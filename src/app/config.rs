use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::filter::LevelFilter;

/// Complete configuration (saved to `<config_dir>/settings.toml`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Scheduler policy. Process-wide, no per-download override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Seconds of delay per retry; attempt `n` waits `n * backoff_multiplier`
    pub backoff_multiplier: u64,
    /// Publish lifecycle events on the event bus
    pub broadcast_events: bool,
    /// Send plain-text summaries to the notifier
    pub show_notifications: bool,
    pub log_verbosity: LogVerbosity,
    /// Replaces the default text of every notification
    pub notification_text: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_multiplier: 10,
            broadcast_events: false,
            show_notifications: false,
            log_verbosity: LogVerbosity::None,
            notification_text: None,
        }
    }
}

impl ManagerConfig {
    /// Delay before retry number `retry_count` (linear backoff)
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        Duration::from_secs(u64::from(retry_count).saturating_mul(self.backoff_multiplier))
    }
}

/// Verbosity of the scheduler's own decision log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogVerbosity {
    #[default]
    None,
    Debug,
    Error,
}

impl LogVerbosity {
    /// Level filter for the console log layer
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Self::None => LevelFilter::OFF,
            Self::Debug => LevelFilter::DEBUG,
            Self::Error => LevelFilter::ERROR,
        }
    }

    /// Whether a scheduler log line at `level` is emitted. Each verbosity
    /// admits exactly its own kind of line.
    pub fn allows(self, level: tracing::Level) -> bool {
        match self {
            Self::None => false,
            Self::Debug => level == tracing::Level::DEBUG,
            Self::Error => level == tracing::Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogVerbosity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "debug" => Ok(Self::Debug),
            "error" => Ok(Self::Error),
            other => Err(anyhow::anyhow!("Unknown log verbosity: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Persisted download state; relative paths resolve against the config directory
    pub state_file: Option<PathBuf>,
    /// Directory for in-flight transfer files
    pub temp_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_file {
            Some(path) => Ok(crate::util::paths::resolve_relative_to_config(path)),
            None => crate::util::paths::get_state_path(),
        }
    }

    pub fn temp_path(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(crate::util::paths::default_temp_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("dlkeeper/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_secs: 30,
            timeout_secs: 300,
        }
    }
}

impl Config {
    /// Load from the resolved config directory
    pub fn load() -> Result<Self> {
        let config_path = crate::util::paths::get_app_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("Config not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = crate::util::paths::get_app_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;

        // Atomic write using temp file + rename
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &content).context("Failed to write temp config file")?;
        std::fs::rename(&temp_path, path).context("Failed to rename temp config file")?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn create_test_config_toml() -> &'static str {
        r#"
[manager]
max_retries = 5
backoff_multiplier = 2
broadcast_events = true
show_notifications = true
log_verbosity = "debug"
notification_text = "Sync finished"

[storage]
state_file = "/var/lib/dlkeeper/state.json"
temp_dir = "/tmp/dlk"

[http]
user_agent = "test-agent"
connect_timeout_secs = 5
timeout_secs = 60
"#
    }

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.manager.max_retries, 3);
        assert_eq!(config.manager.backoff_multiplier, 10);
        assert!(!config.manager.broadcast_events);
        assert!(!config.manager.show_notifications);
        assert_eq!(config.manager.log_verbosity, LogVerbosity::None);
        assert_eq!(config.manager.notification_text, None);

        assert_eq!(config.http.connect_timeout_secs, 30);
        assert_eq!(config.http.timeout_secs, 300);
        assert!(config.http.user_agent.starts_with("dlkeeper/"));
    }

    #[test]
    fn test_config_load_missing_file_uses_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&temp_dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_load_valid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        std::fs::write(&config_path, create_test_config_toml()).unwrap();

        let config = Config::load_from(&config_path).unwrap();

        assert_eq!(config.manager.max_retries, 5);
        assert_eq!(config.manager.backoff_multiplier, 2);
        assert!(config.manager.broadcast_events);
        assert!(config.manager.show_notifications);
        assert_eq!(config.manager.log_verbosity, LogVerbosity::Debug);
        assert_eq!(config.manager.notification_text.as_deref(), Some("Sync finished"));

        assert_eq!(
            config.storage.state_file,
            Some(PathBuf::from("/var/lib/dlkeeper/state.json"))
        );
        assert_eq!(config.storage.temp_path(), PathBuf::from("/tmp/dlk"));

        assert_eq!(config.http.user_agent, "test-agent");
        assert_eq!(config.http.connect_timeout_secs, 5);
        assert_eq!(config.http.timeout_secs, 60);
    }

    #[test]
    fn test_config_partial_sections_use_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        std::fs::write(&config_path, "[manager]\nmax_retries = 1\n").unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.manager.max_retries, 1);
        assert_eq!(config.manager.backoff_multiplier, 10);
        assert_eq!(config.http, HttpConfig::default());
    }

    #[test]
    fn test_config_load_invalid_toml_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        std::fs::write(&config_path, "this is not valid toml [[[").unwrap();

        assert!(Config::load_from(&config_path).is_err());
    }

    #[test]
    fn test_config_save_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut config = Config::default();
        config.manager.max_retries = 7;
        config.manager.log_verbosity = LogVerbosity::Error;
        config.storage.temp_dir = Some(PathBuf::from("/tmp/x"));

        config.save_to(&config_path).unwrap();
        assert!(!config_path.with_extension("toml.tmp").exists());

        let loaded = Config::load_from(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_backoff_delay_is_linear() {
        let manager = ManagerConfig::default();
        assert_eq!(manager.backoff_delay(0), Duration::ZERO);
        assert_eq!(manager.backoff_delay(1), Duration::from_secs(10));
        assert_eq!(manager.backoff_delay(2), Duration::from_secs(20));
        assert_eq!(manager.backoff_delay(3), Duration::from_secs(30));
    }

    #[test]
    fn test_log_verbosity_mapping() {
        assert_eq!(LogVerbosity::None.level_filter(), LevelFilter::OFF);
        assert_eq!(LogVerbosity::Debug.level_filter(), LevelFilter::DEBUG);
        assert_eq!(LogVerbosity::Error.level_filter(), LevelFilter::ERROR);

        assert!(LogVerbosity::Debug.allows(tracing::Level::DEBUG));
        assert!(!LogVerbosity::Debug.allows(tracing::Level::ERROR));
        assert!(LogVerbosity::Error.allows(tracing::Level::ERROR));
        assert!(!LogVerbosity::None.allows(tracing::Level::ERROR));

        assert_eq!("DEBUG".parse::<LogVerbosity>().unwrap(), LogVerbosity::Debug);
        assert!("loud".parse::<LogVerbosity>().is_err());
    }
}
