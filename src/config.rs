use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::gateway::OFFLINE_CACHE_NAME;
use crate::sync::{SyncPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_REPLAY_TIMEOUT};

/// Environment variable overriding `server.base_url`.
pub const SERVER_URL_ENV: &str = "SHIKSHA_SERVER_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub server: ServerConfig,
  pub sync: SyncConfig,
  pub reachability: ReachabilityConfig,
  pub cache: CacheConfig,
  pub storage: StorageConfig,
  /// Default log filter when RUST_LOG is not set (e.g. "info", "shiksha=debug")
  pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub base_url: String,
  /// Path prefix of the backend API; requests below it are treated as API calls
  pub api_prefix: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:5000".to_string(),
      api_prefix: "/api/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub max_attempts: u32,
  pub replay_timeout_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      replay_timeout_secs: DEFAULT_REPLAY_TIMEOUT.as_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReachabilityConfig {
  pub probe_path: String,
  pub probe_interval_secs: u64,
  pub probe_timeout_secs: u64,
}

impl Default for ReachabilityConfig {
  fn default() -> Self {
    Self {
      probe_path: "/api/ai/status".to_string(),
      probe_interval_secs: 30,
      probe_timeout_secs: 5,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Versioned cache name; caches under any other name are purged on activate
  pub name: String,
  /// App shell URLs (relative to the server) cached on install
  pub precache: Vec<String>,
  /// Other caches that survive activate
  pub keep: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: "nabha-shiksha-ai-v1".to_string(),
      precache: vec![
        "/".to_string(),
        "/static/js/bundle.js".to_string(),
        "/static/css/main.css".to_string(),
        "/manifest.json".to_string(),
      ],
      keep: vec![OFFLINE_CACHE_NAME.to_string()],
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Directory for the offline database and response cache
  /// (default: $XDG_DATA_HOME/shiksha)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shiksha.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shiksha/config.yaml
  ///
  /// Built-in defaults are used when no file exists.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(url) = std::env::var(SERVER_URL_ENV) {
      config.server.base_url = url;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shiksha.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shiksha").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file deserializes to null; treat it as all defaults.
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  fn validate(&self) -> Result<()> {
    self.base_url()?;
    if self.sync.max_attempts == 0 {
      return Err(eyre!("sync.max_attempts must be at least 1"));
    }
    Ok(())
  }

  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.server.base_url)
      .map_err(|e| eyre!("Invalid server URL '{}': {}", self.server.base_url, e))
  }

  pub fn probe_url(&self) -> Result<Url> {
    self
      .base_url()?
      .join(&self.reachability.probe_path)
      .map_err(|e| eyre!("Invalid probe path '{}': {}", self.reachability.probe_path, e))
  }

  pub fn sync_policy(&self) -> SyncPolicy {
    SyncPolicy {
      max_attempts: self.sync.max_attempts,
      replay_timeout: Duration::from_secs(self.sync.replay_timeout_secs),
    }
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.reachability.probe_interval_secs)
  }

  pub fn probe_timeout(&self) -> Duration {
    Duration::from_secs(self.reachability.probe_timeout_secs)
  }

  /// Directory holding local data files and logs.
  pub fn data_dir(&self) -> Option<PathBuf> {
    self
      .storage
      .path
      .clone()
      .or_else(|| dirs::data_dir().map(|d| d.join("shiksha")))
  }
}
