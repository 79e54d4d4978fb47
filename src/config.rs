use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub persistence: PersistenceConfig,
  #[serde(default)]
  pub health: HealthConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  /// Deadline for a single HTTP attempt
  pub timeout_secs: u64,
  /// Additional attempts after the first on transient failures
  pub max_retries: u32,
  pub base_delay_ms: u64,
  /// Minimum spacing between any two outgoing calls
  pub min_interval_ms: u64,
  /// Handle looked up by the health probe
  pub probe_handle: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "https://codeforces.com/api".to_string(),
      timeout_secs: 10,
      max_retries: 3,
      base_delay_ms: 1000,
      min_interval_ms: 200,
      probe_handle: "tourist".to_string(),
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn base_delay(&self) -> Duration {
    Duration::from_millis(self.base_delay_ms)
  }

  pub fn min_interval(&self) -> Duration {
    Duration::from_millis(self.min_interval_ms)
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
  #[default]
  Memory,
  Sqlite,
  /// Caching disabled; every read is a miss
  None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub backend: CacheBackendKind,
  /// SQLite file (default: $XDG_DATA_HOME/cpsync/cache.db)
  pub path: Option<PathBuf>,
  pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      backend: CacheBackendKind::Memory,
      path: None,
      default_ttl_secs: 300,
    }
  }
}

impl CacheConfig {
  pub fn default_ttl(&self) -> Duration {
    Duration::from_secs(self.default_ttl_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub max_retries: u32,
  pub backoff_base_ms: u64,
  pub backoff_cap_ms: u64,
  /// Period of the low-priority refresh of tracked handles
  pub refresh_interval_secs: u64,
  /// Period of an explicitly started per-entity background sync
  pub entity_interval_secs: u64,
  /// Start draining automatically on enqueue and on reconnect
  pub auto_drain: bool,
  /// Handles kept warm by the periodic refresh
  pub tracked_handles: Vec<String>,
  /// Submissions fetched per handle by a submission sync
  pub submission_count: u32,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      backoff_base_ms: 1000,
      backoff_cap_ms: 30_000,
      refresh_interval_secs: 300,
      entity_interval_secs: 120,
      auto_drain: true,
      tracked_handles: Vec::new(),
      submission_count: 100,
    }
  }
}

impl SyncConfig {
  pub fn refresh_interval(&self) -> Duration {
    Duration::from_secs(self.refresh_interval_secs)
  }

  pub fn entity_interval(&self) -> Duration {
    Duration::from_secs(self.entity_interval_secs)
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackendKind {
  #[default]
  Memory,
  File,
  Sqlite,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
  pub backend: PersistenceBackendKind,
  /// Directory for `file`, database file for `sqlite`
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
  /// Queue length at or above which the backlog check fails
  pub backlog_threshold: usize,
  pub check_timeout_ms: u64,
}

impl Default for HealthConfig {
  fn default() -> Self {
    Self {
      backlog_threshold: 100,
      check_timeout_ms: 5000,
    }
  }
}

impl HealthConfig {
  pub fn check_timeout(&self) -> Duration {
    Duration::from_millis(self.check_timeout_ms)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter directive used when neither RUST_LOG nor CPSYNC_LOG is set
  pub level: Option<String>,
  /// Write daily-rolling log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cpsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cpsync/config.yaml
  ///
  /// With no file found the built-in defaults are used.
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("cpsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cpsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    // An empty document deserializes to unit, not an empty map
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Directory for local state files (default: $XDG_DATA_HOME/cpsync).
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cpsync"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::from_yaml("").unwrap();
    assert_eq!(config.api.timeout_secs, 10);
    assert_eq!(config.api.min_interval_ms, 200);
    assert_eq!(config.sync.max_retries, 3);
    assert_eq!(config.sync.backoff_cap_ms, 30_000);
    assert_eq!(config.health.backlog_threshold, 100);
    assert_eq!(config.cache.backend, CacheBackendKind::Memory);
  }

  #[test]
  fn test_partial_sections_fill_in_defaults() {
    let config = Config::from_yaml(
      r#"
api:
  base_url: http://localhost:9000/api
cache:
  backend: sqlite
sync:
  tracked_handles: [alice, bob]
  auto_drain: false
persistence:
  backend: file
  path: /tmp/cpsync
"#,
    )
    .unwrap();

    assert_eq!(config.api.base_url, "http://localhost:9000/api");
    assert_eq!(config.api.max_retries, 3);
    assert_eq!(config.cache.backend, CacheBackendKind::Sqlite);
    assert_eq!(config.sync.tracked_handles, vec!["alice", "bob"]);
    assert!(!config.sync.auto_drain);
    assert_eq!(config.sync.refresh_interval_secs, 300);
    assert_eq!(config.persistence.backend, PersistenceBackendKind::File);
  }

  #[test]
  fn test_unknown_backend_is_rejected() {
    assert!(Config::from_yaml("cache:\n  backend: redis\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let result = Config::load(Some(Path::new("/nonexistent/cpsync.yaml")));
    assert!(result.is_err());
  }
}
