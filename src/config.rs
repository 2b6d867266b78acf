use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the controlled page scope (e.g. "https://jobconnect.example.org")
  pub origin: Url,
  /// Version tag of the caching layer, part of every namespace name
  #[serde(default = "default_version")]
  pub version: String,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Critical assets pre-cached into the static namespace on install
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  #[serde(default)]
  pub fallbacks: FallbackConfig,
  #[serde(default)]
  pub routes: RoutesConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  /// Network timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Database file (defaults to $XDG_DATA_HOME/jobconnect-offline/offline.db)
  pub database: Option<PathBuf>,
}

fn default_version() -> String {
  "v1".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_precache() -> Vec<String> {
  [
    "/",
    "/index.html",
    "/static/js/main.js",
    "/static/css/main.css",
    "/manifest.json",
    "/favicon.ico",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Namespace name prefix
  #[serde(default = "default_prefix")]
  pub prefix: String,
  /// Prune entries older than `max_entry_age_days` on activation
  #[serde(default = "default_true")]
  pub auto_clear_old_cache: bool,
  #[serde(default = "default_max_entry_age_days")]
  pub max_entry_age_days: u32,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: default_prefix(),
      auto_clear_old_cache: true,
      max_entry_age_days: default_max_entry_age_days(),
    }
  }
}

fn default_prefix() -> String {
  "jobconnect".to_string()
}

fn default_true() -> bool {
  true
}

fn default_max_entry_age_days() -> u32 {
  30
}

/// Upper bound for `max_entry_age_days`, roughly a century
pub const MAX_ENTRY_AGE_DAYS: u32 = 36_500;

#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  #[serde(default = "default_placeholder_image")]
  pub placeholder_image: String,
}

impl Default for FallbackConfig {
  fn default() -> Self {
    Self {
      offline_page: default_offline_page(),
      placeholder_image: default_placeholder_image(),
    }
  }
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

fn default_placeholder_image() -> String {
  "/static/images/placeholder.png".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
  /// Path segments marking API requests
  #[serde(default = "default_api_segments")]
  pub api_segments: Vec<String>,
  /// File names treated as API data
  #[serde(default = "default_data_files")]
  pub data_files: Vec<String>,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      api_segments: default_api_segments(),
      data_files: default_data_files(),
    }
  }
}

fn default_api_segments() -> Vec<String> {
  vec!["/api/".to_string()]
}

fn default_data_files() -> Vec<String> {
  vec!["data.json".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
  /// Sync tag that drains the queue
  #[serde(default = "default_sync_tag")]
  pub sync_tag: String,
  /// Path submissions are replayed to
  #[serde(default = "default_endpoint")]
  pub endpoint: String,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      sync_tag: default_sync_tag(),
      endpoint: default_endpoint(),
    }
  }
}

fn default_sync_tag() -> String {
  "job-application".to_string()
}

fn default_endpoint() -> String {
  "/api/job-applications".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
  #[serde(default = "default_probe_path")]
  pub probe_path: String,
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_path: default_probe_path(),
      interval_secs: default_interval_secs(),
    }
  }
}

fn default_probe_path() -> String {
  "/".to_string()
}

fn default_interval_secs() -> u64 {
  15
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./jobconnect.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/jobconnect-offline/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/jobconnect-offline/config.yaml\n\
                 with at least an `origin:` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("jobconnect.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("jobconnect-offline").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.origin.cannot_be_a_base() || self.origin.host().is_none() {
      return Err(eyre!("origin must be an absolute http(s) URL: {}", self.origin));
    }
    if self.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    if self.cache.max_entry_age_days > MAX_ENTRY_AGE_DAYS {
      return Err(eyre!(
        "cache.max_entry_age_days must be at most {}, got {}",
        MAX_ENTRY_AGE_DAYS,
        self.cache.max_entry_age_days
      ));
    }
    Ok(())
  }

  /// Resolve a same-origin path (e.g. "/offline.html") against the origin
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path {}: {}", path, e))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  /// Database location, explicit or under the user data directory
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }
    Ok(data_dir()?.join("offline.db"))
  }
}

/// Per-user data directory for the database and logs
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("jobconnect-offline"))
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
  Config::from_yaml("origin: https://jobconnect.example.org\n").unwrap()
}
