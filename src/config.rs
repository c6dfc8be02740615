use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::error::{EngineError, Result};

/// Engine configuration.
///
/// Every field has a default carrying the shipped values, so a config file
/// only needs to name what it overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Version suffix stamped onto cache partitions. Activation deletes any
  /// partition whose suffix differs from this.
  pub cache_version: String,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Origin the application shell is served from.
  pub origin: String,
  /// Exact paths guaranteed pre-cached at install time and never evicted
  /// by pressure.
  pub crisis_paths: Vec<String>,
  /// Path prefixes that must always try the network first.
  pub network_first_prefixes: Vec<String>,
  /// Namespace under which API requests live.
  pub api_namespace: String,
  /// API path prefixes whose responses may be cached.
  pub cacheable_api_prefixes: Vec<String>,
  /// File extensions routed to the static tier.
  pub static_extensions: BTreeSet<String>,
  /// File extensions routed to the media tier.
  pub media_extensions: BTreeSet<String>,
  /// Application shell warmed into the static tier at install.
  pub static_shell: Vec<String>,
  /// Pre-cached page served to offline navigations.
  pub offline_page: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Origin the per-entity sync endpoints live on.
  pub base_url: String,
  /// First retry delay after a failed drain, in seconds.
  pub retry_base_secs: u64,
  /// Ceiling for the exponential retry delay, in seconds.
  pub retry_cap_secs: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      cache_version: "v3".to_string(),
      cache: CacheConfig::default(),
      sync: SyncConfig::default(),
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      origin: "https://app.haven.example".to_string(),
      crisis_paths: vec![
        "/safety-plan".to_string(),
        "/emergency-contacts".to_string(),
        "/exercises/breathing".to_string(),
        "/api/crisis-hotlines".to_string(),
      ],
      network_first_prefixes: vec![
        "/api/auth".to_string(),
        "/api/profile".to_string(),
        "/api/sync".to_string(),
        "/api/notifications".to_string(),
      ],
      api_namespace: "/api/".to_string(),
      cacheable_api_prefixes: vec![
        "/api/resources".to_string(),
        "/api/exercises".to_string(),
        "/api/articles".to_string(),
      ],
      static_extensions: ["css", "js", "html", "woff", "woff2", "ico", "webmanifest"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
      media_extensions: ["png", "jpg", "jpeg", "gif", "svg", "webp", "mp3", "mp4"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
      static_shell: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/app.css".to_string(),
        "/app.js".to_string(),
        "/manifest.webmanifest".to_string(),
      ],
      offline_page: "/offline.html".to_string(),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      base_url: "https://api.haven.example".to_string(),
      retry_base_secs: 60,
      retry_cap_secs: 900,
    }
  }
}

impl EngineConfig {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./haven.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/haven/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(EngineError::Config(format!(
          "config file not found: {}",
          p.display()
        )));
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
    // Check current directory
    let local = PathBuf::from("haven.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("haven").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      EngineError::Config(format!("failed to read config file {}: {}", path.display(), e))
    })?;

    serde_yaml::from_str(&contents).map_err(|e| {
      EngineError::Config(format!("failed to parse config file {}: {}", path.display(), e))
    })
  }

  /// The application origin as a parsed URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.cache.origin).map_err(|e| {
      EngineError::Config(format!("invalid origin {}: {}", self.cache.origin, e))
    })
  }

  /// The sync base URL as a parsed URL.
  pub fn sync_base_url(&self) -> Result<Url> {
    Url::parse(&self.sync.base_url).map_err(|e| {
      EngineError::Config(format!("invalid sync base url {}: {}", self.sync.base_url, e))
    })
  }
}
