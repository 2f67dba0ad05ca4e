use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::strategy::TierTtls;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// App name embedded in partition names
  #[serde(default = "default_app")]
  pub app: String,
  /// Bumping this is the supported way to invalidate whole cache tiers
  #[serde(default = "default_cache_version")]
  pub cache_version: u32,
  /// Origin the dashboard is served from
  pub base_url: String,
  /// Path prefix of the API namespace
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// Critical resources fetched and cached verbatim at install
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// Icon served in place of unreachable images
  #[serde(default = "default_placeholder_icon")]
  pub placeholder_icon: String,
  #[serde(default)]
  pub ttl: TtlConfig,
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
  /// Override for where tiers.db and queue.db live
  pub data_dir: Option<PathBuf>,
}

/// Freshness windows for the cache-first tiers, in seconds. The
/// network-first tiers (API, documents) have no fresh-hit path, so they
/// carry no TTL.
#[derive(Debug, Clone, Deserialize)]
pub struct TtlConfig {
  #[serde(default = "default_images_ttl")]
  pub images_secs: i64,
  #[serde(default = "default_assets_ttl")]
  pub assets_secs: i64,
}

impl Default for TtlConfig {
  fn default() -> Self {
    Self {
      images_secs: default_images_ttl(),
      assets_secs: default_assets_ttl(),
    }
  }
}

fn default_app() -> String {
  "fieldsales".to_string()
}

fn default_cache_version() -> u32 {
  1
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_precache() -> Vec<String> {
  ["/", "/dashboard", "/manifest.json", "/icons/icon-192.png", "/icons/icon-512.png"]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_placeholder_icon() -> String {
  "/icons/icon-192.png".to_string()
}

fn default_request_timeout_secs() -> u64 {
  30
}

fn default_images_ttl() -> i64 {
  30 * 24 * 60 * 60
}

fn default_assets_ttl() -> i64 {
  7 * 24 * 60 * 60
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fieldsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fieldsync/config.yaml
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
        "No configuration file found. Create one at ~/.config/fieldsync/config.yaml\n\
                 with at least a base_url entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fieldsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fieldsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    config.base_url()?;
    Ok(config)
  }

  /// The dashboard origin as a parsed URL.
  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.base_url).map_err(|e| eyre!("Invalid base_url {}: {}", self.base_url, e))
  }

  /// Absolute URL of the root document (the precached app shell).
  pub fn root_url(&self) -> Result<String> {
    Ok(self.base_url()?.join("/")?.to_string())
  }

  /// Absolute URL of the placeholder icon.
  pub fn placeholder_url(&self) -> Result<String> {
    Ok(self.base_url()?.join(&self.placeholder_icon)?.to_string())
  }

  pub fn ttls(&self) -> TierTtls {
    TierTtls {
      images: Duration::seconds(self.ttl.images_secs),
      assets: Duration::seconds(self.ttl.assets_secs),
    }
  }

  pub fn request_timeout(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.request_timeout_secs)
  }

  /// Where the durable stores live.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("fieldsync"))
  }

  pub fn tiers_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("tiers.db"))
  }

  pub fn queue_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("queue.db"))
  }
}
