use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

const APP_DIR: &str = "offline-agent";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the application is served from; anything else passes through
  pub origin: String,
  /// Bucket names are `{cache_prefix}-{precache|runtime}-{cache_version}`
  pub cache_prefix: String,
  /// Bump to force a clean cache generation
  pub cache_version: String,
  /// Paths (or absolute URLs) fetched and stored at install time
  pub precache: Vec<String>,
  /// Path prefix of API calls, served network-first
  pub api_prefix: String,
  /// Document served for failed navigations with nothing cached
  pub offline_page: String,
  /// Host/path substrings that are never intercepted (real-time channels)
  pub bypass: Vec<String>,
  pub notification: NotificationDefaults,
  pub sync: SyncPolicy,
  /// Cache database location (defaults to the user data dir)
  pub database: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:5173".to_string(),
      cache_prefix: "internship-monitor".to_string(),
      cache_version: "v1".to_string(),
      precache: [
        "/",
        "/index.html",
        "/offline.html",
        "/manifest.json",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      api_prefix: "/api/".to_string(),
      offline_page: "/offline.html".to_string(),
      bypass: [
        "firestore.googleapis.com",
        "firebaseio.com",
        "identitytoolkit.googleapis.com",
        "/__/",
        "/_next/data",
        "/_next/webpack-hmr",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      notification: NotificationDefaults::default(),
      sync: SyncPolicy::default(),
      database: None,
    }
  }
}

/// Fallback content for push notifications that omit fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Vibration pattern in milliseconds (on, off, on, ...)
  pub vibrate: Vec<u32>,
  pub tag: String,
}

impl Default for NotificationDefaults {
  fn default() -> Self {
    Self {
      title: "Internship Monitor".to_string(),
      body: "You have a new notification".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/icon-72x72.png".to_string(),
      vibrate: vec![100, 50, 100],
      tag: "internship-notification".to_string(),
    }
  }
}

/// How the host retries a sync tag whose replay failed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncPolicy {
  pub max_attempts: u32,
  pub initial_backoff_ms: u64,
}

impl Default for SyncPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_backoff_ms: 500,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-agent.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-agent/config.yaml
  ///
  /// With no file anywhere the built-in defaults are used.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        debug!("No configuration file found, using defaults");
        Config::default()
      }
    };

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-agent.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
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
    Ok(config)
  }

  /// Reject configurations the agent can't honour.
  pub fn validate(&self) -> Result<()> {
    let origin = self.origin_url()?;
    if self.cache_version.trim().is_empty() {
      return Err(eyre!("cache_version must not be empty"));
    }
    if !self.api_prefix.starts_with('/') {
      return Err(eyre!(
        "api_prefix must be an absolute path, got '{}'",
        self.api_prefix
      ));
    }
    // The offline page is served from the precache bucket
    let offline_page = resolve(&origin, &self.offline_page)?;
    let mut precached = false;
    for entry in &self.precache {
      if resolve(&origin, entry)? == offline_page {
        precached = true;
        break;
      }
    }
    if !precached {
      return Err(eyre!(
        "offline_page '{}' must be listed in precache",
        self.offline_page
      ));
    }
    Ok(())
  }

  /// The application origin as a URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Path of the cache database.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => Ok(Self::data_dir()?.join("cache.db")),
    }
  }

  /// Directory for rolling log files.
  pub fn log_dir(&self) -> Result<PathBuf> {
    Ok(Self::data_dir()?.join("logs"))
  }

  fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join(APP_DIR))
  }
}

/// Resolve a path or URL against `origin`.
pub fn resolve(origin: &Url, path_or_url: &str) -> Result<Url> {
  origin
    .join(path_or_url)
    .map_err(|e| eyre!("Invalid URL '{}': {}", path_or_url, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.notification.vibrate, vec![100, 50, 100]);
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      "origin: https://interns.example.edu\ncache_version: v7\nsync:\n  max_attempts: 5\n",
    )
    .unwrap();

    assert_eq!(
      config.origin_url().unwrap().as_str(),
      "https://interns.example.edu/"
    );
    assert_eq!(config.cache_version, "v7");
    assert_eq!(config.sync.max_attempts, 5);
    assert_eq!(config.sync.initial_backoff_ms, 500);
    assert_eq!(config.api_prefix, "/api/");
  }

  #[test]
  fn test_offline_page_must_be_precached() {
    let config = Config::from_yaml("precache: ['/']\n").unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_offline_page_matches_absolute_manifest_entry() {
    let config = Config::from_yaml(
      "origin: https://interns.example.edu\n\
       precache: ['/', 'https://interns.example.edu/offline.html']\n\
       offline_page: /offline.html\n",
    )
    .unwrap();
    assert!(config.validate().is_ok());

    let elsewhere = Config::from_yaml(
      "origin: https://interns.example.edu\n\
       precache: ['/', 'https://cdn.example.net/offline.html']\n\
       offline_page: /offline.html\n",
    )
    .unwrap();
    assert!(elsewhere.validate().is_err());
  }

  #[test]
  fn test_invalid_origin_is_rejected() {
    let config = Config::from_yaml("origin: not a url\n").unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
