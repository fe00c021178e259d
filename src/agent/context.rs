//! Everything a handler may touch, passed in explicitly.

use color_eyre::Result;
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

use super::notify::Notifier;
use super::sync::SyncHandlers;
use crate::cache::{CacheLayer, CacheStorage};
use crate::config::{resolve, Config, NotificationDefaults};
use crate::http::Network;

/// Names of the two buckets of the current generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNames {
  pub precache: String,
  pub runtime: String,
}

impl BucketNames {
  pub fn for_generation(prefix: &str, version: &str) -> Self {
    Self {
      precache: format!("{}-precache-{}", prefix, version),
      runtime: format!("{}-runtime-{}", prefix, version),
    }
  }

  pub fn is_live(&self, name: &str) -> bool {
    name == self.precache || name == self.runtime
  }
}

/// Agent state shared by every event handler.
pub struct WorkerContext {
  pub origin: Url,
  pub buckets: BucketNames,
  /// Resolved, de-duplicated precache manifest
  pub manifest: Vec<Url>,
  pub api_prefix: String,
  pub bypass: Vec<String>,
  pub offline_page: Url,
  pub notification: NotificationDefaults,
  pub cache: CacheLayer,
  pub network: Arc<dyn Network>,
  pub notifier: Arc<dyn Notifier>,
  pub sync_handlers: SyncHandlers,
}

impl WorkerContext {
  pub fn new(
    config: &Config,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    notifier: Arc<dyn Notifier>,
    sync_handlers: SyncHandlers,
  ) -> Result<Self> {
    let origin = config.origin_url()?;

    let mut seen = HashSet::new();
    let mut manifest = Vec::with_capacity(config.precache.len());
    for entry in &config.precache {
      let url = resolve(&origin, entry)?;
      if seen.insert(url.clone()) {
        manifest.push(url);
      }
    }

    let offline_page = resolve(&origin, &config.offline_page)?;

    Ok(Self {
      buckets: BucketNames::for_generation(&config.cache_prefix, &config.cache_version),
      manifest,
      api_prefix: config.api_prefix.clone(),
      bypass: config.bypass.clone(),
      offline_page,
      notification: config.notification.clone(),
      cache: CacheLayer::new(storage),
      network,
      notifier,
      sync_handlers,
      origin,
    })
  }

  /// Resolve a path or URL against the application origin.
  pub fn resolve(&self, path_or_url: &str) -> Result<Url> {
    resolve(&self.origin, path_or_url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing;

  #[test]
  fn test_bucket_names_encode_version() {
    let names = BucketNames::for_generation("im", "v3");
    assert_eq!(names.precache, "im-precache-v3");
    assert_eq!(names.runtime, "im-runtime-v3");
    assert!(names.is_live("im-runtime-v3"));
    assert!(!names.is_live("im-runtime-v2"));
  }

  #[test]
  fn test_manifest_is_resolved_and_deduplicated() {
    let mut config = testing::config();
    config.precache = vec![
      "/".to_string(),
      "/offline.html".to_string(),
      "https://app.example.com/".to_string(),
    ];
    let (ctx, _) = testing::context_with(config, testing::MockNetwork::new());

    let manifest: Vec<&str> = ctx.manifest.iter().map(Url::as_str).collect();
    assert_eq!(
      manifest,
      vec!["https://app.example.com/", "https://app.example.com/offline.html"]
    );
  }
}
