//! Cache generations: fill the precache on install, drop old buckets on activate.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::{info, warn};

use super::context::WorkerContext;
use crate::cache::{CacheEntry, RequestKey};
use crate::http::Request;

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
  pub bucket: String,
  pub precached: usize,
  /// The new generation should not wait for old clients to close
  pub skip_waiting: bool,
}

/// Result of an activation. Never fails on individual bucket deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateOutcome {
  pub deleted: Vec<String>,
  /// Buckets that could not be deleted this time round
  pub failed: Vec<String>,
  /// Take control of open clients right away
  pub claim_clients: bool,
}

/// Fetch every manifest URL and replace the precache bucket with the results.
///
/// All or nothing: one unreachable URL (or non-200) fails the install and
/// leaves whatever the bucket held before untouched.
pub async fn install(ctx: &WorkerContext) -> Result<InstallOutcome> {
  let bucket = &ctx.buckets.precache;
  let storage = ctx.cache.storage();
  storage.open_bucket(bucket)?;

  let requests: Vec<Request> = ctx.manifest.iter().cloned().map(Request::get).collect();

  let fetches = requests.iter().map(|request| async move {
    let response = ctx
      .network
      .fetch(request)
      .await
      .map_err(|e| eyre!("Failed to precache {}: {}", request.url, e))?;

    if !response.is_cacheable() {
      return Err(eyre!(
        "Failed to precache {}: status {}",
        request.url,
        response.status
      ));
    }

    Ok::<_, color_eyre::Report>(CacheEntry::new(
      RequestKey::for_get(&request.url),
      request.url.clone(),
      response,
    ))
  });

  let entries = try_join_all(fetches).await?;
  let precached = entries.len();
  storage.replace_all(bucket, entries)?;

  info!(bucket = %bucket, precached, "Installed cache generation");

  Ok(InstallOutcome {
    bucket: bucket.clone(),
    precached,
    skip_waiting: true,
  })
}

/// Delete every bucket that isn't part of the live generation.
pub async fn activate(ctx: &WorkerContext) -> Result<ActivateOutcome> {
  let storage = ctx.cache.storage();
  let names = storage.bucket_names()?;

  let mut deleted = Vec::new();
  let mut failed = Vec::new();

  for name in names.into_iter().filter(|n| !ctx.buckets.is_live(n)) {
    match storage.delete_bucket(&name) {
      Ok(_) => {
        info!(bucket = %name, "Deleted stale cache bucket");
        deleted.push(name);
      }
      Err(e) => {
        warn!(bucket = %name, error = %e, "Failed to delete stale cache bucket");
        failed.push(name);
      }
    }
  }

  info!(
    deleted = deleted.len(),
    failed = failed.len(),
    "Activated cache generation"
  );

  Ok(ActivateOutcome {
    deleted,
    failed,
    claim_clients: true,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheStorage;
  use crate::http::Response;
  use crate::testing::{self, FlakyStorage, MockNetwork};
  use std::sync::Arc;
  use url::Url;

  fn network_with_manifest() -> MockNetwork {
    let network = MockNetwork::new();
    for path in testing::MANIFEST {
      network.respond(
        &format!("https://app.example.com{}", path),
        Response::new(200, format!("content of {}", path)),
      );
    }
    network
  }

  fn manifest_urls() -> Vec<String> {
    let mut urls: Vec<String> = testing::MANIFEST
      .iter()
      .map(|p| format!("https://app.example.com{}", p))
      .collect();
    urls.sort();
    urls
  }

  #[tokio::test]
  async fn test_install_precaches_manifest() {
    let (ctx, harness) = testing::context(network_with_manifest());

    let outcome = install(&ctx).await.unwrap();

    assert_eq!(outcome.bucket, "im-precache-v1");
    assert_eq!(outcome.precached, testing::MANIFEST.len());
    assert!(outcome.skip_waiting);
    assert_eq!(harness.storage.keys("im-precache-v1").unwrap(), manifest_urls());
  }

  #[tokio::test]
  async fn test_install_twice_leaves_exactly_the_manifest() {
    let (ctx, harness) = testing::context(network_with_manifest());

    install(&ctx).await.unwrap();
    // Something stored at runtime by the cache-first strategy
    let extra = Url::parse("https://app.example.com/assets/extra.css").unwrap();
    harness
      .storage
      .put(
        "im-precache-v1",
        CacheEntry::new(RequestKey::for_get(&extra), extra, Response::new(200, "x")),
      )
      .unwrap();
    install(&ctx).await.unwrap();

    assert_eq!(harness.storage.keys("im-precache-v1").unwrap(), manifest_urls());
  }

  #[tokio::test]
  async fn test_install_fails_on_unreachable_url() {
    let network = network_with_manifest();
    network.fail("https://app.example.com/offline.html");
    let (ctx, harness) = testing::context(network);

    let err = install(&ctx).await.unwrap_err();

    assert!(err.to_string().contains("offline.html"));
    assert!(harness.storage.keys("im-precache-v1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_rejects_non_200() {
    let network = network_with_manifest();
    network.respond("https://app.example.com/", Response::new(404, "missing"));
    let (ctx, _) = testing::context(network);

    assert!(install(&ctx).await.is_err());
  }

  #[tokio::test]
  async fn test_failed_reinstall_keeps_previous_precache() {
    let network = network_with_manifest();
    let (ctx, harness) = testing::context(network);
    install(&ctx).await.unwrap();

    harness.network.set_offline(true);
    assert!(install(&ctx).await.is_err());

    assert_eq!(harness.storage.keys("im-precache-v1").unwrap(), manifest_urls());
  }

  #[tokio::test]
  async fn test_activate_keeps_only_live_generation() {
    let (ctx, harness) = testing::context(MockNetwork::new());
    for name in [
      "im-precache-v0",
      "im-runtime-v0",
      "im-precache-v1",
      "im-runtime-v1",
      "someone-elses-cache",
    ] {
      harness.storage.open_bucket(name).unwrap();
    }

    let outcome = activate(&ctx).await.unwrap();

    assert_eq!(
      harness.storage.bucket_names().unwrap(),
      vec!["im-precache-v1", "im-runtime-v1"]
    );
    assert_eq!(outcome.deleted.len(), 3);
    assert!(outcome.failed.is_empty());
    assert!(outcome.claim_clients);
  }

  #[tokio::test]
  async fn test_activate_survives_delete_failure() {
    let inner = Arc::new(crate::cache::SqliteStorage::open_in_memory().unwrap());
    for name in ["im-precache-v0", "im-runtime-v0", "im-runtime-v1"] {
      inner.open_bucket(name).unwrap();
    }
    let storage = Arc::new(FlakyStorage::new(inner.clone(), "im-precache-v0"));
    let (ctx, _) =
      testing::context_with_storage(testing::config(), MockNetwork::new(), storage);

    let outcome = activate(&ctx).await.unwrap();

    assert_eq!(outcome.deleted, vec!["im-runtime-v0"]);
    assert_eq!(outcome.failed, vec!["im-precache-v0"]);
    assert_eq!(
      inner.bucket_names().unwrap(),
      vec!["im-precache-v0", "im-runtime-v1"]
    );
  }
}
