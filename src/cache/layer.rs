//! Cache layer that orchestrates caching strategies with network fetching.

use std::sync::Arc;
use tracing::{debug, warn};

use super::key::RequestKey;
use super::storage::{CacheEntry, CacheStorage};
use crate::error::FetchError;
use crate::http::{Network, Request, Response};

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the request router and the network,
/// providing the per-bucket strategies with offline fallback.
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
    Self { storage }
  }

  pub fn storage(&self) -> &dyn CacheStorage {
    self.storage.as_ref()
  }

  /// Look up a snapshot in one bucket.
  pub fn lookup(&self, bucket: &str, key: &RequestKey) -> Result<Option<Response>, FetchError> {
    self
      .storage
      .match_key(bucket, key)
      .map(|cached| {
        cached.map(|c| {
          debug!(bucket, url = %c.url, stored_at = %c.stored_at, "Cache hit");
          c.response
        })
      })
      .map_err(|e| FetchError::Storage(e.to_string()))
  }

  /// Store a copy of `response` if `persist` accepts it, then hand the original back.
  ///
  /// A failed write is logged and the live response is still returned.
  pub fn store_and_return<P>(
    &self,
    bucket: &str,
    key: &RequestKey,
    request: &Request,
    response: Response,
    persist: P,
  ) -> Response
  where
    P: Fn(&Response) -> bool,
  {
    if persist(&response) {
      let entry = CacheEntry::new(key.clone(), request.url.clone(), response.clone());
      match self.storage.put(bucket, entry) {
        Ok(()) => debug!(bucket, url = %request.url, "Stored response"),
        Err(e) => warn!(bucket, url = %request.url, error = %e, "Failed to store response"),
      }
    }
    response
  }

  /// Network-first.
  ///
  /// 1. Fetch from network; a 200 is copied into `bucket`
  /// 2. Any HTTP status is returned as-is
  /// 3. On network failure, return the snapshot for this exact key
  /// 4. No snapshot either: the network error is returned
  pub async fn network_first(
    &self,
    bucket: &str,
    key: &RequestKey,
    request: &Request,
    network: &dyn Network,
  ) -> Result<Response, FetchError> {
    match network.fetch(request).await {
      Ok(response) => Ok(self.store_and_return(
        bucket,
        key,
        request,
        response,
        Response::is_cacheable,
      )),
      Err(err) => {
        debug!(url = %request.url, error = %err, "Network failed, trying cache");
        match self.lookup(bucket, key)? {
          Some(cached) => Ok(cached),
          None => Err(err),
        }
      }
    }
  }

  /// Cache-first.
  ///
  /// 1. Snapshot present in `bucket`: return it without touching the network
  /// 2. Otherwise fetch, copy a 200 into `bucket`, return the live response
  pub async fn cache_first(
    &self,
    bucket: &str,
    key: &RequestKey,
    request: &Request,
    network: &dyn Network,
  ) -> Result<Response, FetchError> {
    if let Some(cached) = self.lookup(bucket, key)? {
      return Ok(cached);
    }

    let response = network.fetch(request).await?;
    Ok(self.store_and_return(bucket, key, request, response, Response::is_cacheable))
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::testing::MockNetwork;
  use url::Url;

  fn layer() -> CacheLayer {
    CacheLayer::new(Arc::new(SqliteStorage::open_in_memory().unwrap()))
  }

  fn get(url: &str) -> (Request, RequestKey) {
    let request = Request::get(Url::parse(url).unwrap());
    let key = RequestKey::for_request(&request).unwrap();
    (request, key)
  }

  #[test]
  fn test_store_and_return_respects_predicate() {
    let layer = layer();
    let (request, key) = get("https://a.test/page");

    let returned = layer.store_and_return("b", &key, &request, Response::new(200, "x"), |_| false);
    assert_eq!(returned.text(), "x");
    assert!(layer.lookup("b", &key).unwrap().is_none());

    layer.store_and_return("b", &key, &request, Response::new(200, "y"), |_| true);
    assert_eq!(layer.lookup("b", &key).unwrap().unwrap().text(), "y");
  }

  #[tokio::test]
  async fn test_network_first_does_not_cache_errors() {
    let layer = layer();
    let network = MockNetwork::new();
    network.respond("https://a.test/api/me", Response::new(500, "boom"));
    let (request, key) = get("https://a.test/api/me");

    let response = layer
      .network_first("runtime", &key, &request, &network)
      .await
      .unwrap();
    assert_eq!(response.status, 500);
    assert!(layer.lookup("runtime", &key).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_network_first_error_without_snapshot() {
    let layer = layer();
    let network = MockNetwork::new();
    network.set_offline(true);
    let (request, key) = get("https://a.test/api/me");

    let err = layer
      .network_first("runtime", &key, &request, &network)
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Network(_)));
  }

  #[tokio::test]
  async fn test_cache_first_fills_bucket_on_miss() {
    let layer = layer();
    let network = MockNetwork::new();
    network.respond("https://a.test/logo.png", Response::new(200, "png"));
    let (request, key) = get("https://a.test/logo.png");

    layer
      .cache_first("precache", &key, &request, &network)
      .await
      .unwrap();
    layer
      .cache_first("precache", &key, &request, &network)
      .await
      .unwrap();

    assert_eq!(network.call_count(), 1);
    assert_eq!(layer.lookup("precache", &key).unwrap().unwrap().text(), "png");
  }
}
