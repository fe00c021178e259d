//! Request keys for the response cache.

use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::http::{Method, Request};

/// Lookup key for a cached response.
///
/// Derived from the full request identity (method + URL). Only GET requests
/// ever produce a key, so mutating requests cannot reach the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
  /// Key for a GET of `url`.
  pub fn for_get(url: &Url) -> Self {
    Self::hash(Method::Get, url)
  }

  /// Key for an intercepted request, or `None` if it isn't a GET.
  pub fn for_request(request: &Request) -> Option<Self> {
    request.is_get().then(|| Self::hash(request.method, &request.url))
  }

  fn hash(method: Method, url: &Url) -> Self {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(url.as_str().as_bytes());
    Self(hex::encode(hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}
