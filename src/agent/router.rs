//! Request classification and per-class caching strategy.

use tracing::{debug, warn};

use super::context::WorkerContext;
use crate::cache::RequestKey;
use crate::error::FetchError;
use crate::http::{Request, Response};

/// Request classes, in the order they are tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Different origin: not intercepted
  CrossOrigin,
  /// Mutating request: straight to the network, never cached
  NonGet,
  /// Real-time or framework data channel: not intercepted
  Bypassed,
  /// API GET: network-first into the runtime bucket
  Api,
  /// Style/script/image/font: cache-first from the precache bucket
  StaticAsset,
  /// Everything else (HTML navigations): network-first with offline fallback
  Navigation,
}

/// What the agent did with an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// The agent declined; the host performs the request itself
  Passthrough,
  /// The agent supplied the response (or a failure the caller must see)
  Respond(Result<Response, FetchError>),
}

impl FetchOutcome {
  pub fn is_passthrough(&self) -> bool {
    matches!(self, FetchOutcome::Passthrough)
  }
}

/// Classify a request. First match wins.
pub fn classify(ctx: &WorkerContext, request: &Request) -> RequestClass {
  let url = &request.url;

  if url.origin() != ctx.origin.origin() {
    return RequestClass::CrossOrigin;
  }
  if !request.is_get() {
    return RequestClass::NonGet;
  }

  let host = url.host_str().unwrap_or_default();
  let path = url.path();
  if ctx
    .bypass
    .iter()
    .any(|pattern| host.contains(pattern.as_str()) || path.contains(pattern.as_str()))
  {
    return RequestClass::Bypassed;
  }

  if path.starts_with(&ctx.api_prefix) {
    RequestClass::Api
  } else if request.destination.is_static_asset() {
    RequestClass::StaticAsset
  } else {
    RequestClass::Navigation
  }
}

/// Handle one intercepted request.
pub async fn handle_fetch(ctx: &WorkerContext, request: &Request) -> FetchOutcome {
  let class = classify(ctx, request);
  debug!(method = %request.method, url = %request.url, ?class, "Intercepted request");

  let key = match class {
    RequestClass::CrossOrigin | RequestClass::Bypassed => return FetchOutcome::Passthrough,
    RequestClass::NonGet => {
      return FetchOutcome::Respond(ctx.network.fetch(request).await);
    }
    _ => match RequestKey::for_request(request) {
      Some(key) => key,
      // classify() only lets GETs through to here
      None => return FetchOutcome::Respond(ctx.network.fetch(request).await),
    },
  };

  let result = match class {
    RequestClass::Api => api(ctx, request, &key).await,
    RequestClass::StaticAsset => {
      ctx
        .cache
        .cache_first(&ctx.buckets.precache, &key, request, ctx.network.as_ref())
        .await
    }
    _ => navigation(ctx, request, &key).await,
  };

  FetchOutcome::Respond(result)
}

async fn api(ctx: &WorkerContext, request: &Request, key: &RequestKey) -> Result<Response, FetchError> {
  ctx
    .cache
    .network_first(&ctx.buckets.runtime, key, request, ctx.network.as_ref())
    .await
    .map_err(|e| match e {
      FetchError::Network(_) => FetchError::CacheMiss(request.url.to_string()),
      other => other,
    })
}

async fn navigation(
  ctx: &WorkerContext,
  request: &Request,
  key: &RequestKey,
) -> Result<Response, FetchError> {
  match ctx
    .cache
    .network_first(&ctx.buckets.runtime, key, request, ctx.network.as_ref())
    .await
  {
    Err(FetchError::Network(reason)) => {
      debug!(url = %request.url, %reason, "Serving offline page");
      offline_page(ctx)
    }
    // An unreadable snapshot counts as no snapshot
    Err(FetchError::Storage(reason)) => {
      warn!(url = %request.url, %reason, "Runtime cache lookup failed, serving offline page");
      offline_page(ctx)
    }
    other => other,
  }
}

fn offline_page(ctx: &WorkerContext) -> Result<Response, FetchError> {
  let offline_key = RequestKey::for_get(&ctx.offline_page);
  ctx
    .cache
    .lookup(&ctx.buckets.precache, &offline_key)?
    .ok_or_else(|| FetchError::OfflinePageMissing(ctx.offline_page.to_string()))
}
