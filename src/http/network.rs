//! The network seam: anything that can turn a `Request` into a `Response`.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::pin::Pin;

use super::{Request, Response};
use crate::error::FetchError;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outbound network access.
///
/// Any HTTP status counts as a completed fetch. Only transport failures
/// (DNS, connection refused, reset mid-body) are `FetchError::Network`.
pub trait Network: Send + Sync {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>>;
}

/// `reqwest`-backed network access.
#[derive(Clone)]
pub struct ReqwestNetwork {
  client: reqwest::Client,
}

impl ReqwestNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("offline-agent/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for ReqwestNetwork {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
    Box::pin(async move {
      let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
        .map_err(|e| FetchError::Network(e.to_string()))?;

      let mut builder = self.client.request(method, request.url.clone());
      if let Some(body) = &request.body {
        builder = builder.body(body.clone());
      }

      let response = builder
        .send()
        .await
        .map_err(|e| FetchError::Network(format!("{}: {}", request.url, e)))?;

      let status = response.status().as_u16();
      let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
          (
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
          )
        })
        .collect();

      let body = response
        .bytes()
        .await
        .map_err(|e| FetchError::Network(format!("{}: {}", request.url, e)))?
        .to_vec();

      Ok(Response {
        status,
        headers,
        body,
      })
    })
  }
}
