//! In-process doubles for the network, notifier, replay handlers and storage.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::agent::{Notification, Notifier, SyncHandlers, SyncTag, WorkerContext};
use crate::cache::{CacheEntry, CacheStorage, CachedResponse, RequestKey, SqliteStorage};
use crate::config::Config;
use crate::error::FetchError;
use crate::http::{BoxFuture, Method, Network, Request, Response};

pub const ORIGIN: &str = "https://app.example.com";

/// Paths precached by the test configuration.
pub const MANIFEST: [&str; 3] = ["/", "/offline.html", "/assets/app.css"];

pub fn config() -> Config {
  Config {
    origin: ORIGIN.to_string(),
    cache_prefix: "im".to_string(),
    cache_version: "v1".to_string(),
    precache: MANIFEST.iter().map(|p| p.to_string()).collect(),
    ..Config::default()
  }
}

/// Network double with canned responses per URL.
#[derive(Default)]
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Response>>,
  failing: Mutex<HashSet<String>>,
  offline: AtomicBool,
  calls: Mutex<Vec<(Method, String)>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self.routes.lock().unwrap().insert(url.to_string(), response);
  }

  /// Make one URL fail at the transport level.
  pub fn fail(&self, url: &str) {
    self.failing.lock().unwrap().insert(url.to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<(Method, String)> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

impl Network for MockNetwork {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
    Box::pin(async move {
      let url = request.url.to_string();
      self
        .calls
        .lock()
        .unwrap()
        .push((request.method, url.clone()));

      // Let other tasks run while this request is "in flight"
      tokio::task::yield_now().await;

      if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&url) {
        return Err(FetchError::Network(format!("{}: connection refused", url)));
      }

      Ok(
        self
          .routes
          .lock()
          .unwrap()
          .get(&url)
          .cloned()
          .unwrap_or_else(|| Response::new(404, "")),
      )
    })
  }
}

/// Notifier that records what it was asked to do.
#[derive(Default)]
pub struct RecordingNotifier {
  shown: Mutex<Vec<Notification>>,
  closed: Mutex<Vec<String>>,
  opened: Mutex<Vec<Url>>,
}

impl RecordingNotifier {
  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }

  pub fn closed(&self) -> Vec<String> {
    self.closed.lock().unwrap().clone()
  }

  pub fn opened(&self) -> Vec<Url> {
    self.opened.lock().unwrap().clone()
  }
}

impl Notifier for RecordingNotifier {
  fn show<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      self.shown.lock().unwrap().push(notification.clone());
      Ok(())
    })
  }

  fn close<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      self.closed.lock().unwrap().push(notification.tag.clone());
      Ok(())
    })
  }

  fn focus_or_open<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      self.opened.lock().unwrap().push(url.clone());
      Ok(())
    })
  }
}

#[derive(Default)]
struct ReplayState {
  calls: [AtomicUsize; 2],
  fail: [AtomicBool; 2],
}

/// Replay handlers whose success can be switched per tag.
#[derive(Clone, Default)]
pub struct ScriptedReplay {
  state: Arc<ReplayState>,
}

impl ScriptedReplay {
  pub fn new() -> Self {
    Self::default()
  }

  fn slot(tag: SyncTag) -> usize {
    match tag {
      SyncTag::Reports => 0,
      SyncTag::Checkins => 1,
    }
  }

  pub fn fail(&self, tag: SyncTag, fail: bool) {
    self.state.fail[Self::slot(tag)].store(fail, Ordering::SeqCst);
  }

  pub fn calls(&self, tag: SyncTag) -> usize {
    self.state.calls[Self::slot(tag)].load(Ordering::SeqCst)
  }

  fn handler(&self, tag: SyncTag) -> crate::agent::ReplayFn {
    let state = Arc::clone(&self.state);
    Box::new(move || -> BoxFuture<'static, Result<()>> {
      let state = Arc::clone(&state);
      Box::pin(async move {
        let slot = Self::slot(tag);
        state.calls[slot].fetch_add(1, Ordering::SeqCst);
        if state.fail[slot].load(Ordering::SeqCst) {
          Err(eyre!("replay of {} failed", tag))
        } else {
          Ok(())
        }
      })
    })
  }

  pub fn handlers(&self) -> SyncHandlers {
    SyncHandlers::new(self.handler(SyncTag::Reports), self.handler(SyncTag::Checkins))
  }
}

/// Storage wrapper that fails `delete_bucket` for one bucket and, optionally,
/// every lookup in another.
pub struct FlakyStorage {
  inner: Arc<SqliteStorage>,
  undeletable: String,
  unreadable: Option<String>,
}

impl FlakyStorage {
  pub fn new(inner: Arc<SqliteStorage>, undeletable: &str) -> Self {
    Self {
      inner,
      undeletable: undeletable.to_string(),
      unreadable: None,
    }
  }

  pub fn with_unreadable(mut self, bucket: &str) -> Self {
    self.unreadable = Some(bucket.to_string());
    self
  }
}

impl CacheStorage for FlakyStorage {
  fn open_bucket(&self, bucket: &str) -> Result<()> {
    self.inner.open_bucket(bucket)
  }

  fn match_key(&self, bucket: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    if self.unreadable.as_deref() == Some(bucket) {
      return Err(eyre!("database disk image is malformed"));
    }
    self.inner.match_key(bucket, key)
  }

  fn put(&self, bucket: &str, entry: CacheEntry) -> Result<()> {
    self.inner.put(bucket, entry)
  }

  fn replace_all(&self, bucket: &str, entries: Vec<CacheEntry>) -> Result<()> {
    self.inner.replace_all(bucket, entries)
  }

  fn delete_bucket(&self, bucket: &str) -> Result<bool> {
    if bucket == self.undeletable {
      return Err(eyre!("database is locked"));
    }
    self.inner.delete_bucket(bucket)
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    self.inner.bucket_names()
  }

  fn keys(&self, bucket: &str) -> Result<Vec<String>> {
    self.inner.keys(bucket)
  }
}

/// Handles on the collaborators behind a test context.
pub struct Harness {
  pub storage: Arc<dyn CacheStorage>,
  pub network: Arc<MockNetwork>,
  pub notifier: Arc<RecordingNotifier>,
}

pub fn context(network: MockNetwork) -> (Arc<WorkerContext>, Harness) {
  context_with(config(), network)
}

pub fn context_with(config: Config, network: MockNetwork) -> (Arc<WorkerContext>, Harness) {
  let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
  build(config, network, storage, ScriptedReplay::new().handlers())
}

pub fn context_with_replay(
  network: MockNetwork,
  replay: &ScriptedReplay,
) -> (Arc<WorkerContext>, Harness) {
  let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
  build(config(), network, storage, replay.handlers())
}

pub fn context_with_storage(
  config: Config,
  network: MockNetwork,
  storage: Arc<dyn CacheStorage>,
) -> (Arc<WorkerContext>, Harness) {
  build(config, network, storage, ScriptedReplay::new().handlers())
}

fn build(
  config: Config,
  network: MockNetwork,
  storage: Arc<dyn CacheStorage>,
  handlers: SyncHandlers,
) -> (Arc<WorkerContext>, Harness) {
  let network = Arc::new(network);
  let notifier = Arc::new(RecordingNotifier::default());
  let ctx = WorkerContext::new(
    &config,
    storage.clone(),
    network.clone(),
    notifier.clone(),
    handlers,
  )
  .unwrap();

  (
    Arc::new(ctx),
    Harness {
      storage,
      network,
      notifier,
    },
  )
}
