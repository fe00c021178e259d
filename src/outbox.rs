//! Durable queue of mutations made while offline, replayed by background sync.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};
use url::Url;

use crate::agent::{ReplayFn, SyncTag};
use crate::http::{BoxFuture, Method, Network, Request};

/// A mutation waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedAction {
  pub id: i64,
  pub tag: String,
  pub method: Method,
  pub url: Url,
  pub body: Option<Vec<u8>>,
  pub queued_at: DateTime<Utc>,
}

impl QueuedAction {
  fn to_request(&self) -> Request {
    let request = Request::new(self.method, self.url.clone());
    match &self.body {
      Some(body) => request.with_body(body.clone()),
      None => request,
    }
  }
}

/// SQLite-backed outbox.
///
/// Replays of one tag never overlap: each tag has its own async lock held for
/// the whole replay, so a second sync event for the same tag waits and then
/// sees only what the first one left queued.
pub struct Outbox {
  conn: Mutex<Connection>,
  reports_replay: AsyncMutex<()>,
  checkins_replay: AsyncMutex<()>,
}

const OUTBOX_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    body BLOB,
    queued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_outbox_tag ON outbox(tag, id);
"#;

impl Outbox {
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create outbox directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open outbox at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory outbox: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(OUTBOX_SCHEMA)
      .map_err(|e| eyre!("Failed to run outbox migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
      reports_replay: AsyncMutex::new(()),
      checkins_replay: AsyncMutex::new(()),
    })
  }

  fn replay_lock(&self, tag: SyncTag) -> &AsyncMutex<()> {
    match tag {
      SyncTag::Reports => &self.reports_replay,
      SyncTag::Checkins => &self.checkins_replay,
    }
  }

  /// Queue an action under `tag`. Returns its id.
  pub fn enqueue(
    &self,
    tag: SyncTag,
    method: Method,
    url: &Url,
    body: Option<&[u8]>,
  ) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT INTO outbox (tag, method, url, body, queued_at) VALUES (?, ?, ?, ?, ?)",
        params![
          tag.as_str(),
          method.as_str(),
          url.as_str(),
          body,
          Utc::now().to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to queue action: {}", e))?;

    let id = conn.last_insert_rowid();
    debug!(id, tag = %tag, %method, %url, "Queued offline action");
    Ok(id)
  }

  /// Actions queued under `tag`, oldest first.
  pub fn pending(&self, tag: SyncTag) -> Result<Vec<QueuedAction>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, tag, method, url, body, queued_at FROM outbox
         WHERE tag = ? ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![tag.as_str()], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, Option<Vec<u8>>>(4)?,
          row.get::<_, String>(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query outbox: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read outbox row: {}", e))?;

    rows
      .into_iter()
      .map(|(id, tag, method, url, body, queued_at)| {
        Ok(QueuedAction {
          id,
          tag,
          method: method.parse()?,
          url: Url::parse(&url).map_err(|e| eyre!("Bad queued URL '{}': {}", url, e))?,
          body,
          queued_at: DateTime::parse_from_rfc3339(&queued_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| eyre!("Failed to parse datetime '{}': {}", queued_at, e))?,
        })
      })
      .collect()
  }

  pub fn remove(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM outbox WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued action {}: {}", id, e))?;
    Ok(())
  }

  /// Send every action queued under `tag`, in order.
  ///
  /// An action is removed only after a 2xx response. The first failure stops
  /// the replay and is returned; it and everything after it stay queued.
  pub async fn replay(&self, tag: SyncTag, network: &dyn Network) -> Result<usize> {
    let _running = self.replay_lock(tag).lock().await;
    let actions = self.pending(tag)?;
    let mut sent = 0;

    for action in actions {
      let response = network
        .fetch(&action.to_request())
        .await
        .map_err(|e| eyre!("Failed to replay {} {}: {}", action.method, action.url, e))?;

      if !response.is_success() {
        return Err(eyre!(
          "Failed to replay {} {}: status {}",
          action.method,
          action.url,
          response.status
        ));
      }

      self.remove(action.id)?;
      sent += 1;
    }

    if sent > 0 {
      info!(tag = %tag, sent, "Replayed outbox");
    }
    Ok(sent)
  }

  /// Replay function for the sync coordinator's handler table.
  pub fn replay_handler(self: &Arc<Self>, tag: SyncTag, network: Arc<dyn Network>) -> ReplayFn {
    let outbox = Arc::clone(self);
    Box::new(move || -> BoxFuture<'static, Result<()>> {
      let outbox = Arc::clone(&outbox);
      let network = Arc::clone(&network);
      Box::pin(async move { outbox.replay(tag, network.as_ref()).await.map(|_| ()) })
    })
  }
}
