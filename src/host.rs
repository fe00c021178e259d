//! Host runtime for the agent.
//!
//! Plays the part a browser plays for a service worker: delivers events
//! through the dispatch table, performs the request itself when the agent
//! declines to intercept, and keeps retrying sync tags whose replay failed.

use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{info, warn};
use url::Url;

use crate::agent::{
  DispatchTable, Event, FetchOutcome, Notification, Notifier, Outcome, SyncOutcome, WorkerContext,
};
use crate::config::SyncPolicy;
use crate::error::FetchError;
use crate::http::{BoxFuture, Request, Response};

/// Drives the agent.
#[derive(Clone)]
pub struct Host {
  ctx: Arc<WorkerContext>,
  table: Arc<DispatchTable>,
  policy: SyncPolicy,
}

impl Host {
  pub fn new(ctx: Arc<WorkerContext>, policy: SyncPolicy) -> Self {
    Self {
      ctx,
      table: Arc::new(DispatchTable::new()),
      policy,
    }
  }

  pub fn context(&self) -> &WorkerContext {
    &self.ctx
  }

  /// Deliver one event and wait for its handler to finish.
  pub async fn deliver(&self, event: Event) -> Result<Outcome> {
    self.table.dispatch(Arc::clone(&self.ctx), event).await
  }

  /// Perform a request the way the application sees it.
  pub async fn fetch(&self, request: Request) -> Result<Result<Response, FetchError>> {
    let outcome = self
      .deliver(Event::Fetch {
        request: request.clone(),
      })
      .await?;

    match outcome {
      Outcome::Fetched(FetchOutcome::Passthrough) => Ok(self.ctx.network.fetch(&request).await),
      Outcome::Fetched(FetchOutcome::Respond(result)) => Ok(result),
      other => Err(eyre!("Unexpected outcome for fetch: {:?}", other)),
    }
  }

  /// Fire a sync tag, retrying with exponential backoff while the replay fails.
  pub async fn sync(&self, tag: &str) -> Result<SyncOutcome> {
    let attempts = self.policy.max_attempts.max(1);
    let mut backoff = Duration::from_millis(self.policy.initial_backoff_ms);
    let mut attempt = 1;

    loop {
      let event = Event::Sync {
        tag: tag.to_string(),
      };
      match self.deliver(event).await {
        Ok(Outcome::Synced(outcome)) => return Ok(outcome),
        Ok(other) => return Err(eyre!("Unexpected outcome for sync: {:?}", other)),
        Err(e) if attempt >= attempts => {
          return Err(e.wrap_err(format!(
            "Gave up on sync tag {} after {} attempts",
            tag, attempts
          )));
        }
        Err(e) => {
          warn!(tag, attempt, error = %e, "Sync failed, will retry");
          tokio::time::sleep(backoff).await;
          backoff = backoff.saturating_mul(2);
          attempt += 1;
        }
      }
    }
  }

  /// Handle newline-delimited JSON events from `input` concurrently.
  ///
  /// Each event runs in its own task; replies are written as they complete,
  /// one JSON object per line, tagged with the event's sequence number.
  pub async fn serve<R, W>(&self, input: R, mut output: W) -> Result<()>
  where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
  {
    let mut lines = input.lines();
    let mut tasks = JoinSet::new();
    let mut seq: u64 = 0;
    let mut input_open = true;

    while input_open || !tasks.is_empty() {
      tokio::select! {
        line = lines.next_line(), if input_open => {
          match line.map_err(|e| eyre!("Failed to read event: {}", e))? {
            Some(line) if line.trim().is_empty() => {}
            Some(line) => {
              seq += 1;
              let host = self.clone();
              let id = seq;
              tasks.spawn(async move { host.handle_line(id, &line).await });
            }
            None => input_open = false,
          }
        }
        Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
          let reply = joined.map_err(|e| eyre!("Event task failed: {}", e))?;
          let mut line = reply.to_string();
          line.push('\n');
          output
            .write_all(line.as_bytes())
            .await
            .map_err(|e| eyre!("Failed to write reply: {}", e))?;
          output
            .flush()
            .await
            .map_err(|e| eyre!("Failed to write reply: {}", e))?;
        }
      }
    }

    info!(events = seq, "Input closed, all events handled");
    Ok(())
  }

  async fn handle_line(&self, seq: u64, line: &str) -> Value {
    let event: Event = match serde_json::from_str(line) {
      Ok(event) => event,
      Err(e) => return json!({ "seq": seq, "error": format!("Invalid event: {}", e) }),
    };

    let body = match event {
      Event::Fetch { request } => match self.fetch(request).await {
        Ok(result) => fetch_json(&result),
        Err(e) => json!({ "error": format!("{:#}", e) }),
      },
      Event::Sync { tag } => match self.sync(&tag).await {
        Ok(outcome) => sync_json(&outcome),
        Err(e) => json!({ "error": format!("{:#}", e) }),
      },
      other => match self.deliver(other).await {
        Ok(outcome) => outcome_json(&outcome),
        Err(e) => json!({ "error": format!("{:#}", e) }),
      },
    };

    let mut reply = json!({ "seq": seq });
    if let (Value::Object(reply), Value::Object(body)) = (&mut reply, body) {
      reply.extend(body);
    }
    reply
  }
}

fn response_json(response: &Response) -> Value {
  json!({
    "status": response.status,
    "headers": response.headers,
    "body": response.text(),
  })
}

fn fetch_json(result: &Result<Response, FetchError>) -> Value {
  match result {
    Ok(response) => json!({ "response": response_json(response) }),
    Err(e) => json!({ "error": e.to_string(), "offline_miss": e.is_offline_miss() }),
  }
}

fn sync_json(outcome: &SyncOutcome) -> Value {
  match outcome {
    SyncOutcome::Resolved(tag) => json!({ "sync": "resolved", "tag": tag.as_str() }),
    SyncOutcome::Ignored => json!({ "sync": "ignored" }),
  }
}

fn outcome_json(outcome: &Outcome) -> Value {
  match outcome {
    Outcome::Installed(installed) => json!({
      "installed": {
        "bucket": installed.bucket,
        "precached": installed.precached,
        "skip_waiting": installed.skip_waiting,
      }
    }),
    Outcome::Activated(activated) => json!({
      "activated": {
        "deleted": activated.deleted,
        "failed": activated.failed,
        "claim_clients": activated.claim_clients,
      }
    }),
    Outcome::Fetched(FetchOutcome::Passthrough) => json!({ "passthrough": true }),
    Outcome::Fetched(FetchOutcome::Respond(result)) => fetch_json(result),
    Outcome::Synced(outcome) => sync_json(outcome),
    Outcome::Notified(notification) => json!({ "notification": notification }),
    Outcome::Opened(url) => json!({ "opened": url.as_str() }),
  }
}

/// Notifier for a host with no display: every request ends up in the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn show<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      info!(
        title = %notification.title,
        body = %notification.body,
        tag = %notification.tag,
        require_interaction = notification.require_interaction,
        "Show notification"
      );
      Ok(())
    })
  }

  fn close<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      info!(tag = %notification.tag, "Close notification");
      Ok(())
    })
  }

  fn focus_or_open<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      info!(%url, "Open window");
      Ok(())
    })
  }
}
