//! The offline agent: lifecycle, request routing, background sync and notifications.
//!
//! Handlers never reach for global state. Each one receives the shared
//! `WorkerContext` and the event, and returns a future the host must keep
//! alive until it resolves (install/activate/sync/push/click), or whose output
//! is the response to hand back (fetch).

mod context;
mod lifecycle;
mod notify;
mod router;
mod sync;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::http::{BoxFuture, Request};

pub use context::WorkerContext;
pub use lifecycle::{ActivateOutcome, InstallOutcome};
pub use notify::{build_notification, Notification, Notifier, PushPayload};
pub use router::FetchOutcome;
pub use sync::{ReplayFn, SyncHandlers, SyncOutcome, SyncTag};

/// Events the host delivers to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
  Install,
  Activate,
  Fetch {
    request: Request,
  },
  Sync {
    tag: String,
  },
  Push {
    #[serde(default)]
    data: Option<String>,
  },
  NotificationClick {
    notification: Notification,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
  Sync,
  Push,
  NotificationClick,
}

impl Event {
  pub fn kind(&self) -> EventKind {
    match self {
      Event::Install => EventKind::Install,
      Event::Activate => EventKind::Activate,
      Event::Fetch { .. } => EventKind::Fetch,
      Event::Sync { .. } => EventKind::Sync,
      Event::Push { .. } => EventKind::Push,
      Event::NotificationClick { .. } => EventKind::NotificationClick,
    }
  }
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  Installed(InstallOutcome),
  Activated(ActivateOutcome),
  Fetched(FetchOutcome),
  Synced(SyncOutcome),
  Notified(Notification),
  Opened(Url),
}

type Handler = fn(Arc<WorkerContext>, Event) -> BoxFuture<'static, Result<Outcome>>;

/// Event kind → handler, built once at startup.
pub struct DispatchTable {
  handlers: HashMap<EventKind, Handler>,
}

impl DispatchTable {
  pub fn new() -> Self {
    let mut handlers: HashMap<EventKind, Handler> = HashMap::new();
    handlers.insert(EventKind::Install, on_install);
    handlers.insert(EventKind::Activate, on_activate);
    handlers.insert(EventKind::Fetch, on_fetch);
    handlers.insert(EventKind::Sync, on_sync);
    handlers.insert(EventKind::Push, on_push);
    handlers.insert(EventKind::NotificationClick, on_notification_click);
    Self { handlers }
  }

  /// Route an event to its handler.
  pub fn dispatch(&self, ctx: Arc<WorkerContext>, event: Event) -> BoxFuture<'static, Result<Outcome>> {
    match self.handlers.get(&event.kind()) {
      Some(handler) => handler(ctx, event),
      None => {
        let kind = event.kind();
        Box::pin(async move { Err(eyre!("No handler registered for {:?} events", kind)) })
      }
    }
  }
}

impl Default for DispatchTable {
  fn default() -> Self {
    Self::new()
  }
}

fn unexpected(expected: EventKind, actual: EventKind) -> color_eyre::Report {
  eyre!("{:?} handler received a {:?} event", expected, actual)
}

fn on_install(ctx: Arc<WorkerContext>, _event: Event) -> BoxFuture<'static, Result<Outcome>> {
  Box::pin(async move { lifecycle::install(&ctx).await.map(Outcome::Installed) })
}

fn on_activate(ctx: Arc<WorkerContext>, _event: Event) -> BoxFuture<'static, Result<Outcome>> {
  Box::pin(async move { lifecycle::activate(&ctx).await.map(Outcome::Activated) })
}

fn on_fetch(ctx: Arc<WorkerContext>, event: Event) -> BoxFuture<'static, Result<Outcome>> {
  Box::pin(async move {
    let kind = event.kind();
    let Event::Fetch { request } = event else {
      return Err(unexpected(EventKind::Fetch, kind));
    };
    Ok(Outcome::Fetched(router::handle_fetch(&ctx, &request).await))
  })
}

fn on_sync(ctx: Arc<WorkerContext>, event: Event) -> BoxFuture<'static, Result<Outcome>> {
  Box::pin(async move {
    let kind = event.kind();
    let Event::Sync { tag } = event else {
      return Err(unexpected(EventKind::Sync, kind));
    };
    sync::handle_sync(&ctx, &tag).await.map(Outcome::Synced)
  })
}

fn on_push(ctx: Arc<WorkerContext>, event: Event) -> BoxFuture<'static, Result<Outcome>> {
  Box::pin(async move {
    let kind = event.kind();
    let Event::Push { data } = event else {
      return Err(unexpected(EventKind::Push, kind));
    };
    notify::handle_push(&ctx, data.as_deref().map(str::as_bytes))
      .await
      .map(Outcome::Notified)
  })
}

fn on_notification_click(
  ctx: Arc<WorkerContext>,
  event: Event,
) -> BoxFuture<'static, Result<Outcome>> {
  Box::pin(async move {
    let kind = event.kind();
    let Event::NotificationClick { notification } = event else {
      return Err(unexpected(EventKind::NotificationClick, kind));
    };
    notify::handle_click(&ctx, &notification)
      .await
      .map(Outcome::Opened)
  })
}
