//! Push messages in, notifications out, clicks routed back to a window.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::context::WorkerContext;
use crate::http::BoxFuture;

/// Inbound push message body. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub url: Option<String>,
  pub tag: Option<String>,
  pub require_interaction: Option<bool>,
}

impl PushPayload {
  /// Parse a push body, falling back to an empty payload on anything malformed.
  pub fn parse(data: Option<&[u8]>) -> Self {
    match data {
      Some(bytes) => serde_json::from_slice(bytes).unwrap_or_else(|e| {
        debug!(error = %e, "Malformed push payload, using defaults");
        PushPayload::default()
      }),
      None => PushPayload::default(),
    }
  }
}

/// Data attached to a displayed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
  pub url: String,
}

/// A notification ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub tag: String,
  pub require_interaction: bool,
  pub data: NotificationData,
}

/// The host's notification surface.
pub trait Notifier: Send + Sync {
  fn show<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>>;

  fn close<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>>;

  /// Focus a client window already showing `url`, or open a new one.
  fn focus_or_open<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<()>>;
}

/// Fill in defaults for everything the payload left out.
pub fn build_notification(ctx: &WorkerContext, payload: PushPayload) -> Notification {
  let defaults = &ctx.notification;
  Notification {
    title: payload.title.unwrap_or_else(|| defaults.title.clone()),
    body: payload.body.unwrap_or_else(|| defaults.body.clone()),
    icon: defaults.icon.clone(),
    badge: defaults.badge.clone(),
    vibrate: defaults.vibrate.clone(),
    tag: payload.tag.unwrap_or_else(|| defaults.tag.clone()),
    require_interaction: payload.require_interaction.unwrap_or(false),
    data: NotificationData {
      url: payload.url.unwrap_or_else(|| "/".to_string()),
    },
  }
}

/// Handle a push message: parse, fill defaults, display.
pub async fn handle_push(ctx: &WorkerContext, data: Option<&[u8]>) -> Result<Notification> {
  let notification = build_notification(ctx, PushPayload::parse(data));
  ctx.notifier.show(&notification).await?;
  info!(title = %notification.title, tag = %notification.tag, "Displayed notification");
  Ok(notification)
}

/// Handle a click: close the notification and bring the app up at its URL.
pub async fn handle_click(ctx: &WorkerContext, notification: &Notification) -> Result<Url> {
  ctx.notifier.close(notification).await?;

  // A URL that doesn't resolve sends the user to the app root
  let target = ctx
    .resolve(&notification.data.url)
    .unwrap_or_else(|_| ctx.origin.clone());

  ctx.notifier.focus_or_open(&target).await?;
  info!(url = %target, "Opened window for notification click");
  Ok(target)
}
