//! Background sync: replay queued offline actions when connectivity returns.

use color_eyre::{eyre::WrapErr, Result};
use std::fmt;
use tracing::{debug, info};

use super::context::WorkerContext;
use crate::http::BoxFuture;

/// A replay function supplied by the collaborator layer.
///
/// It reads its own queued state; the coordinator passes nothing in.
pub type ReplayFn = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// The two sync tags the agent knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTag {
  /// Queued report submissions
  Reports,
  /// Queued attendance check-ins
  Checkins,
}

impl SyncTag {
  pub const ALL: [SyncTag; 2] = [SyncTag::Reports, SyncTag::Checkins];

  pub fn as_str(&self) -> &'static str {
    match self {
      SyncTag::Reports => "sync-reports",
      SyncTag::Checkins => "sync-checkins",
    }
  }

  pub fn parse(tag: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|t| t.as_str() == tag)
  }
}

impl fmt::Display for SyncTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Tag → replay function table. Both tags must have a handler.
pub struct SyncHandlers {
  reports: ReplayFn,
  checkins: ReplayFn,
}

impl SyncHandlers {
  pub fn new(reports: ReplayFn, checkins: ReplayFn) -> Self {
    Self { reports, checkins }
  }

  fn get(&self, tag: SyncTag) -> &ReplayFn {
    match tag {
      SyncTag::Reports => &self.reports,
      SyncTag::Checkins => &self.checkins,
    }
  }
}

/// How a sync event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  /// The replay handler ran to completion; the tag can be cleared
  Resolved(SyncTag),
  /// Not one of ours, nothing to do
  Ignored,
}

/// Run the replay handler for `tag`.
///
/// A failing handler fails the event so the host keeps the tag pending and
/// retries it later.
pub async fn handle_sync(ctx: &WorkerContext, tag: &str) -> Result<SyncOutcome> {
  let Some(sync_tag) = SyncTag::parse(tag) else {
    debug!(tag, "Ignoring unknown sync tag");
    return Ok(SyncOutcome::Ignored);
  };

  (ctx.sync_handlers.get(sync_tag))()
    .await
    .wrap_err_with(|| format!("Replay for sync tag {} failed", sync_tag))?;

  info!(tag = %sync_tag, "Replayed queued actions");
  Ok(SyncOutcome::Resolved(sync_tag))
}
