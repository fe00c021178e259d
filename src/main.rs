mod agent;
mod cache;
mod config;
mod error;
mod host;
mod http;
mod outbox;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::agent::{
  build_notification, Event, Outcome, PushPayload, SyncHandlers, SyncOutcome, SyncTag,
  WorkerContext,
};
use crate::cache::{CacheStorage, SqliteStorage};
use crate::config::Config;
use crate::host::{Host, LogNotifier};
use crate::http::{Destination, Method, Network, Request, ReqwestNetwork};
use crate::outbox::Outbox;

#[derive(Parser, Debug)]
#[command(name = "offline-agent")]
#[command(about = "Offline caching and sync agent for the internship monitoring app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-agent/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application origin, overrides the config file
  #[arg(short, long)]
  origin: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the manifest into a fresh cache generation
  Install,
  /// Delete cache buckets from older generations
  Activate,
  /// Fetch a URL through the agent
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
    /// document, style, script, image, font or empty (guessed from the URL if omitted)
    #[arg(short, long)]
    destination: Option<String>,
  },
  /// Queue an action for background sync
  Queue {
    /// sync-reports or sync-checkins
    tag: String,
    method: String,
    url: String,
    #[arg(short, long)]
    body: Option<String>,
  },
  /// Fire a sync tag, retrying per the sync policy
  Sync { tag: String },
  /// Deliver a push message (JSON payload)
  Push { payload: Option<String> },
  /// Simulate a click on a notification pointing at URL
  Click { url: Option<String> },
  /// List cache buckets and their entries
  Buckets,
  /// Read JSON events from stdin, one per line, and answer each on stdout
  Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    let config = Config { origin, ..config };
    config.validate()?;
    config
  } else {
    config
  };

  let _guard = init_tracing(&config)?;

  let db_path = config.database_path()?;
  let storage: Arc<dyn CacheStorage> = Arc::new(SqliteStorage::open(&db_path)?);
  let outbox = Arc::new(Outbox::open(&db_path)?);
  let network: Arc<dyn Network> = Arc::new(ReqwestNetwork::new()?);

  let handlers = SyncHandlers::new(
    outbox.replay_handler(SyncTag::Reports, Arc::clone(&network)),
    outbox.replay_handler(SyncTag::Checkins, Arc::clone(&network)),
  );
  let ctx = WorkerContext::new(
    &config,
    Arc::clone(&storage),
    network,
    Arc::new(LogNotifier),
    handlers,
  )?;
  let host = Host::new(Arc::new(ctx), config.sync.clone());

  run(args.command, &host, storage.as_ref(), &outbox).await
}

async fn run(
  command: Command,
  host: &Host,
  storage: &dyn CacheStorage,
  outbox: &Outbox,
) -> Result<()> {
  match command {
    Command::Install => match host.deliver(Event::Install).await? {
      Outcome::Installed(installed) => {
        println!("Precached {} URLs into {}", installed.precached, installed.bucket);
      }
      other => return Err(eyre!("Unexpected outcome: {:?}", other)),
    },
    Command::Activate => match host.deliver(Event::Activate).await? {
      Outcome::Activated(activated) => {
        for name in &activated.deleted {
          println!("deleted {}", name);
        }
        for name in &activated.failed {
          println!("could not delete {} (will retry on next activation)", name);
        }
      }
      other => return Err(eyre!("Unexpected outcome: {:?}", other)),
    },
    Command::Fetch {
      url,
      method,
      destination,
    } => {
      let url = host.context().resolve(&url)?;
      let destination = match destination {
        Some(d) => d.parse()?,
        None => Destination::infer(&url),
      };
      let request = Request::new(method.parse::<Method>()?, url).with_destination(destination);

      let response = host.fetch(request).await??;
      println!("{}", response.status);
      println!("{}", response.text());
    }
    Command::Queue {
      tag,
      method,
      url,
      body,
    } => {
      let tag = SyncTag::parse(&tag).ok_or_else(|| {
        eyre!("Unknown sync tag '{}' (expected sync-reports or sync-checkins)", tag)
      })?;
      let url = host.context().resolve(&url)?;
      let id = outbox.enqueue(tag, method.parse()?, &url, body.as_deref().map(str::as_bytes))?;
      println!("queued #{} under {}", id, tag);
    }
    Command::Sync { tag } => match host.sync(&tag).await? {
      SyncOutcome::Resolved(tag) => println!("{} resolved", tag),
      SyncOutcome::Ignored => println!("{} is not a known sync tag, ignored", tag),
    },
    Command::Push { payload } => {
      if let Some(raw) = &payload {
        if serde_json::from_str::<PushPayload>(raw).is_err() {
          println!("payload is not valid JSON, using notification defaults");
        }
      }
      match host.deliver(Event::Push { data: payload }).await? {
        Outcome::Notified(notification) => {
          println!("{}", serde_json::to_string_pretty(&notification)?);
        }
        other => return Err(eyre!("Unexpected outcome: {:?}", other)),
      }
    }
    Command::Click { url } => {
      let payload = PushPayload {
        url,
        ..PushPayload::default()
      };
      let notification = build_notification(host.context(), payload);
      match host.deliver(Event::NotificationClick { notification }).await? {
        Outcome::Opened(url) => println!("opened {}", url),
        other => return Err(eyre!("Unexpected outcome: {:?}", other)),
      }
    }
    Command::Buckets => {
      for name in storage.bucket_names()? {
        let urls = storage.keys(&name)?;
        println!("{} ({} entries)", name, urls.len());
        for url in urls {
          println!("  {}", url);
        }
      }
    }
    Command::Serve => {
      let stdin = tokio::io::BufReader::new(tokio::io::stdin());
      host.serve(stdin, tokio::io::stdout()).await?;
    }
  }

  Ok(())
}

/// Log to a daily file in the data dir; warnings and errors also go to stderr.
fn init_tracing(config: &Config) -> Result<WorkerGuard> {
  let log_dir = config.log_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let file_appender = tracing_appender::rolling::daily(&log_dir, "offline-agent.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let filter = EnvFilter::try_from_env("OFFLINE_AGENT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(file_writer).with_ansi(false))
    .with(
      fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::WARN),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to initialise logging: {}", e))?;

  Ok(guard)
}
