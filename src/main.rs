mod app;
mod cache;
mod classify;
mod config;
mod connectivity;
mod db;
mod logging;
mod network;
mod queue;
mod worker;

use cache::{CacheStorage, MemoryStorage, SqliteStorage};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use db::Database;
use network::{Destination, HttpFetcher, Request};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use worker::{ControlMessage, Event, Outcome, ServiceWorker};

/// How long a command waits for cache refreshes it started before exiting
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "jco")]
#[command(about = "Offline caching and deferred submissions for JobConnect")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/jobconnect-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep everything in memory for this invocation
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured version, pre-caching the static shell
  Install,
  /// Promote a waiting version now (SKIP_WAITING)
  Activate,
  /// Show versions, cache namespaces and queue length
  Status,
  /// Fetch a path through the offline layer
  Fetch {
    /// Same-origin path, e.g. /api/jobs
    path: String,
    /// Treat as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Request destination
    #[arg(long, value_enum, default_value = "empty")]
    destination: Destination,
  },
  /// Queue a submission for replay
  Enqueue {
    /// JSON payload
    payload: String,
  },
  /// List queued submissions
  Pending,
  /// Drop a queued submission
  Clear { id: String },
  /// Replay queued submissions now
  Sync,
  /// Watch connectivity and replay submissions when online
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(&config::data_dir()?.join("logs"))?;

  let config = config::Config::load(args.config.as_deref())?;
  let fetcher = Arc::new(HttpFetcher::new(config.timeout())?);

  if args.ephemeral {
    let db = Database::open_in_memory()?;
    execute(&config, args.command, db, Arc::new(MemoryStorage::new()), fetcher).await
  } else {
    let db = Database::open(&config.database_path()?)?;
    let storage = Arc::new(SqliteStorage::new(db.clone()));
    execute(&config, args.command, db, storage, fetcher).await
  }
}

async fn execute<S: CacheStorage>(
  config: &config::Config,
  command: Command,
  db: Database,
  storage: Arc<S>,
  fetcher: Arc<HttpFetcher>,
) -> Result<()> {
  let worker = Arc::new(ServiceWorker::new(config, db, storage, Arc::clone(&fetcher))?);

  match command {
    Command::Install => {
      if let Outcome::Installed(state) = worker.dispatch(Event::Install).await? {
        println!("{} {}", config.version, state);
      }
    }
    Command::Activate => {
      match worker
        .dispatch(Event::Message(ControlMessage::SkipWaiting))
        .await?
      {
        Outcome::Activated(Some(version)) => println!("activated {}", version),
        _ => println!("no waiting version"),
      }
    }
    Command::Status => {
      let status = worker.status()?;
      println!("versions:");
      for (version, state) in &status.versions {
        println!("  {:<12} {}", version, state);
      }
      println!("namespaces:");
      for name in &status.namespaces {
        println!("  {}", name);
      }
      println!("pending submissions: {}", status.pending);
    }
    Command::Fetch {
      path,
      navigate,
      destination,
    } => {
      let url = config.resolve(&path)?;
      let request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url).with_destination(destination)
      };

      let Outcome::Response(result) = worker.dispatch(Event::Fetch(request)).await? else {
        return Err(eyre!("Fetch produced no response"));
      };
      let response = &result.data;
      println!(
        "{} {} ({} bytes, {})",
        response.status,
        result.source.as_str(),
        response.body.len(),
        response.content_type().unwrap_or("unknown type")
      );
      if let Some(cached_at) = result.cached_at {
        println!("cached at {}", cached_at.to_rfc3339());
      }
      if let Ok(text) = std::str::from_utf8(&response.body) {
        println!("{}", text);
      }
    }
    Command::Enqueue { payload } => {
      let payload: serde_json::Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Invalid JSON payload: {}", e))?;
      println!("{}", worker.queue().enqueue(payload)?);
    }
    Command::Pending => {
      for submission in worker.queue().pending()? {
        println!(
          "{:>4} {} {} {}",
          submission.seq,
          submission.id,
          submission.created_at.to_rfc3339(),
          submission.payload
        );
      }
    }
    Command::Clear { id } => {
      if !worker.queue().clear(&id)? {
        return Err(eyre!("No pending submission with id {}", id));
      }
      println!("cleared {}", id);
    }
    Command::Sync => {
      let tag = worker.sync_tag().to_string();
      if let Outcome::Drained(report) = worker.dispatch(Event::Sync(tag)).await? {
        println!(
          "delivered {}, still pending {}",
          report.delivered.len(),
          report.pending.len()
        );
      }
    }
    Command::Run => {
      app::App::new(config, Arc::clone(&worker), fetcher)?.run().await?;
    }
  }

  worker.flush(FLUSH_TIMEOUT).await;
  Ok(())
}
