//! The offline worker: routes lifecycle, fetch, message and sync events to
//! their handlers.

mod lifecycle;
mod registration;

pub use lifecycle::Lifecycle;
pub use registration::{Registration, VersionState};

use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheResult, CacheStorage, FallbackAsset, NamespaceKind};
use crate::classify::{Classifier, Fallback, Strategy};
use crate::config::Config;
use crate::db::Database;
use crate::network::{Fetcher, Method, Request, RequestKey, Response};
use crate::queue::{DrainReport, SqliteQueueStore, SubmissionQueue};

/// Commands accepted on the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
  /// Promote the waiting version now
  SkipWaiting,
}

impl FromStr for ControlMessage {
  type Err = color_eyre::Report;

  /// Accepts the bare command or a `{"type": "..."}` message.
  fn from_str(s: &str) -> Result<Self> {
    let command = match serde_json::from_str::<serde_json::Value>(s) {
      Ok(value) => value
        .get("type")
        .and_then(|t| t.as_str())
        .map(String::from)
        .ok_or_else(|| eyre!("Control message has no type: {}", s))?,
      Err(_) => s.trim().to_string(),
    };

    match command.to_uppercase().replace('-', "_").as_str() {
      "SKIP_WAITING" => Ok(Self::SkipWaiting),
      other => Err(eyre!("Unknown control message: {}", other)),
    }
  }
}

/// Events handled by the worker
#[derive(Debug, Clone)]
pub enum Event {
  Install,
  Activate,
  Fetch(Request),
  Message(ControlMessage),
  /// Connectivity returned for the given sync tag
  Sync(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
  Message,
  Sync,
}

impl Event {
  pub fn kind(&self) -> EventKind {
    match self {
      Self::Install => EventKind::Install,
      Self::Activate => EventKind::Activate,
      Self::Fetch(_) => EventKind::Fetch,
      Self::Message(_) => EventKind::Message,
      Self::Sync(_) => EventKind::Sync,
    }
  }
}

/// What handling an event produced
#[derive(Debug)]
pub enum Outcome {
  Installed(VersionState),
  Activated(Option<String>),
  Response(CacheResult<Response>),
  Drained(DrainReport),
  Ignored,
}

/// Snapshot for status reporting
#[derive(Debug, Clone)]
pub struct Status {
  pub versions: Vec<(String, VersionState)>,
  pub namespaces: BTreeSet<String>,
  pub pending: usize,
}

pub struct ServiceWorker<S: CacheStorage, F: Fetcher> {
  origin: Url,
  version: String,
  sync_tag: String,
  classifier: Classifier,
  cache: CacheLayer<S, F>,
  lifecycle: Lifecycle<S, F>,
  queue: SubmissionQueue<SqliteQueueStore, F>,
  offline_page: RequestKey,
  placeholder_image: RequestKey,
}

impl<S: CacheStorage, F: Fetcher> ServiceWorker<S, F> {
  pub fn new(config: &Config, db: Database, storage: Arc<S>, fetcher: Arc<F>) -> Result<Self> {
    let offline_page = config.resolve(&config.fallbacks.offline_page)?;
    let placeholder_image = config.resolve(&config.fallbacks.placeholder_image)?;

    let mut precache = config
      .precache
      .iter()
      .map(|path| config.resolve(path))
      .collect::<Result<Vec<Url>>>()?;
    for fallback in [&offline_page, &placeholder_image] {
      if !precache.contains(fallback) {
        precache.push(fallback.clone());
      }
    }

    let mut lifecycle = Lifecycle::new(
      Registration::new(db.clone()),
      Arc::clone(&storage),
      Arc::clone(&fetcher),
      config.cache.prefix.clone(),
      precache,
    );
    if config.cache.auto_clear_old_cache {
      let max_age = Duration::try_days(i64::from(config.cache.max_entry_age_days))
        .ok_or_else(|| eyre!("cache.max_entry_age_days out of range"))?;
      lifecycle = lifecycle.with_max_entry_age(max_age);
    }

    let queue = SubmissionQueue::new(
      Arc::new(SqliteQueueStore::new(db)),
      Arc::clone(&fetcher),
      config.resolve(&config.queue.endpoint)?,
    );

    Ok(Self {
      origin: config.origin.clone(),
      version: config.version.clone(),
      sync_tag: config.queue.sync_tag.clone(),
      classifier: Classifier::new(&config.routes),
      cache: CacheLayer::new(storage, fetcher),
      lifecycle,
      queue,
      offline_page: RequestKey::for_request(&Request::get(offline_page)),
      placeholder_image: RequestKey::for_request(&Request::get(placeholder_image)),
    })
  }

  pub fn queue(&self) -> &SubmissionQueue<SqliteQueueStore, F> {
    &self.queue
  }

  pub fn sync_tag(&self) -> &str {
    &self.sync_tag
  }

  pub async fn dispatch(&self, event: Event) -> Result<Outcome> {
    debug!(kind = ?event.kind(), "Dispatching event");
    match event {
      Event::Install => self.on_install().await,
      Event::Activate => self.on_activate().await,
      Event::Fetch(request) => self.on_fetch(&request).await.map(Outcome::Response),
      Event::Message(message) => self.on_message(message).await,
      Event::Sync(tag) => self.on_sync(&tag).await,
    }
  }

  async fn on_install(&self) -> Result<Outcome> {
    let state = self.lifecycle.install(&self.version).await?;
    Ok(Outcome::Installed(state))
  }

  async fn on_activate(&self) -> Result<Outcome> {
    Ok(Outcome::Activated(self.lifecycle.activate().await?))
  }

  async fn on_message(&self, message: ControlMessage) -> Result<Outcome> {
    match message {
      ControlMessage::SkipWaiting => self.on_activate().await,
    }
  }

  async fn on_sync(&self, tag: &str) -> Result<Outcome> {
    if tag != self.sync_tag {
      debug!(tag, "No queue registered for sync tag");
      return Ok(Outcome::Ignored);
    }
    Ok(Outcome::Drained(self.queue.drain().await?))
  }

  /// Intercept a request from the controlled scope.
  ///
  /// Cross-origin and non-GET requests, and anything arriving before a
  /// version is active, go straight to the network.
  async fn on_fetch(&self, request: &Request) -> Result<CacheResult<Response>> {
    if !request.is_same_origin(&self.origin) || request.method != Method::Get {
      return self.passthrough(request).await;
    }

    let Some(active) = self.lifecycle.active_version()? else {
      debug!(url = %request.url, "No active version, not intercepting");
      return self.passthrough(request).await;
    };

    let namespaces = self.lifecycle.namespaces(&active);
    let category = self.classifier.classify(request);
    let namespace = namespaces.name(category.namespace());
    let fallback = match category.fallback() {
      Fallback::None => None,
      Fallback::PlaceholderImage => Some(self.placeholder_image.clone()),
      Fallback::OfflinePage => Some(self.offline_page.clone()),
    }
    .map(|key| FallbackAsset {
      namespace: namespaces.name(NamespaceKind::Static),
      key,
    });

    debug!(url = %request.url, ?category, namespace = %namespace, "Handling fetch");
    match category.strategy() {
      Strategy::CacheFirst => {
        self
          .cache
          .cache_first(&namespace, request, fallback.as_ref())
          .await
      }
      Strategy::StaleWhileRevalidate => self.cache.stale_while_revalidate(&namespace, request).await,
      Strategy::NetworkFirst => {
        self
          .cache
          .network_first(&namespace, request, fallback.as_ref())
          .await
      }
    }
  }

  async fn passthrough(&self, request: &Request) -> Result<CacheResult<Response>> {
    let response = self.cache.fetcher().fetch(request).await?;
    Ok(CacheResult::passthrough(response))
  }

  /// Wait up to `timeout` for background cache refreshes to finish.
  pub async fn flush(&self, timeout: std::time::Duration) {
    if tokio::time::timeout(timeout, self.cache.flush()).await.is_err() {
      warn!(?timeout, "Background refreshes still running, abandoning them");
    }
  }

  pub fn status(&self) -> Result<Status> {
    Ok(Status {
      versions: self.lifecycle.registration().list()?,
      namespaces: self.cache.storage().list_namespaces()?,
      pending: self.queue.pending()?.len(),
    })
  }
}
