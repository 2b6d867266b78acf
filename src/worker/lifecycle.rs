//! Install, activate and update of cache versions.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::registration::{Registration, VersionState};
use crate::cache::{CacheStorage, NamespaceKind, NamespaceSet};
use crate::network::{Fetcher, Request, RequestKey, Response};

/// Drives versions through `Installing -> Waiting -> Active -> Superseded`.
pub struct Lifecycle<S: CacheStorage, F: Fetcher> {
  registration: Registration,
  storage: Arc<S>,
  fetcher: Arc<F>,
  prefix: String,
  /// Static shell plus offline fallbacks
  precache: Vec<Url>,
  /// Entries older than this are pruned on activation
  max_entry_age: Option<Duration>,
}

impl<S: CacheStorage, F: Fetcher> Lifecycle<S, F> {
  pub fn new(
    registration: Registration,
    storage: Arc<S>,
    fetcher: Arc<F>,
    prefix: impl Into<String>,
    precache: Vec<Url>,
  ) -> Self {
    Self {
      registration,
      storage,
      fetcher,
      prefix: prefix.into(),
      precache,
      max_entry_age: None,
    }
  }

  /// Prune old entries from surviving namespaces on activation.
  pub fn with_max_entry_age(mut self, max_entry_age: Duration) -> Self {
    self.max_entry_age = Some(max_entry_age);
    self
  }

  pub fn namespaces(&self, version: &str) -> NamespaceSet {
    NamespaceSet::new(self.prefix.clone(), version)
  }

  pub fn registration(&self) -> &Registration {
    &self.registration
  }

  pub fn active_version(&self) -> Result<Option<String>> {
    self.registration.version_in(VersionState::Active)
  }

  /// Install `version` alongside whatever is active.
  ///
  /// The static namespace is filled all-or-nothing: every manifest entry is
  /// fetched before anything is stored. A failed install leaves the active
  /// version untouched. With no active version the install activates
  /// immediately.
  pub async fn install(&self, version: &str) -> Result<VersionState> {
    match self.registration.state_of(version)? {
      Some(state @ (VersionState::Active | VersionState::Waiting)) => {
        debug!(version, %state, "Already installed");
        return Ok(state);
      }
      _ => {}
    }

    self.registration.set_state(version, VersionState::Installing)?;
    info!(version, assets = self.precache.len(), "Installing");

    let static_ns = self.namespaces(version).name(NamespaceKind::Static);
    let existed = self.storage.list_namespaces()?.contains(&static_ns);

    if let Err(e) = self.precache_into(&static_ns).await {
      warn!(version, error = %e, "Install failed");
      if !existed {
        self.storage.delete_namespace(&static_ns)?;
      }
      self.registration.remove(version)?;
      return Err(e);
    }

    if let Some(previous) = self.registration.version_in(VersionState::Waiting)? {
      debug!(version, previous = %previous, "Replacing waiting version");
      self.registration.set_state(&previous, VersionState::Superseded)?;
    }
    self.registration.set_state(version, VersionState::Waiting)?;

    if self.active_version()?.is_none() {
      self.activate().await?;
      return Ok(VersionState::Active);
    }

    info!(version, "Installed, waiting for activation");
    Ok(VersionState::Waiting)
  }

  async fn precache_into(&self, namespace: &str) -> Result<()> {
    let requests: Vec<Request> = self.precache.iter().cloned().map(Request::get).collect();
    let results = join_all(requests.iter().map(|r| self.fetcher.fetch(r))).await;

    let mut fetched: Vec<(RequestKey, Response)> = Vec::with_capacity(requests.len());
    for (request, result) in requests.iter().zip(results) {
      let response = result.map_err(|e| eyre!("Failed to precache {}: {}", request.url, e))?;
      if !response.is_ok() {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          request.url,
          response.status
        ));
      }
      fetched.push((RequestKey::for_request(request), response));
    }

    self.storage.open_namespace(namespace)?;
    for (key, response) in &fetched {
      self.storage.put(namespace, key, response)?;
    }
    Ok(())
  }

  /// Promote the waiting version to active and evict every namespace not
  /// belonging to it. Returns the promoted version, `None` if nothing waits.
  pub async fn activate(&self) -> Result<Option<String>> {
    let Some(version) = self.registration.version_in(VersionState::Waiting)? else {
      debug!("No waiting version to activate");
      return Ok(None);
    };

    let previous = self.active_version()?;
    self
      .registration
      .promote(&version, &[VersionState::Active, VersionState::Waiting])?;

    let expected = self.namespaces(&version).expected();
    for name in self.storage.list_namespaces()? {
      if !expected.contains(&name) {
        self.storage.delete_namespace(&name)?;
        info!(namespace = %name, "Deleted stale namespace");
      }
    }

    if let Some(max_age) = self.max_entry_age {
      self.prune(&version, max_age)?;
    }

    info!(version = %version, previous = ?previous, "Activated");
    Ok(Some(version))
  }

  /// Drop entries older than `max_age` from the non-static namespaces.
  fn prune(&self, version: &str, max_age: Duration) -> Result<()> {
    let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
      debug!(version, "Entry age limit reaches past the earliest date, nothing to prune");
      return Ok(());
    };

    let set = self.namespaces(version);
    for kind in NamespaceKind::ALL {
      // The static shell is refreshed by every install
      if kind == NamespaceKind::Static {
        continue;
      }
      let pruned = self.storage.prune_older_than(&set.name(kind), cutoff)?;
      if pruned > 0 {
        info!(namespace = %set.name(kind), pruned, "Pruned old entries");
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::db::Database;
  use crate::network::fake::ScriptedFetcher;

  const ORIGIN: &str = "https://jobconnect.example.org";

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn manifest() -> Vec<Url> {
    vec![url("/"), url("/index.html"), url("/offline.html")]
  }

  fn serve_manifest(fetcher: &ScriptedFetcher) {
    for u in manifest() {
      fetcher.respond(u.as_str(), Response::new(200, u.path().to_string()));
    }
  }

  fn lifecycle() -> (Lifecycle<MemoryStorage, ScriptedFetcher>, Arc<ScriptedFetcher>) {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let lifecycle = Lifecycle::new(
      Registration::new(Database::open_in_memory().unwrap()),
      Arc::new(MemoryStorage::new()),
      Arc::clone(&fetcher),
      "jobconnect",
      manifest(),
    );
    (lifecycle, fetcher)
  }

  #[tokio::test]
  async fn test_first_install_activates_immediately() {
    let (lifecycle, fetcher) = lifecycle();
    serve_manifest(&fetcher);

    let state = lifecycle.install("v1").await.unwrap();
    assert_eq!(state, VersionState::Active);
    assert_eq!(lifecycle.active_version().unwrap().as_deref(), Some("v1"));

    let key = RequestKey::for_request(&Request::get(url("/offline.html")));
    let cached = lifecycle.storage.get("jobconnect-static-v1", &key).unwrap();
    assert!(cached.is_some());
  }

  #[tokio::test]
  async fn test_failed_install_is_all_or_nothing() {
    let (lifecycle, fetcher) = lifecycle();
    serve_manifest(&fetcher);
    fetcher.fail(url("/index.html").as_str());

    assert!(lifecycle.install("v1").await.is_err());
    assert!(lifecycle.storage.list_namespaces().unwrap().is_empty());
    assert_eq!(lifecycle.registration.state_of("v1").unwrap(), None);
  }

  #[tokio::test]
  async fn test_failed_update_keeps_old_version_active() {
    let (lifecycle, fetcher) = lifecycle();
    serve_manifest(&fetcher);
    lifecycle.install("v1").await.unwrap();

    fetcher.respond(url("/").as_str(), Response::new(500, "boom"));
    assert!(lifecycle.install("v2").await.is_err());

    assert_eq!(lifecycle.active_version().unwrap().as_deref(), Some("v1"));
    let names = lifecycle.storage.list_namespaces().unwrap();
    assert!(names.contains("jobconnect-static-v1"));
    assert!(!names.contains("jobconnect-static-v2"));
  }

  #[tokio::test]
  async fn test_update_waits_until_activated() {
    let (lifecycle, fetcher) = lifecycle();
    serve_manifest(&fetcher);
    lifecycle.install("v1").await.unwrap();

    let state = lifecycle.install("v2").await.unwrap();
    assert_eq!(state, VersionState::Waiting);
    assert_eq!(lifecycle.active_version().unwrap().as_deref(), Some("v1"));

    // Both versions' shells coexist while v2 waits
    let names = lifecycle.storage.list_namespaces().unwrap();
    assert!(names.contains("jobconnect-static-v1"));
    assert!(names.contains("jobconnect-static-v2"));
  }

  #[tokio::test]
  async fn test_activation_evicts_exactly_stale_namespaces() {
    let (lifecycle, fetcher) = lifecycle();
    serve_manifest(&fetcher);
    lifecycle.install("v1").await.unwrap();

    let storage = &lifecycle.storage;
    storage.open_namespace("jobconnect-images-v1").unwrap();
    storage.open_namespace("jobconnect-api-v1").unwrap();
    storage.open_namespace("unrelated-cache").unwrap();

    lifecycle.install("v2").await.unwrap();
    storage.open_namespace("jobconnect-images-v2").unwrap();

    assert_eq!(lifecycle.activate().await.unwrap().as_deref(), Some("v2"));

    let names: Vec<String> = storage.list_namespaces().unwrap().into_iter().collect();
    assert_eq!(
      names,
      vec![
        "jobconnect-images-v2".to_string(),
        "jobconnect-static-v2".to_string()
      ]
    );
    assert_eq!(
      lifecycle.registration.state_of("v1").unwrap(),
      Some(VersionState::Superseded)
    );
  }

  #[tokio::test]
  async fn test_activate_without_waiting_version_is_noop() {
    let (lifecycle, fetcher) = lifecycle();
    serve_manifest(&fetcher);
    lifecycle.install("v1").await.unwrap();

    assert_eq!(lifecycle.activate().await.unwrap(), None);
    assert_eq!(lifecycle.active_version().unwrap().as_deref(), Some("v1"));
  }

  #[tokio::test]
  async fn test_reinstalling_active_version_is_noop() {
    let (lifecycle, fetcher) = lifecycle();
    serve_manifest(&fetcher);
    lifecycle.install("v1").await.unwrap();
    let calls = fetcher.total_calls();

    assert_eq!(lifecycle.install("v1").await.unwrap(), VersionState::Active);
    assert_eq!(fetcher.total_calls(), calls);
  }

  #[tokio::test]
  async fn test_activation_prunes_old_entries_but_not_shell() {
    let (lifecycle, fetcher) = lifecycle();
    let lifecycle = lifecycle.with_max_entry_age(Duration::zero());
    serve_manifest(&fetcher);

    let key = RequestKey::for_request(&Request::get(url("/api/jobs")));
    lifecycle
      .storage
      .put("jobconnect-api-v1", &key, &Response::new(200, "[]"))
      .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    lifecycle.install("v1").await.unwrap();

    assert!(lifecycle.storage.get("jobconnect-api-v1", &key).unwrap().is_none());
    let shell = RequestKey::for_request(&Request::get(url("/index.html")));
    assert!(lifecycle
      .storage
      .get("jobconnect-static-v1", &shell)
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_huge_entry_age_skips_pruning() {
    let (lifecycle, fetcher) = lifecycle();
    let lifecycle = lifecycle.with_max_entry_age(Duration::try_days(4_000_000_000).unwrap());
    serve_manifest(&fetcher);

    let key = RequestKey::for_request(&Request::get(url("/api/jobs")));
    lifecycle
      .storage
      .put("jobconnect-api-v1", &key, &Response::new(200, "[]"))
      .unwrap();

    assert_eq!(lifecycle.install("v1").await.unwrap(), VersionState::Active);
    assert!(lifecycle.storage.get("jobconnect-api-v1", &key).unwrap().is_some());
  }
}
