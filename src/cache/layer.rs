//! Cache layer that orchestrates caching strategies with network fetching.

use color_eyre::{eyre::eyre, Report, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::traits::{CacheResult, CacheStorage};
use crate::network::{Fetcher, Request, RequestKey, Response};

/// A pre-cached asset served when both network and cache came up empty.
#[derive(Debug, Clone)]
pub struct FallbackAsset {
  pub namespace: String,
  pub key: RequestKey,
}

/// Cache layer that applies a caching strategy to one request at a time.
///
/// Handling is independent per request: no lock is held across a network
/// call, concurrent writes to the same key are last-write-wins.
pub struct CacheLayer<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  /// Background refreshes not yet awaited by `flush`
  refreshes: Arc<Mutex<JoinSet<()>>>,
}

impl<S: CacheStorage, F: Fetcher> CacheLayer<S, F> {
  pub fn new(storage: Arc<S>, fetcher: Arc<F>) -> Self {
    Self {
      storage,
      fetcher,
      refreshes: Arc::new(Mutex::new(JoinSet::new())),
    }
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn fetcher(&self) -> &Arc<F> {
    &self.fetcher
  }

  /// Cache-first strategy.
  ///
  /// 1. Cached entry present - return it without touching the network
  /// 2. Otherwise fetch, store, return
  /// 3. On network failure, serve `fallback` or propagate the failure
  pub async fn cache_first(
    &self,
    namespace: &str,
    request: &Request,
    fallback: Option<&FallbackAsset>,
  ) -> Result<CacheResult<Response>> {
    let key = RequestKey::for_request(request);

    if let Some(cached) = self.storage.get(namespace, &key)? {
      debug!(namespace, key = key.as_str(), "Cache hit");
      return Ok(CacheResult::from_cache(cached.response, cached.stored_at));
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        store_response(self.storage.as_ref(), namespace, &key, &response);
        Ok(CacheResult::from_network(response))
      }
      Err(e) => self.serve_fallback(fallback, e),
    }
  }

  /// Stale-while-revalidate strategy.
  ///
  /// A cached entry is returned immediately and refreshed by a detached
  /// task. Without a cached entry the caller waits for the network and a
  /// failure propagates.
  pub async fn stale_while_revalidate(
    &self,
    namespace: &str,
    request: &Request,
  ) -> Result<CacheResult<Response>> {
    let key = RequestKey::for_request(request);

    if let Some(cached) = self.storage.get(namespace, &key)? {
      debug!(namespace, key = key.as_str(), "Serving stale entry, revalidating");
      self.revalidate_in_background(namespace, key, request.clone());
      return Ok(CacheResult::stale(cached.response, cached.stored_at));
    }

    let response = self.fetcher.fetch(request).await?;
    store_response(self.storage.as_ref(), namespace, &key, &response);
    Ok(CacheResult::from_network(response))
  }

  /// Network-first strategy.
  ///
  /// 1. Fetch - on success store and return
  /// 2. On failure return the cached entry (offline mode)
  /// 3. Nothing cached - serve `fallback`, else propagate the failure
  pub async fn network_first(
    &self,
    namespace: &str,
    request: &Request,
    fallback: Option<&FallbackAsset>,
  ) -> Result<CacheResult<Response>> {
    let key = RequestKey::for_request(request);

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        store_response(self.storage.as_ref(), namespace, &key, &response);
        Ok(CacheResult::from_network(response))
      }
      Err(e) => {
        debug!(namespace, key = key.as_str(), error = %e, "Network failed, trying cache");
        if let Some(cached) = self.storage.get(namespace, &key)? {
          return Ok(CacheResult::offline(cached.response, cached.stored_at));
        }
        self.serve_fallback(fallback, e)
      }
    }
  }

  /// Refresh in a background task. Failures are logged and the stale entry
  /// is kept.
  fn revalidate_in_background(&self, namespace: &str, key: RequestKey, request: Request) {
    let storage = Arc::clone(&self.storage);
    let fetcher = Arc::clone(&self.fetcher);
    let namespace = namespace.to_string();

    let mut refreshes = self.refreshes();
    // Drop results of refreshes that already finished
    while refreshes.try_join_next().is_some() {}

    refreshes.spawn(async move {
      match fetcher.fetch(&request).await {
        Ok(response) => store_response(storage.as_ref(), &namespace, &key, &response),
        Err(e) => {
          warn!(namespace = %namespace, key = key.as_str(), error = %e, "Background refresh failed")
        }
      }
    });
  }

  /// Wait for every background refresh started so far.
  ///
  /// Refreshes are aborted when the runtime shuts down, so a short-lived
  /// process must flush before exiting for them to land in the cache.
  pub async fn flush(&self) {
    let mut pending = std::mem::take(&mut *self.refreshes());
    while let Some(result) = pending.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "Background refresh did not complete");
      }
    }
  }

  fn refreshes(&self) -> MutexGuard<'_, JoinSet<()>> {
    self
      .refreshes
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn serve_fallback(
    &self,
    fallback: Option<&FallbackAsset>,
    error: Report,
  ) -> Result<CacheResult<Response>> {
    let Some(asset) = fallback else {
      return Err(error);
    };

    match self.storage.get(&asset.namespace, &asset.key)? {
      Some(cached) => {
        debug!(fallback = asset.key.as_str(), "Serving offline fallback");
        Ok(CacheResult::fallback(cached.response, cached.stored_at))
      }
      None => Err(eyre!(
        "{} (offline fallback {} is not cached)",
        error,
        asset.key.as_str()
      )),
    }
  }
}

/// Store a settled network response. Only 2xx responses are kept; a storage
/// failure never fails the request that produced the response.
fn store_response<S: CacheStorage>(
  storage: &S,
  namespace: &str,
  key: &RequestKey,
  response: &Response,
) {
  if !response.is_ok() {
    debug!(namespace, key = key.as_str(), status = response.status, "Not caching non-2xx response");
    return;
  }

  if let Err(e) = storage.put(namespace, key, response) {
    warn!(namespace, key = key.as_str(), error = %e, "Failed to store response");
  }
}

impl<S: CacheStorage, F: Fetcher> Clone for CacheLayer<S, F> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      fetcher: Arc::clone(&self.fetcher),
      refreshes: Arc::clone(&self.refreshes),
    }
  }
}
