//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::collections::BTreeSet;

use crate::network::{RequestKey, Response};

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub response: Response,
  /// When the response was stored
  pub stored_at: DateTime<Utc>,
}

/// Trait for namespaced cache storage backends.
///
/// Every operation is scoped to a single namespace.
pub trait CacheStorage: Send + Sync + 'static {
  /// Look up an entry. A miss is `Ok(None)`, never an error.
  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Store a response, replacing any entry with the same key.
  fn put(&self, namespace: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Create the namespace if it does not exist.
  fn open_namespace(&self, namespace: &str) -> Result<()>;

  /// Delete a namespace and all its entries. Returns whether it existed.
  fn delete_namespace(&self, namespace: &str) -> Result<bool>;

  /// Names of all existing namespaces.
  fn list_namespaces(&self) -> Result<BTreeSet<String>>;

  /// Remove entries stored before `cutoff` in the given namespace.
  fn prune_older_than(&self, namespace: &str, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh data from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Data served from the cache without touching the network.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Stale data served while a background refresh runs.
  pub fn stale(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheStale,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed, serving the cached copy.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed and nothing was cached, serving a pre-cached fallback asset.
  pub fn fallback(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Fallback,
      cached_at: Some(cached_at),
    }
  }

  /// Not intercepted, straight from the network.
  pub fn passthrough(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Passthrough,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Cache hit
  Cache,
  /// Cache hit, refresh running in the background
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
  /// Offline placeholder image or offline page
  Fallback,
  /// Request bypassed the caching layer
  Passthrough,
}

impl CacheSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::CacheStale => "cache (revalidating)",
      Self::Offline => "cache (offline)",
      Self::Fallback => "offline fallback",
      Self::Passthrough => "passthrough",
    }
  }
}
