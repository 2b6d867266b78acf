//! Namespaced response caching for offline support.
//!
//! This module provides:
//! - Versioned namespaces (`static`, `images`, `api`, `fonts`, `pages`)
//! - A storage trait with SQLite and in-memory backends
//! - The three caching strategies: cache-first, stale-while-revalidate
//!   and network-first with fallback

mod layer;
mod namespace;
mod storage;
mod traits;

pub use layer::{CacheLayer, FallbackAsset};
pub use namespace::{NamespaceKind, NamespaceSet};
pub use storage::{MemoryStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, CacheStorage, CachedResponse};
