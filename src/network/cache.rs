//! Cache identity for intercepted requests.

use sha2::{Digest, Sha256};

use super::types::Request;

/// Canonical identity of a request inside a cache namespace.
///
/// Two requests with the same method and the same origin-qualified URL
/// (fragment removed) share one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  canonical: String,
}

impl RequestKey {
  pub fn for_request(request: &Request) -> Self {
    let mut url = request.url.clone();
    url.set_fragment(None);

    Self {
      canonical: format!("{} {}", request.method, url),
    }
  }

  /// Human readable form, e.g. `GET https://host/static/logo.png`
  pub fn as_str(&self) -> &str {
    &self.canonical
  }

  /// SHA256 of the canonical form for stable, fixed-length storage keys
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.canonical.as_bytes());
    hex::encode(hasher.finalize())
  }
}
