//! Versioned cache namespaces.

use std::collections::BTreeSet;
use std::fmt;

/// Category of a cache namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NamespaceKind {
  Static,
  Images,
  Api,
  Fonts,
  Pages,
}

impl NamespaceKind {
  pub const ALL: [NamespaceKind; 5] = [
    NamespaceKind::Static,
    NamespaceKind::Images,
    NamespaceKind::Api,
    NamespaceKind::Fonts,
    NamespaceKind::Pages,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Static => "static",
      Self::Images => "images",
      Self::Api => "api",
      Self::Fonts => "fonts",
      Self::Pages => "pages",
    }
  }
}

/// Naming scheme for one version of the caching layer.
///
/// Namespaces are named `{prefix}-{kind}-{version}`, e.g. `jobconnect-images-v1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceSet {
  prefix: String,
  version: String,
}

impl NamespaceSet {
  pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      version: version.into(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn name(&self, kind: NamespaceKind) -> String {
    format!("{}-{}-{}", self.prefix, kind.as_str(), self.version)
  }

  /// The namespaces this version expects to exist once active
  pub fn expected(&self) -> BTreeSet<String> {
    NamespaceKind::ALL.iter().map(|k| self.name(*k)).collect()
  }
}

impl fmt::Display for NamespaceSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}", self.prefix, self.version)
  }
}
