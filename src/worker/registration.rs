//! Persisted lifecycle state of installed versions.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::fmt;
use std::str::FromStr;

use crate::db::{format_timestamp, Database};

/// Lifecycle state of one version of the caching layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
  /// Pre-caching the static shell
  Installing,
  /// Installed, waiting for the active version to let go
  Waiting,
  /// Handling fetches
  Active,
  /// Replaced by a newer version, namespaces evicted
  Superseded,
}

impl VersionState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Installing => "installing",
      Self::Waiting => "waiting",
      Self::Active => "active",
      Self::Superseded => "superseded",
    }
  }
}

impl fmt::Display for VersionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for VersionState {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "installing" => Ok(Self::Installing),
      "waiting" => Ok(Self::Waiting),
      "active" => Ok(Self::Active),
      "superseded" => Ok(Self::Superseded),
      other => Err(eyre!("Unknown version state: {}", other)),
    }
  }
}

/// Registration table access. At most one version is active and at most
/// one is waiting at any time.
#[derive(Clone)]
pub struct Registration {
  db: Database,
}

impl Registration {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  pub fn state_of(&self, version: &str) -> Result<Option<VersionState>> {
    let state: Option<String> = self
      .db
      .conn()?
      .query_row(
        "SELECT state FROM worker_versions WHERE version = ?",
        params![version],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read state of {}: {}", version, e))?;

    state.map(|s| s.parse()).transpose()
  }

  /// The version currently in `state`, if any
  pub fn version_in(&self, state: VersionState) -> Result<Option<String>> {
    self
      .db
      .conn()?
      .query_row(
        "SELECT version FROM worker_versions WHERE state = ? ORDER BY updated_at DESC LIMIT 1",
        params![state.as_str()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {} version: {}", state, e))
  }

  pub fn set_state(&self, version: &str, state: VersionState) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO worker_versions (version, state, updated_at) VALUES (?, ?, ?)",
        params![version, state.as_str(), format_timestamp(Utc::now())],
      )
      .map_err(|e| eyre!("Failed to record {} as {}: {}", version, state, e))?;
    Ok(())
  }

  /// Forget a version whose install failed
  pub fn remove(&self, version: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "DELETE FROM worker_versions WHERE version = ?",
        params![version],
      )
      .map_err(|e| eyre!("Failed to remove {}: {}", version, e))?;
    Ok(())
  }

  /// Make `version` the only active version. Any other version in
  /// `from_states` becomes superseded, in one transaction.
  pub fn promote(&self, version: &str, from_states: &[VersionState]) -> Result<()> {
    let conn = self.db.conn()?;
    let now = format_timestamp(Utc::now());

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut result = Ok(0);
    for state in from_states {
      result = result.and_then(|_| {
        conn.execute(
          "UPDATE worker_versions SET state = ?, updated_at = ? WHERE state = ? AND version != ?",
          params![VersionState::Superseded.as_str(), now, state.as_str(), version],
        )
      });
    }
    let result = result.and_then(|_| {
      conn.execute(
        "INSERT OR REPLACE INTO worker_versions (version, state, updated_at) VALUES (?, ?, ?)",
        params![version, VersionState::Active.as_str(), now],
      )
    });

    if let Err(e) = result {
      let _ = conn.execute("ROLLBACK", []);
      return Err(eyre!("Failed to promote {}: {}", version, e));
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  /// All known versions with their state, most recently changed first
  pub fn list(&self) -> Result<Vec<(String, VersionState)>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT version, state FROM worker_versions ORDER BY updated_at DESC")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to list versions: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read version: {}", e))?;

    rows
      .into_iter()
      .map(|(version, state)| Ok((version, state.parse()?)))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn registration() -> Registration {
    Registration::new(Database::open_in_memory().unwrap())
  }

  #[test]
  fn test_unknown_version_has_no_state() {
    assert_eq!(registration().state_of("v1").unwrap(), None);
  }

  #[test]
  fn test_promote_supersedes_previous_active() {
    let reg = registration();
    reg.set_state("v1", VersionState::Active).unwrap();
    reg.set_state("v2", VersionState::Waiting).unwrap();

    reg.promote("v2", &[VersionState::Active, VersionState::Waiting]).unwrap();

    assert_eq!(reg.state_of("v1").unwrap(), Some(VersionState::Superseded));
    assert_eq!(reg.state_of("v2").unwrap(), Some(VersionState::Active));
    assert_eq!(reg.version_in(VersionState::Active).unwrap().as_deref(), Some("v2"));
    assert_eq!(reg.version_in(VersionState::Waiting).unwrap(), None);
  }

  #[test]
  fn test_state_round_trip() {
    for state in [
      VersionState::Installing,
      VersionState::Waiting,
      VersionState::Active,
      VersionState::Superseded,
    ] {
      assert_eq!(state.as_str().parse::<VersionState>().unwrap(), state);
    }
    assert!("redundant".parse::<VersionState>().is_err());
  }
}
