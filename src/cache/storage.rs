//! Cache storage implementations: SQLite for durability, memory for ephemeral use.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use super::traits::{CacheStorage, CachedResponse};
use crate::db::{format_timestamp, parse_timestamp, Database};
use crate::network::{RequestKey, Response};

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl CacheStorage for SqliteStorage {
  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM cache_entries
         WHERE namespace = ? AND key_hash = ?",
        params![namespace, key.hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key.as_str(), e))?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            headers,
            body,
          },
          stored_at: parse_timestamp(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, namespace: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self.db.conn()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = conn
      .execute(
        "INSERT OR IGNORE INTO cache_namespaces (name) VALUES (?)",
        params![namespace],
      )
      .and_then(|_| {
        conn.execute(
          "INSERT OR REPLACE INTO cache_entries
             (namespace, key_hash, request_key, status, headers, body, stored_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)",
          params![
            namespace,
            key.hash(),
            key.as_str(),
            response.status,
            headers,
            response.body,
            format_timestamp(Utc::now()),
          ],
        )
      });

    if let Err(e) = result {
      let _ = conn.execute("ROLLBACK", []);
      return Err(eyre!("Failed to store cache entry {}: {}", key.as_str(), e));
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn open_namespace(&self, namespace: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_namespaces (name) VALUES (?)",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to open namespace {}: {}", namespace, e))?;
    Ok(())
  }

  fn delete_namespace(&self, namespace: &str) -> Result<bool> {
    let conn = self.db.conn()?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE namespace = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", namespace, e))?;

    let removed = conn
      .execute(
        "DELETE FROM cache_namespaces WHERE name = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete namespace {}: {}", namespace, e))?;

    Ok(removed > 0)
  }

  fn list_namespaces(&self) -> Result<BTreeSet<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_namespaces")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<BTreeSet<String>>>()
      .map_err(|e| eyre!("Failed to read namespace name: {}", e))?;

    Ok(names)
  }

  fn prune_older_than(&self, namespace: &str, cutoff: DateTime<Utc>) -> Result<usize> {
    self
      .db
      .conn()?
      .execute(
        "DELETE FROM cache_entries WHERE namespace = ? AND stored_at < ?",
        params![namespace, format_timestamp(cutoff)],
      )
      .map_err(|e| eyre!("Failed to prune {}: {}", namespace, e))
  }
}

/// In-memory cache storage. Used when persistence is disabled and in tests.
#[derive(Default)]
pub struct MemoryStorage {
  namespaces: Mutex<BTreeMap<String, HashMap<String, CachedResponse>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, HashMap<String, CachedResponse>>>> {
    self
      .namespaces
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    Ok(
      self
        .lock()?
        .get(namespace)
        .and_then(|entries| entries.get(key.as_str()))
        .cloned(),
    )
  }

  fn put(&self, namespace: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.lock()?.entry(namespace.to_string()).or_default().insert(
      key.as_str().to_string(),
      CachedResponse {
        response: response.clone(),
        stored_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn open_namespace(&self, namespace: &str) -> Result<()> {
    self.lock()?.entry(namespace.to_string()).or_default();
    Ok(())
  }

  fn delete_namespace(&self, namespace: &str) -> Result<bool> {
    Ok(self.lock()?.remove(namespace).is_some())
  }

  fn list_namespaces(&self) -> Result<BTreeSet<String>> {
    Ok(self.lock()?.keys().cloned().collect())
  }

  fn prune_older_than(&self, namespace: &str, cutoff: DateTime<Utc>) -> Result<usize> {
    let mut namespaces = self.lock()?;
    let Some(entries) = namespaces.get_mut(namespace) else {
      return Ok(0);
    };
    let before = entries.len();
    entries.retain(|_, cached| cached.stored_at >= cutoff);
    Ok(before - entries.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::network::Request;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    let url = Url::parse("https://jobconnect.example.org")
      .unwrap()
      .join(path)
      .unwrap();
    RequestKey::for_request(&Request::get(url))
  }

  fn backends() -> Vec<Box<dyn CacheStorage>> {
    vec![
      Box::new(SqliteStorage::new(Database::open_in_memory().unwrap())),
      Box::new(MemoryStorage::new()),
    ]
  }

  #[test]
  fn test_miss_is_none() {
    for storage in backends() {
      assert!(storage.get("jobconnect-api-v1", &key("/api/jobs")).unwrap().is_none());
    }
  }

  #[test]
  fn test_put_then_get() {
    for storage in backends() {
      let response = Response::new(200, "[]").with_header("Content-Type", "application/json");
      storage.put("jobconnect-api-v1", &key("/api/jobs"), &response).unwrap();

      let cached = storage
        .get("jobconnect-api-v1", &key("/api/jobs"))
        .unwrap()
        .unwrap();
      assert_eq!(cached.response, response);
      assert_eq!(cached.response.content_type(), Some("application/json"));
    }
  }

  #[test]
  fn test_put_overwrites() {
    for storage in backends() {
      storage.put("ns", &key("/a"), &Response::new(200, "old")).unwrap();
      storage.put("ns", &key("/a"), &Response::new(200, "new")).unwrap();

      let cached = storage.get("ns", &key("/a")).unwrap().unwrap();
      assert_eq!(cached.response.body, b"new".to_vec());
    }
  }

  #[test]
  fn test_namespaces_are_isolated() {
    for storage in backends() {
      storage.put("images", &key("/logo.png"), &Response::new(200, "png")).unwrap();
      assert!(storage.get("static", &key("/logo.png")).unwrap().is_none());
    }
  }

  #[test]
  fn test_delete_namespace() {
    for storage in backends() {
      storage.put("old", &key("/a"), &Response::new(200, "a")).unwrap();
      storage.open_namespace("keep").unwrap();

      assert!(storage.delete_namespace("old").unwrap());
      assert!(!storage.delete_namespace("old").unwrap());
      assert!(storage.get("old", &key("/a")).unwrap().is_none());

      let names = storage.list_namespaces().unwrap();
      assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["keep".to_string()]);
    }
  }

  #[test]
  fn test_prune_older_than() {
    for storage in backends() {
      storage.put("ns", &key("/a"), &Response::new(200, "a")).unwrap();

      let past = Utc::now() - chrono::Duration::days(1);
      assert_eq!(storage.prune_older_than("ns", past).unwrap(), 0);

      let future = Utc::now() + chrono::Duration::seconds(1);
      assert_eq!(storage.prune_older_than("ns", future).unwrap(), 1);
      assert!(storage.get("ns", &key("/a")).unwrap().is_none());
      assert!(storage.list_namespaces().unwrap().contains("ns"));
    }
  }

  #[test]
  fn test_sqlite_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    {
      let storage = SqliteStorage::new(Database::open(&path).unwrap());
      storage.put("jobconnect-pages-v1", &key("/jobs"), &Response::new(200, "<html>")).unwrap();
    }

    let storage = SqliteStorage::new(Database::open(&path).unwrap());
    let cached = storage.get("jobconnect-pages-v1", &key("/jobs")).unwrap();
    assert!(cached.is_some());
  }
}
