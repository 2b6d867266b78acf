//! Durable storage for pending submissions.

use color_eyre::{eyre::eyre, Result};
use rusqlite::params;

use super::submission::PendingSubmission;
use crate::db::{format_timestamp, parse_timestamp, Database};

/// Id-keyed object store surviving restarts.
pub trait QueueStore: Send + Sync + 'static {
  /// Persist a record and return it with its assigned sequence number.
  fn add(&self, record: &PendingSubmission) -> Result<PendingSubmission>;

  /// All records in creation order.
  fn get_all(&self) -> Result<Vec<PendingSubmission>>;

  /// Remove a record. Returns whether it existed.
  fn delete(&self, id: &str) -> Result<bool>;
}

/// SQLite-backed queue store.
pub struct SqliteQueueStore {
  db: Database,
}

impl SqliteQueueStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl QueueStore for SqliteQueueStore {
  fn add(&self, record: &PendingSubmission) -> Result<PendingSubmission> {
    let conn = self.db.conn()?;
    let payload = serde_json::to_string(&record.payload)
      .map_err(|e| eyre!("Failed to serialize submission payload: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_submissions (id, payload, created_at) VALUES (?, ?, ?)",
        params![record.id, payload, format_timestamp(record.created_at)],
      )
      .map_err(|e| eyre!("Failed to store submission {}: {}", record.id, e))?;

    Ok(PendingSubmission {
      seq: conn.last_insert_rowid(),
      ..record.clone()
    })
  }

  fn get_all(&self) -> Result<Vec<PendingSubmission>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT seq, id, payload, created_at FROM pending_submissions ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(i64, String, String, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
      .map_err(|e| eyre!("Failed to query submissions: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read submission: {}", e))?;

    rows
      .into_iter()
      .map(|(seq, id, payload, created_at)| {
        let payload = serde_json::from_str(&payload)
          .map_err(|e| eyre!("Failed to deserialize submission {}: {}", id, e))?;
        Ok(PendingSubmission {
          id,
          payload,
          seq,
          created_at: parse_timestamp(&created_at)?,
        })
      })
      .collect()
  }

  fn delete(&self, id: &str) -> Result<bool> {
    let removed = self
      .db
      .conn()?
      .execute("DELETE FROM pending_submissions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete submission {}: {}", id, e))?;
    Ok(removed > 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_add_assigns_increasing_seq() {
    let store = SqliteQueueStore::new(Database::open_in_memory().unwrap());
    let a = store.add(&PendingSubmission::new(json!({"n": 1}))).unwrap();
    let b = store.add(&PendingSubmission::new(json!({"n": 2}))).unwrap();
    assert!(b.seq > a.seq);

    let ids: Vec<String> = store.get_all().unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![a.id, b.id]);
  }

  #[test]
  fn test_delete() {
    let store = SqliteQueueStore::new(Database::open_in_memory().unwrap());
    let record = store.add(&PendingSubmission::new(json!({}))).unwrap();

    assert!(store.delete(&record.id).unwrap());
    assert!(!store.delete(&record.id).unwrap());
    assert!(store.get_all().unwrap().is_empty());
  }

  #[test]
  fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    let id = {
      let store = SqliteQueueStore::new(Database::open(&path).unwrap());
      store
        .add(&PendingSubmission::new(json!({"type": "job-application", "jobId": "42"})))
        .unwrap()
        .id
    };

    let store = SqliteQueueStore::new(Database::open(&path).unwrap());
    let all = store.get_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, id);
    assert_eq!(all[0].payload["jobId"], "42");
  }
}
