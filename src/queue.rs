//! Durable FIFO queue of mutating requests deferred while offline.
//!
//! The SQLite store is the sole source of truth; there is no in-memory
//! mirror to diverge from it. Every mutation is a single per-row statement
//! against the auto-increment table, so an interrupted process never leaves
//! the queue half-written.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::fetch::FetchRequest;

/// A mutating request captured for later replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
  /// Durable row id; assigned on append
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<i64>,
  pub url: String,
  pub method: String,
  pub headers: BTreeMap<String, String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
  /// Epoch milliseconds at capture time
  pub timestamp: i64,
}

impl QueuedRequest {
  /// Capture a failed mutating request: method, URL, flattened headers,
  /// body text, and the current timestamp.
  pub fn capture(request: &FetchRequest) -> Self {
    Self {
      id: None,
      url: request.url.clone(),
      method: request.method.clone(),
      headers: request.headers.clone(),
      body: request.body.clone(),
      timestamp: Utc::now().timestamp_millis(),
    }
  }

  /// Rebuild the request for replay with its original method, headers, and
  /// body.
  pub fn to_request(&self) -> FetchRequest {
    FetchRequest {
      method: self.method.clone(),
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
      destination: Default::default(),
    }
  }
}

/// SQLite-backed offline write queue.
pub struct OfflineQueue {
  conn: Mutex<Connection>,
}

/// Schema for the queue store.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS offline_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body TEXT,
    queued_at INTEGER NOT NULL
);
"#;

impl OfflineQueue {
  /// Open the queue at the given path, creating parent directories and the
  /// table as needed.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue store at {}: {}", path.display(), e))?;

    let queue = Self {
      conn: Mutex::new(conn),
    };
    queue.run_migrations()?;

    Ok(queue)
  }

  /// Open an in-memory queue. Used in tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory queue: {}", e))?;

    let queue = Self {
      conn: Mutex::new(conn),
    };
    queue.run_migrations()?;

    Ok(queue)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(())
  }

  /// Append a captured request. Returns the assigned row id.
  ///
  /// The queue is a log, not a set: appending the same logical request
  /// twice produces two rows.
  pub fn append(&self, request: &QueuedRequest) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize queued headers: {}", e))?;

    conn
      .execute(
        "INSERT INTO offline_queue (url, method, headers, body, queued_at)
         VALUES (?, ?, ?, ?, ?)",
        params![request.url, request.method, headers, request.body, request.timestamp],
      )
      .map_err(|e| eyre!("Failed to append queued request: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  /// All queued requests in insertion (FIFO) order.
  pub fn list_all(&self) -> Result<Vec<QueuedRequest>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, url, method, headers, body, queued_at FROM offline_queue ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare queue listing: {}", e))?;

    let rows: Vec<(i64, String, String, String, Option<String>, i64)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list queue: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    rows
      .into_iter()
      .map(|(id, url, method, headers, body, queued_at)| {
        let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to parse queued headers: {}", e))?;
        Ok(QueuedRequest {
          id: Some(id),
          url,
          method,
          headers,
          body,
          timestamp: queued_at,
        })
      })
      .collect()
  }

  /// Remove one request by row id after a successful replay.
  pub fn remove(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM offline_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued request {}: {}", id, e))?;

    Ok(())
  }

  /// Number of queued requests.
  pub fn len(&self) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: u64 = conn
      .query_row("SELECT COUNT(*) FROM offline_queue", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count queue: {}", e))?;

    Ok(count)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn captured(url: &str, method: &str, body: Option<&str>) -> QueuedRequest {
    let mut request = FetchRequest::new(method, url).with_header("content-type", "application/json");
    request.body = body.map(String::from);
    QueuedRequest::capture(&request)
  }

  #[test]
  fn test_append_and_list_fifo() {
    let queue = OfflineQueue::open_in_memory().unwrap();

    let first = queue
      .append(&captured("https://x.test/api/outlets", "POST", Some(r#"{"name":"a"}"#)))
      .unwrap();
    let second = queue
      .append(&captured("https://x.test/api/products/7", "PUT", Some(r#"{"price":2}"#)))
      .unwrap();

    assert!(second > first);

    let all = queue.list_all().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, Some(first));
    assert_eq!(all[0].method, "POST");
    assert_eq!(all[0].url, "https://x.test/api/outlets");
    assert_eq!(all[0].body.as_deref(), Some(r#"{"name":"a"}"#));
    assert_eq!(all[1].id, Some(second));
  }

  #[test]
  fn test_duplicate_appends_are_distinct_rows() {
    let queue = OfflineQueue::open_in_memory().unwrap();
    let request = captured("https://x.test/api/visits", "POST", Some(r#"{"outlet":7}"#));

    let a = queue.append(&request).unwrap();
    let b = queue.append(&request).unwrap();

    assert_ne!(a, b);
    assert_eq!(queue.len().unwrap(), 2);
  }

  #[test]
  fn test_remove_by_id() {
    let queue = OfflineQueue::open_in_memory().unwrap();
    let a = queue.append(&captured("https://x.test/api/a", "POST", None)).unwrap();
    let b = queue.append(&captured("https://x.test/api/b", "DELETE", None)).unwrap();

    queue.remove(a).unwrap();

    let all = queue.list_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, Some(b));
    assert!(!queue.is_empty().unwrap());
  }

  #[test]
  fn test_headers_round_trip() {
    let queue = OfflineQueue::open_in_memory().unwrap();
    let request = captured("https://x.test/api/orders", "POST", Some("{}"));
    queue.append(&request).unwrap();

    let replayed = queue.list_all().unwrap().remove(0).to_request();
    assert_eq!(
      replayed.headers.get("content-type").map(String::as_str),
      Some("application/json")
    );
    assert_eq!(replayed.method, "POST");
    assert_eq!(replayed.body.as_deref(), Some("{}"));
  }
}
