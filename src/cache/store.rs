//! Tier storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::fetch::FetchResponse;

/// A response snapshot read back from a partition.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: FetchResponse,
  /// When the entry was stored
  pub stored_at: DateTime<Utc>,
}

/// Trait for cache partition storage backends.
///
/// A partition is a named, versioned key-value store of request→response
/// snapshots. Exactly one partition per tier is current at any time.
pub trait TierStore: Send + Sync {
  /// Store a response snapshot under `(partition, key)`, replacing any
  /// previous entry.
  fn put(&self, partition: &str, key: &str, url: &str, response: &FetchResponse) -> Result<()>;

  /// Look up an entry by its request key.
  fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Look up an entry by its plain URL. Used for the root-document and
  /// placeholder-icon fallbacks, which must match regardless of the
  /// headers the original request carried.
  fn get_by_url(&self, partition: &str, url: &str) -> Result<Option<CachedResponse>>;

  /// Names of all partitions that currently hold entries.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Delete a partition and everything in it.
  fn drop_partition(&self, partition: &str) -> Result<()>;

  /// Number of entries in a partition.
  fn count(&self, partition: &str) -> Result<u64>;
}

/// SQLite-backed tier storage.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the given path, creating parent directories and
  /// running migrations as needed.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open tier store at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Open an in-memory store. Used in tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(TIERS_SCHEMA)
      .map_err(|e| eyre!("Failed to run tier store migrations: {}", e))?;

    Ok(())
  }

  /// Shift every entry's stored_at into the past. Test hook for TTL paths.
  #[cfg(test)]
  pub fn backdate_entries(&self, by: chrono::Duration) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let stamp = (Utc::now() - by).format("%Y-%m-%d %H:%M:%S").to_string();
    conn
      .execute("UPDATE cache_entries SET stored_at = ?", params![stamp])
      .map_err(|e| eyre!("Failed to backdate entries: {}", e))?;

    Ok(())
  }
}

/// Schema for the tier store.
const TIERS_SCHEMA: &str = r#"
-- Request→response snapshots, one row per (partition, request key)
CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_url
    ON cache_entries(partition, url);
"#;

impl TierStore for SqliteStore {
  fn put(&self, partition: &str, key: &str, url: &str, response: &FetchResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (partition, entry_key, url, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![partition, key, url, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, stored_at FROM cache_entries
         WHERE partition = ? AND entry_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare lookup: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![partition, key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    row.map(decode_row).transpose()
  }

  fn get_by_url(&self, partition: &str, url: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, stored_at FROM cache_entries
         WHERE partition = ? AND url = ?
         ORDER BY stored_at DESC, rowid DESC
         LIMIT 1",
      )
      .map_err(|e| eyre!("Failed to prepare URL lookup: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![partition, url], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    row.map(decode_row).transpose()
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT partition FROM cache_entries ORDER BY partition")
      .map_err(|e| eyre!("Failed to prepare partition listing: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn drop_partition(&self, partition: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM cache_entries WHERE partition = ?", params![partition])
      .map_err(|e| eyre!("Failed to drop partition {}: {}", partition, e))?;

    Ok(())
  }

  fn count(&self, partition: &str) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: u64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE partition = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count partition {}: {}", partition, e))?;

    Ok(count)
  }
}

fn decode_row(row: (u16, String, Vec<u8>, String)) -> Result<CachedResponse> {
  let (status, headers, body, stored_at) = row;

  let headers: BTreeMap<String, String> =
    serde_json::from_str(&headers).map_err(|e| eyre!("Failed to parse stored headers: {}", e))?;

  Ok(CachedResponse {
    response: FetchResponse {
      status,
      headers,
      body,
    },
    stored_at: parse_datetime(&stored_at)?,
  })
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
