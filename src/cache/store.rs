//! Cache store trait, key derivation, and the SQLite / in-memory backends.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{EngineError, Result};
use crate::http::{Request, Response};

/// A snapshotted response.
///
/// Network responses are single-use; [`CachedResponse::snapshot`] copies
/// status, headers and body into a plain value before anything is stored, and
/// [`CachedResponse::replay`] hands back a fresh copy on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
  pub url: String,
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  pub fn snapshot(url: &Url, response: &Response) -> Self {
    Self {
      url: url.to_string(),
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      cached_at: Utc::now(),
    }
  }

  /// A replayable copy of the stored response.
  pub fn replay(&self) -> Response {
    Response {
      status: self.status,
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }

  /// A replayable copy tagged so the caller can surface a stale/offline
  /// affordance.
  pub fn replay_tagged(&self) -> Response {
    self
      .replay()
      .with_header("x-from-cache", "true")
      .with_header("x-cache-date", &self.cached_at.to_rfc3339())
  }
}

/// Stable cache key for a request: SHA-256 over method + normalized URL.
pub fn request_key(request: &Request) -> String {
  let input = format!("{}:{}", request.method, normalized_url(&request.url));
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// Normalize a URL for keying: scheme, host, port, path, and the query with
/// its parameters sorted. The fragment is dropped.
pub fn normalized_url(url: &Url) -> String {
  let mut normalized = format!(
    "{}://{}",
    url.scheme(),
    url.host_str().unwrap_or_default()
  );
  if let Some(port) = url.port() {
    normalized.push(':');
    normalized.push_str(&port.to_string());
  }
  normalized.push_str(url.path());
  if let Some(query) = url.query() {
    let mut params: Vec<&str> = query.split('&').collect();
    params.sort_unstable();
    normalized.push('?');
    normalized.push_str(&params.join("&"));
  }
  normalized
}

/// Trait for tiered response storage backends.
///
/// Partition names already carry tier and version (see
/// [`CacheTier::partition`](super::CacheTier::partition)); the store itself
/// is a plain partitioned key-value surface. Per-key writes are atomic at
/// this layer.
pub trait CacheStore: Send + Sync {
  /// Insert or replace the entry for a key. At most one entry exists per
  /// (partition, key).
  fn put(&self, partition: &str, key: &str, entry: &CachedResponse) -> Result<()>;

  /// Fetch the entry for a key. A miss is `Ok(None)`, not an error.
  fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Drop a whole partition.
  fn delete_partition(&self, partition: &str) -> Result<()>;

  /// All partition names currently holding entries.
  fn partitions(&self) -> Result<Vec<String>>;
}

/// SQLite-backed cache store.
pub struct SqliteCacheStore {
  conn: Mutex<Connection>,
}

impl SqliteCacheStore {
  /// Open the store at the default location.
  pub fn open_default() -> Result<Self> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| EngineError::Storage("could not determine data directory".to_string()))?;
    Self::open(&data_dir.join("haven").join("cache.db"))
  }

  /// Open or create the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| EngineError::Storage(format!("failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| EngineError::Storage(format!("failed to open cache database: {}", e)))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    self.conn()?.execute_batch(CACHE_SCHEMA)?;
    Ok(())
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| EngineError::Storage(format!("lock poisoned: {}", e)))
  }
}

/// Schema for the response cache.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    partition TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    entry BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (partition, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_partition ON response_cache(partition);
"#;

impl CacheStore for SqliteCacheStore {
  fn put(&self, partition: &str, key: &str, entry: &CachedResponse) -> Result<()> {
    let data = serde_json::to_vec(entry)?;
    self.conn()?.execute(
      "INSERT OR REPLACE INTO response_cache (partition, request_key, url, entry, cached_at)
       VALUES (?, ?, ?, ?, ?)",
      params![
        partition,
        key,
        entry.url,
        data,
        entry.cached_at.to_rfc3339()
      ],
    )?;
    Ok(())
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT entry FROM response_cache WHERE partition = ? AND request_key = ?")?;

    let data: Option<Vec<u8>> = stmt.query_row(params![partition, key], |row| row.get(0)).ok();

    match data {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  fn delete_partition(&self, partition: &str) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM response_cache WHERE partition = ?", params![partition])?;
    Ok(())
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare("SELECT DISTINCT partition FROM response_cache")?;
    let names = stmt
      .query_map([], |row| row.get::<_, String>(0))?
      .filter_map(|r| r.ok())
      .collect();
    Ok(names)
  }
}

/// In-memory cache store for tests and hosts without persistent storage.
pub struct MemoryCacheStore {
  entries: Mutex<BTreeMap<(String, String), CachedResponse>>,
}

impl MemoryCacheStore {
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(BTreeMap::new()),
    }
  }

  fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, String), CachedResponse>>> {
    self
      .entries
      .lock()
      .map_err(|e| EngineError::Storage(format!("lock poisoned: {}", e)))
  }
}

impl Default for MemoryCacheStore {
  fn default() -> Self {
    Self::new()
  }
}

impl CacheStore for MemoryCacheStore {
  fn put(&self, partition: &str, key: &str, entry: &CachedResponse) -> Result<()> {
    self
      .entries()?
      .insert((partition.to_string(), key.to_string()), entry.clone());
    Ok(())
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>> {
    Ok(
      self
        .entries()?
        .get(&(partition.to_string(), key.to_string()))
        .cloned(),
    )
  }

  fn delete_partition(&self, partition: &str) -> Result<()> {
    self.entries()?.retain(|(p, _), _| p != partition);
    Ok(())
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let mut names: Vec<String> = self.entries()?.keys().map(|(p, _)| p.clone()).collect();
    names.dedup();
    Ok(names)
  }
}
