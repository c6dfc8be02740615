//! Outbox storage trait and the SQLite / in-memory backends.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::{EngineError, Result};

use super::record::{EntityType, OutboxRecord};

/// Trait for outbox storage backends.
///
/// Appending has no network dependency and must not fail for any reason
/// short of the store itself being unavailable; that is the offline-first
/// guarantee the rest of the platform leans on.
pub trait OutboxStore: Send + Sync {
  /// Persist a new record.
  fn append(&self, record: &OutboxRecord) -> Result<()>;

  /// All unsynced records of one type, oldest first.
  fn pending(&self, entity_type: EntityType) -> Result<Vec<OutboxRecord>>;

  /// Flip a batch of records to synced. One transaction: either the whole
  /// batch is marked or none of it is. Returns how many rows changed.
  fn mark_synced(&self, ids: &[Uuid], synced_at: DateTime<Utc>) -> Result<usize>;

  /// Every record of one type, synced or not. The outbox doubles as a
  /// local audit trail.
  fn records(&self, entity_type: EntityType) -> Result<Vec<OutboxRecord>>;

  /// Unsynced records across all types.
  fn pending_count(&self) -> Result<u64>;
}

/// SQLite-backed outbox.
pub struct SqliteOutboxStore {
  conn: Mutex<Connection>,
}

impl SqliteOutboxStore {
  /// Open the outbox at the default location.
  pub fn open_default() -> Result<Self> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| EngineError::Storage("could not determine data directory".to_string()))?;
    Self::open(&data_dir.join("haven").join("outbox.db"))
  }

  /// Open or create the outbox at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| EngineError::Storage(format!("failed to create outbox directory: {}", e)))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| EngineError::Storage(format!("failed to open outbox database: {}", e)))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    self.conn()?.execute_batch(OUTBOX_SCHEMA)?;
    Ok(())
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| EngineError::Storage(format!("lock poisoned: {}", e)))
  }

  fn query_records(&self, sql: &str, entity_type: EntityType) -> Result<Vec<OutboxRecord>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
      .query_map(params![entity_type.as_str()], row_to_record)?
      .filter_map(|r| r.ok())
      .collect();
    Ok(rows)
  }
}

/// Schema for the outbox. The (entity_type, synced) index serves the pending
/// subset each drain reads.
const OUTBOX_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS outbox (
    id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox(entity_type, synced);
"#;

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxRecord> {
  let id: String = row.get(0)?;
  let entity_type: String = row.get(1)?;
  let payload: String = row.get(2)?;
  let created_at: String = row.get(3)?;
  let synced: bool = row.get(4)?;
  let synced_at: Option<String> = row.get(5)?;

  let id = Uuid::parse_str(&id).map_err(|e| conversion_error(0, e.to_string()))?;
  let entity_type = EntityType::parse(&entity_type)
    .ok_or_else(|| conversion_error(1, format!("unknown entity type {}", entity_type)))?;
  let payload =
    serde_json::from_str(&payload).map_err(|e| conversion_error(2, e.to_string()))?;

  Ok(OutboxRecord {
    id,
    entity_type,
    payload,
    created_at: parse_timestamp(&created_at),
    synced,
    synced_at: synced_at.as_deref().map(parse_timestamp),
  })
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
  rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, message.into())
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .unwrap_or_default()
}

impl OutboxStore for SqliteOutboxStore {
  fn append(&self, record: &OutboxRecord) -> Result<()> {
    let payload = serde_json::to_string(&record.payload)?;
    self.conn()?.execute(
      "INSERT INTO outbox (id, entity_type, payload, created_at, synced, synced_at)
       VALUES (?, ?, ?, ?, ?, ?)",
      params![
        record.id.to_string(),
        record.entity_type.as_str(),
        payload,
        record.created_at.to_rfc3339(),
        record.synced,
        record.synced_at.map(|t| t.to_rfc3339()),
      ],
    )?;
    Ok(())
  }

  fn pending(&self, entity_type: EntityType) -> Result<Vec<OutboxRecord>> {
    self.query_records(
      "SELECT id, entity_type, payload, created_at, synced, synced_at FROM outbox
       WHERE entity_type = ? AND synced = 0 ORDER BY created_at",
      entity_type,
    )
  }

  fn mark_synced(&self, ids: &[Uuid], synced_at: DateTime<Utc>) -> Result<usize> {
    let conn = self.conn()?;
    conn.execute("BEGIN TRANSACTION", [])?;

    let mut changed = 0;
    for id in ids {
      let result = conn.execute(
        "UPDATE outbox SET synced = 1, synced_at = ? WHERE id = ? AND synced = 0",
        params![synced_at.to_rfc3339(), id.to_string()],
      );
      match result {
        Ok(n) => changed += n,
        Err(err) => {
          let _ = conn.execute("ROLLBACK", []);
          return Err(err.into());
        }
      }
    }

    conn.execute("COMMIT", [])?;
    Ok(changed)
  }

  fn records(&self, entity_type: EntityType) -> Result<Vec<OutboxRecord>> {
    self.query_records(
      "SELECT id, entity_type, payload, created_at, synced, synced_at FROM outbox
       WHERE entity_type = ? ORDER BY created_at",
      entity_type,
    )
  }

  fn pending_count(&self) -> Result<u64> {
    let conn = self.conn()?;
    let count: u64 = conn.query_row(
      "SELECT COUNT(*) FROM outbox WHERE synced = 0",
      [],
      |row| row.get(0),
    )?;
    Ok(count)
  }
}

/// In-memory outbox for tests and hosts without persistent storage.
pub struct MemoryOutboxStore {
  records: Mutex<Vec<OutboxRecord>>,
}

impl MemoryOutboxStore {
  pub fn new() -> Self {
    Self {
      records: Mutex::new(Vec::new()),
    }
  }

  fn records_guard(&self) -> Result<std::sync::MutexGuard<'_, Vec<OutboxRecord>>> {
    self
      .records
      .lock()
      .map_err(|e| EngineError::Storage(format!("lock poisoned: {}", e)))
  }
}

impl Default for MemoryOutboxStore {
  fn default() -> Self {
    Self::new()
  }
}

impl OutboxStore for MemoryOutboxStore {
  fn append(&self, record: &OutboxRecord) -> Result<()> {
    self.records_guard()?.push(record.clone());
    Ok(())
  }

  fn pending(&self, entity_type: EntityType) -> Result<Vec<OutboxRecord>> {
    Ok(
      self
        .records_guard()?
        .iter()
        .filter(|r| r.entity_type == entity_type && !r.synced)
        .cloned()
        .collect(),
    )
  }

  fn mark_synced(&self, ids: &[Uuid], synced_at: DateTime<Utc>) -> Result<usize> {
    let mut records = self.records_guard()?;
    let mut changed = 0;
    for record in records.iter_mut() {
      if !record.synced && ids.contains(&record.id) {
        record.synced = true;
        record.synced_at = Some(synced_at);
        changed += 1;
      }
    }
    Ok(changed)
  }

  fn records(&self, entity_type: EntityType) -> Result<Vec<OutboxRecord>> {
    Ok(
      self
        .records_guard()?
        .iter()
        .filter(|r| r.entity_type == entity_type)
        .cloned()
        .collect(),
    )
  }

  fn pending_count(&self) -> Result<u64> {
    Ok(self.records_guard()?.iter().filter(|r| !r.synced).count() as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn sqlite_store() -> (tempfile::TempDir, SqliteOutboxStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteOutboxStore::open(&dir.path().join("outbox.db")).unwrap();
    (dir, store)
  }

  #[test]
  fn test_append_then_pending() {
    let (_dir, store) = sqlite_store();

    let mood = OutboxRecord::new(EntityType::Mood, json!({"score": 2}));
    let journal = OutboxRecord::new(EntityType::Journal, json!({"text": "rough day"}));
    store.append(&mood).unwrap();
    store.append(&journal).unwrap();

    let pending = store.pending(EntityType::Mood).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, mood.id);
    assert_eq!(pending[0].payload, json!({"score": 2}));
    assert!(!pending[0].synced);

    assert_eq!(store.pending_count().unwrap(), 2);
  }

  #[test]
  fn test_mark_synced_flips_batch_and_sets_timestamp() {
    let (_dir, store) = sqlite_store();

    let records: Vec<OutboxRecord> = (0..3)
      .map(|i| OutboxRecord::new(EntityType::Mood, json!({"score": i})))
      .collect();
    for record in &records {
      store.append(record).unwrap();
    }

    let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
    let now = Utc::now();
    assert_eq!(store.mark_synced(&ids, now).unwrap(), 3);

    assert!(store.pending(EntityType::Mood).unwrap().is_empty());
    for record in store.records(EntityType::Mood).unwrap() {
      assert!(record.synced);
      assert!(record.synced_at.is_some());
    }
  }

  #[test]
  fn test_mark_synced_ignores_already_synced_rows() {
    let (_dir, store) = sqlite_store();

    let record = OutboxRecord::new(EntityType::Journal, json!({}));
    store.append(&record).unwrap();

    assert_eq!(store.mark_synced(&[record.id], Utc::now()).unwrap(), 1);
    // Second pass changes nothing, so a duplicate ack is harmless
    assert_eq!(store.mark_synced(&[record.id], Utc::now()).unwrap(), 0);
  }

  #[test]
  fn test_records_keep_audit_trail() {
    let (_dir, store) = sqlite_store();

    let record = OutboxRecord::new(EntityType::CrisisInteraction, json!({"kind": "hotline"}));
    store.append(&record).unwrap();
    store.mark_synced(&[record.id], Utc::now()).unwrap();

    // Synced records stay readable; nothing is auto-deleted
    let all = store.records(EntityType::CrisisInteraction).unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].synced);
  }

  #[test]
  fn test_partitions_stay_isolated() {
    let (_dir, store) = sqlite_store();

    store
      .append(&OutboxRecord::new(EntityType::Mood, json!({})))
      .unwrap();
    store
      .append(&OutboxRecord::new(EntityType::SafetyPlan, json!({})))
      .unwrap();

    assert_eq!(store.pending(EntityType::Mood).unwrap().len(), 1);
    assert_eq!(store.pending(EntityType::SafetyPlan).unwrap().len(), 1);
    assert!(store.pending(EntityType::Journal).unwrap().is_empty());
  }

  #[test]
  fn test_memory_store_matches_sqlite_behavior() {
    let store = MemoryOutboxStore::new();

    let record = OutboxRecord::new(EntityType::Mood, json!({"score": 4}));
    store.append(&record).unwrap();
    assert_eq!(store.pending_count().unwrap(), 1);

    store.mark_synced(&[record.id], Utc::now()).unwrap();
    assert_eq!(store.pending_count().unwrap(), 0);
    assert_eq!(store.records(EntityType::Mood).unwrap().len(), 1);
  }
}
