//! Durable sketch storage on SQLite.
//!
//! Three collections: the single current-sketch slot, the sketch library keyed by
//! id, and a FIFO sync queue. The schema version lives in `PRAGMA user_version`;
//! each entry in [`MIGRATIONS`] upgrades the database by one version.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::{StoreError, StoreResult};
use crate::sketch::{Sketch, SketchRecord};

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

const CURRENT_KEY: &str = "current";

/// Schema for version 1.
const SCHEMA_V1: &str = r#"
-- Single-slot current sketch, keyed "current"
CREATE TABLE IF NOT EXISTS current_sketch (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    saved_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Sketch library
CREATE TABLE IF NOT EXISTS sketches (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    updated_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_sketches_updated ON sketches(updated_at);

-- Outbound sync queue, drained in insertion order
CREATE TABLE IF NOT EXISTS sync_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    op TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Upgrade steps, applied in order. Index `i` moves the database to version `i + 1`.
const MIGRATIONS: &[&str] = &[SCHEMA_V1];

/// Blocking durable storage operations. [`DurableStore`] runs them off the caller's task.
pub trait DurableBackend: Send + Sync + 'static {
  /// Upsert the current-sketch slot, or clear it with `None`.
  fn save_current(&self, sketch: Option<&Sketch>) -> StoreResult<()>;

  fn load_current(&self) -> StoreResult<Option<Sketch>>;

  /// Upsert a library record. The record must carry an id.
  fn save_sketch(&self, record: &SketchRecord) -> StoreResult<()>;

  /// All library records, most recently updated first.
  fn get_all_sketches(&self) -> StoreResult<Vec<SketchRecord>>;

  fn get_sketch(&self, id: &str) -> StoreResult<Option<SketchRecord>>;

  fn delete_sketch(&self, id: &str) -> StoreResult<()>;

  /// Append an opaque operation to the sync queue.
  fn enqueue_sync(&self, op: &Value) -> StoreResult<()>;

  /// Read every queued operation in FIFO order and clear the queue.
  fn drain_sync_queue(&self) -> StoreResult<Vec<Value>>;
}

/// SQLite-based durable backend.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
  StoreError::StorageUnavailable(format!("Lock poisoned: {}", e))
}

impl SqliteBackend {
  /// Open (creating on first use) the database at `path`.
  pub fn open(path: &Path) -> StoreResult<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreError::StorageUnavailable(format!("Failed to create store directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      StoreError::StorageUnavailable(format!(
        "Failed to open durable store at {}: {}",
        path.display(),
        e
      ))
    })?;
    Self::from_connection(conn)
  }

  /// Non-persistent database, for tests and throwaway sessions.
  pub fn in_memory() -> StoreResult<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| StoreError::StorageUnavailable(format!("Failed to open memory store: {}", e)))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> StoreResult<Self> {
    run_migrations(&conn)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  pub fn schema_version(&self) -> StoreResult<i64> {
    let conn = self.conn.lock().map_err(poisoned)?;
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
  }
}

fn run_migrations(conn: &Connection) -> StoreResult<()> {
  let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
  if version > SCHEMA_VERSION {
    return Err(StoreError::StorageUnavailable(format!(
      "Durable store schema v{} is newer than supported v{}",
      version, SCHEMA_VERSION
    )));
  }

  for (index, step) in MIGRATIONS.iter().enumerate().skip(version.max(0) as usize) {
    let target = index as i64 + 1;
    conn.execute_batch(step).map_err(|e| {
      StoreError::StorageUnavailable(format!("Failed to migrate to v{}: {}", target, e))
    })?;
    conn.pragma_update(None, "user_version", target)?;
    debug!("Durable store migrated to schema v{}", target);
  }
  Ok(())
}

impl DurableBackend for SqliteBackend {
  fn save_current(&self, sketch: Option<&Sketch>) -> StoreResult<()> {
    let conn = self.conn.lock().map_err(poisoned)?;
    match sketch {
      Some(sketch) => {
        let data = serde_json::to_string(sketch)?;
        conn.execute(
          "INSERT OR REPLACE INTO current_sketch (key, data, saved_at)
           VALUES (?, ?, datetime('now'))",
          params![CURRENT_KEY, data],
        )?;
      }
      None => {
        conn.execute(
          "DELETE FROM current_sketch WHERE key = ?",
          params![CURRENT_KEY],
        )?;
      }
    }
    Ok(())
  }

  fn load_current(&self) -> StoreResult<Option<Sketch>> {
    let conn = self.conn.lock().map_err(poisoned)?;
    let data: Option<String> = conn
      .query_row(
        "SELECT data FROM current_sketch WHERE key = ?",
        params![CURRENT_KEY],
        |row| row.get(0),
      )
      .optional()?;
    match data {
      Some(data) => Ok(Some(serde_json::from_str(&data)?)),
      None => Ok(None),
    }
  }

  fn save_sketch(&self, record: &SketchRecord) -> StoreResult<()> {
    if record.id.is_empty() {
      return Err(StoreError::invalid("sketch record has no id"));
    }
    let data = serde_json::to_string(record)?;
    let conn = self.conn.lock().map_err(poisoned)?;
    conn.execute(
      "INSERT OR REPLACE INTO sketches (id, data, updated_at) VALUES (?, ?, ?)",
      params![record.id, data, record.updated_at],
    )?;
    Ok(())
  }

  fn get_all_sketches(&self) -> StoreResult<Vec<SketchRecord>> {
    let conn = self.conn.lock().map_err(poisoned)?;
    let mut stmt =
      conn.prepare("SELECT id, data FROM sketches ORDER BY updated_at DESC, id ASC")?;
    let rows: Vec<(String, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
      .filter_map(|r| match r {
        Ok(row) => Some(row),
        Err(e) => {
          warn!("Skipping unreadable sketch row: {}", e);
          None
        }
      })
      .collect();

    let records = rows
      .into_iter()
      .filter_map(|(id, data)| match serde_json::from_str(&data) {
        Ok(record) => Some(record),
        Err(e) => {
          warn!("Skipping unreadable sketch {}: {}", id, e);
          None
        }
      })
      .collect();
    Ok(records)
  }

  fn get_sketch(&self, id: &str) -> StoreResult<Option<SketchRecord>> {
    let conn = self.conn.lock().map_err(poisoned)?;
    let data: Option<String> = conn
      .query_row(
        "SELECT data FROM sketches WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .optional()?;
    match data {
      Some(data) => Ok(Some(serde_json::from_str(&data)?)),
      None => Ok(None),
    }
  }

  fn delete_sketch(&self, id: &str) -> StoreResult<()> {
    let conn = self.conn.lock().map_err(poisoned)?;
    conn.execute("DELETE FROM sketches WHERE id = ?", params![id])?;
    Ok(())
  }

  fn enqueue_sync(&self, op: &Value) -> StoreResult<()> {
    let data = serde_json::to_string(op)?;
    let conn = self.conn.lock().map_err(poisoned)?;
    conn.execute("INSERT INTO sync_queue (op) VALUES (?)", params![data])?;
    Ok(())
  }

  fn drain_sync_queue(&self) -> StoreResult<Vec<Value>> {
    let mut conn = self.conn.lock().map_err(poisoned)?;
    let tx = conn.transaction()?;
    let ops = {
      let mut stmt = tx.prepare("SELECT seq, op FROM sync_queue ORDER BY seq")?;
      let rows: Vec<(i64, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;
      rows
        .into_iter()
        .filter_map(|(seq, op)| match serde_json::from_str(&op) {
          Ok(value) => Some(value),
          Err(e) => {
            warn!("Dropping unreadable sync op #{}: {}", seq, e);
            None
          }
        })
        .collect()
    };
    tx.execute("DELETE FROM sync_queue", [])?;
    tx.commit()?;
    Ok(ops)
  }
}

/// Async handle over a [`DurableBackend`]. Every call runs on the blocking pool, so
/// awaiting it never stalls the runtime. Cloning shares the backend.
#[derive(Clone)]
pub struct DurableStore {
  backend: Arc<dyn DurableBackend>,
}

impl std::fmt::Debug for DurableStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DurableStore").finish_non_exhaustive()
  }
}

impl DurableStore {
  /// Open the SQLite store at `path`. Fails with [`StoreError::StorageUnavailable`]
  /// when the database cannot be opened or migrated.
  pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
    let path = path.as_ref().to_path_buf();
    let backend = tokio::task::spawn_blocking(move || SqliteBackend::open(&path))
      .await
      .map_err(|e| StoreError::TaskJoin(e.to_string()))??;
    Ok(Self::with_backend(Arc::new(backend)))
  }

  pub fn in_memory() -> StoreResult<Self> {
    Ok(Self::with_backend(Arc::new(SqliteBackend::in_memory()?)))
  }

  pub fn with_backend(backend: Arc<dyn DurableBackend>) -> Self {
    Self { backend }
  }

  async fn run<T, F>(&self, f: F) -> StoreResult<T>
  where
    T: Send + 'static,
    F: FnOnce(&dyn DurableBackend) -> StoreResult<T> + Send + 'static,
  {
    let backend = Arc::clone(&self.backend);
    tokio::task::spawn_blocking(move || f(backend.as_ref()))
      .await
      .map_err(|e| StoreError::TaskJoin(e.to_string()))?
  }

  pub async fn save_current(&self, sketch: Option<Sketch>) -> StoreResult<()> {
    self.run(move |b| b.save_current(sketch.as_ref())).await
  }

  pub async fn load_current(&self) -> StoreResult<Option<Sketch>> {
    self.run(|b| b.load_current()).await
  }

  pub async fn save_sketch(&self, record: SketchRecord) -> StoreResult<()> {
    if record.id.is_empty() {
      return Err(StoreError::invalid("sketch record has no id"));
    }
    self.run(move |b| b.save_sketch(&record)).await
  }

  pub async fn get_all_sketches(&self) -> StoreResult<Vec<SketchRecord>> {
    self.run(|b| b.get_all_sketches()).await
  }

  pub async fn get_sketch(&self, id: &str) -> StoreResult<Option<SketchRecord>> {
    let id = id.to_string();
    self.run(move |b| b.get_sketch(&id)).await
  }

  pub async fn delete_sketch(&self, id: &str) -> StoreResult<()> {
    let id = id.to_string();
    self.run(move |b| b.delete_sketch(&id)).await
  }

  pub async fn enqueue_sync(&self, op: Value) -> StoreResult<()> {
    self.run(move |b| b.enqueue_sync(&op)).await
  }

  pub async fn drain_sync_queue(&self) -> StoreResult<Vec<Value>> {
    self.run(|b| b.drain_sync_queue()).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn record(id: &str, updated_at: &str) -> SketchRecord {
    let mut record = SketchRecord::from_sketch(&Sketch::new("2024-01-01"), id.into(), updated_at);
    record.name = Some(format!("name-{}", id));
    record
  }

  #[test]
  fn test_current_slot_upsert_and_clear() {
    let backend = SqliteBackend::in_memory().unwrap();
    assert_eq!(backend.load_current().unwrap(), None);

    let mut sketch = Sketch::new("2024-01-01");
    backend.save_current(Some(&sketch)).unwrap();
    sketch.next_node_id = 9;
    backend.save_current(Some(&sketch)).unwrap();
    assert_eq!(backend.load_current().unwrap(), Some(sketch));

    backend.save_current(None).unwrap();
    backend.save_current(None).unwrap();
    assert_eq!(backend.load_current().unwrap(), None);
  }

  #[test]
  fn test_unreadable_rows_are_skipped() {
    let backend = SqliteBackend::in_memory().unwrap();
    backend.save_sketch(&record("sk_ok", "2024-01-02")).unwrap();
    {
      let conn = backend.conn.lock().unwrap();
      conn
        .execute(
          "INSERT INTO sketches (id, data, updated_at) VALUES ('sk_blob', X'00FF', '2024-01-03')",
          [],
        )
        .unwrap();
      conn
        .execute(
          "INSERT INTO sketches (id, data, updated_at) VALUES ('sk_bad', '{', '2024-01-04')",
          [],
        )
        .unwrap();
    }

    let ids: Vec<String> = backend
      .get_all_sketches()
      .unwrap()
      .into_iter()
      .map(|r| r.id)
      .collect();
    assert_eq!(ids, vec!["sk_ok".to_string()]);
  }

  #[test]
  fn test_save_sketch_requires_id() {
    let backend = SqliteBackend::in_memory().unwrap();
    let err = backend.save_sketch(&record("", "2024-01-01")).unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
  }

  #[test]
  fn test_library_crud_and_ordering() {
    let backend = SqliteBackend::in_memory().unwrap();
    backend.save_sketch(&record("sk_a", "2024-01-01T00:00:00.000Z")).unwrap();
    backend.save_sketch(&record("sk_b", "2024-01-03T00:00:00.000Z")).unwrap();
    backend.save_sketch(&record("sk_c", "2024-01-02T00:00:00.000Z")).unwrap();

    let ids: Vec<String> = backend
      .get_all_sketches()
      .unwrap()
      .into_iter()
      .map(|r| r.id)
      .collect();
    assert_eq!(ids, vec!["sk_b", "sk_c", "sk_a"]);

    let got = backend.get_sketch("sk_c").unwrap().unwrap();
    assert_eq!(got.name.as_deref(), Some("name-sk_c"));

    backend.delete_sketch("sk_c").unwrap();
    assert_eq!(backend.get_sketch("sk_c").unwrap(), None);
    assert_eq!(backend.get_all_sketches().unwrap().len(), 2);
  }

  #[test]
  fn test_corrupt_library_row_is_skipped() {
    let backend = SqliteBackend::in_memory().unwrap();
    backend.save_sketch(&record("sk_a", "2024-01-01")).unwrap();
    {
      let conn = backend.conn.lock().unwrap();
      conn
        .execute(
          "INSERT INTO sketches (id, data, updated_at) VALUES ('bad', '{oops', '2030')",
          [],
        )
        .unwrap();
    }
    let all = backend.get_all_sketches().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "sk_a");
  }

  #[test]
  fn test_sync_queue_is_fifo_and_drained_once() {
    let backend = SqliteBackend::in_memory().unwrap();
    for n in 0..3 {
      backend.enqueue_sync(&json!({"op": "save", "n": n})).unwrap();
    }
    let drained = backend.drain_sync_queue().unwrap();
    let order: Vec<i64> = drained.iter().map(|v| v["n"].as_i64().unwrap()).collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert!(backend.drain_sync_queue().unwrap().is_empty());
  }

  #[test]
  fn test_reopen_keeps_data_and_schema_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("sketches.db");
    {
      let backend = SqliteBackend::open(&path).unwrap();
      backend.save_sketch(&record("sk_a", "2024-01-01")).unwrap();
    }
    let backend = SqliteBackend::open(&path).unwrap();
    assert_eq!(backend.schema_version().unwrap(), SCHEMA_VERSION);
    assert_eq!(backend.get_all_sketches().unwrap().len(), 1);
  }

  #[test]
  fn test_newer_schema_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");
    {
      let conn = Connection::open(&path).unwrap();
      conn
        .pragma_update(None, "user_version", SCHEMA_VERSION + 1)
        .unwrap();
    }
    assert!(matches!(
      SqliteBackend::open(&path),
      Err(StoreError::StorageUnavailable(_))
    ));
  }

  #[tokio::test]
  async fn test_async_handle_round_trip() {
    let store = DurableStore::in_memory().unwrap();
    store
      .save_sketch(record("sk_a", "2024-01-01"))
      .await
      .unwrap();
    store
      .save_current(Some(Sketch::new("2024-02-02")))
      .await
      .unwrap();

    assert_eq!(store.get_all_sketches().await.unwrap().len(), 1);
    assert!(store.get_sketch("sk_a").await.unwrap().is_some());
    assert_eq!(
      store
        .load_current()
        .await
        .unwrap()
        .and_then(|s| s.creation_date),
      Some("2024-02-02".to_string())
    );

    store.delete_sketch("sk_a").await.unwrap();
    assert!(store.get_all_sketches().await.unwrap().is_empty());
    assert!(matches!(
      store.save_sketch(record("", "x")).await,
      Err(StoreError::InvalidArgument(_))
    ));
  }

  #[tokio::test]
  async fn test_open_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = DurableStore::open(dir.path().join("graph.db")).await.unwrap();
    store.enqueue_sync(json!({"op": 1})).await.unwrap();
    assert_eq!(store.drain_sync_queue().await.unwrap(), vec![json!({"op": 1})]);
  }
}
