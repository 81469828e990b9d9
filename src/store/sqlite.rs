//! SQLite-backed local store.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{assign_key, check_index, index_entries, record_key, Collection, Key, LocalStore, Scan};
use crate::error::{Error, Result};

/// Bump when the schema changes; `migrate` brings older files forward.
const SCHEMA_VERSION: i64 = 2;

/// How long a write waits for another handle's lock on the file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Schema for the record store.
const STORE_SCHEMA: &str = r#"
-- One row per collection, created once per schema version
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    key_path TEXT NOT NULL,
    auto_increment INTEGER NOT NULL,
    next_id INTEGER NOT NULL DEFAULT 1
);

-- Records (serialized JSON); seq preserves insertion order
CREATE TABLE IF NOT EXISTS records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    record_key TEXT NOT NULL,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (collection, record_key)
);

-- Secondary index values (non-unique)
CREATE TABLE IF NOT EXISTS record_index (
    collection TEXT NOT NULL,
    index_name TEXT NOT NULL,
    record_key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (collection, index_name, record_key)
);

CREATE INDEX IF NOT EXISTS idx_record_index_value
    ON record_index(collection, index_name, value);
"#;

/// Version 2: record leases shared by every handle on the file.
const LEASE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS leases (
    collection TEXT NOT NULL,
    record_key TEXT NOT NULL,
    holder TEXT NOT NULL,
    -- Unix milliseconds
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (collection, record_key)
);
"#;

/// Local store persisted in a SQLite file.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open or create the store at an explicit path.
  ///
  /// Any failure here is reported as `StorageUnavailable` so callers can
  /// degrade to memory-only storage.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::StorageUnavailable(format!("Failed to create data directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::StorageUnavailable(format!(
        "Failed to open store at {}: {}",
        path.display(),
        e
      ))
    })?;
    conn
      .busy_timeout(BUSY_TIMEOUT)
      .map_err(|e| Error::StorageUnavailable(format!("Failed to configure store: {}", e)))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store
      .migrate()
      .map_err(|e| Error::StorageUnavailable(format!("Failed to migrate store: {}", e)))?;

    info!(path = %path.display(), "local store opened");
    Ok(store)
  }

  /// Default database path under the user's data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::StorageUnavailable("Could not determine data directory".into()))?;

    Ok(data_dir.join("shiksha").join("offline.db"))
  }

  /// Create tables and register collections on first run or version bump.
  /// Reopening an up-to-date file changes nothing.
  fn migrate(&self) -> Result<()> {
    let mut conn = self.lock()?;

    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
      debug!(version, "store schema up to date");
      return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(STORE_SCHEMA)?;
    tx.execute_batch(LEASE_SCHEMA)?;
    if version == 1 {
      retag_keys(&tx)?;
    }
    for collection in Collection::ALL {
      tx.execute(
        "INSERT OR IGNORE INTO collections (name, key_path, auto_increment) VALUES (?, ?, ?)",
        params![
          collection.name(),
          collection.key_path(),
          collection.auto_increment()
        ],
      )?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;

    info!(from = version, to = SCHEMA_VERSION, "store schema migrated");
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Poisoned(e.to_string()))
  }
}

impl LocalStore for SqliteStore {
  fn put(&self, collection: Collection, mut record: Value) -> Result<Key> {
    let existing = record_key(collection, &record)?;
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    let key = match existing {
      Some(key) => {
        // Explicit ids keep the generator ahead of them.
        if let (true, Some(id)) = (collection.auto_increment(), key.as_id()) {
          tx.execute(
            "UPDATE collections SET next_id = MAX(next_id, ? + 1) WHERE name = ?",
            params![id, collection.name()],
          )?;
        }
        key
      }
      None => {
        let id: i64 = tx.query_row(
          "SELECT next_id FROM collections WHERE name = ?",
          params![collection.name()],
          |row| row.get(0),
        )?;
        tx.execute(
          "UPDATE collections SET next_id = ? WHERE name = ?",
          params![id + 1, collection.name()],
        )?;
        let key = Key::Id(id);
        assign_key(collection, &mut record, &key);
        key
      }
    };

    let record_key = storage_key(&key);
    let data = serde_json::to_vec(&record)?;

    tx.execute(
      "INSERT INTO records (collection, record_key, data, stored_at)
       VALUES (?, ?, ?, datetime('now'))
       ON CONFLICT (collection, record_key)
       DO UPDATE SET data = excluded.data, stored_at = excluded.stored_at",
      params![collection.name(), record_key, data],
    )?;
    write_index(&tx, collection, &record_key, &record)?;

    tx.commit()?;
    Ok(key)
  }

  fn get(&self, collection: Collection, key: &Key) -> Result<Option<Value>> {
    let conn = self.lock()?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM records WHERE collection = ? AND record_key = ?",
        params![collection.name(), storage_key(key)],
        |row| row.get(0),
      )
      .optional()?;

    data
      .map(|bytes| decode(collection, &bytes))
      .transpose()
  }

  fn get_all(&self, collection: Collection, scan: &Scan) -> Result<Vec<Value>> {
    check_index(collection, scan)?;
    let conn = self.lock()?;

    let direction = if scan.reverse { "DESC" } else { "ASC" };
    // SQLite treats a negative LIMIT as "no limit".
    let limit = scan.limit.map(|l| l as i64).unwrap_or(-1);

    let rows: Vec<Vec<u8>> = match &scan.index {
      None => {
        let sql = format!(
          "SELECT data FROM records WHERE collection = ?1 ORDER BY seq {} LIMIT ?2",
          direction
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![collection.name(), limit], |row| row.get(0))?
          .collect::<rusqlite::Result<_>>()?;
        rows
      }
      Some(index) => {
        let sql = format!(
          "SELECT r.data FROM records r
           INNER JOIN record_index i
             ON i.collection = r.collection AND i.record_key = r.record_key
           WHERE r.collection = ?1 AND i.index_name = ?2
             AND (?3 IS NULL OR i.value = ?3)
           ORDER BY i.value {dir}, r.seq {dir}
           LIMIT ?4",
          dir = direction
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            params![collection.name(), index, scan.value, limit],
            |row| row.get(0),
          )?
          .collect::<rusqlite::Result<_>>()?;
        rows
      }
    };

    rows.iter().map(|bytes| decode(collection, bytes)).collect()
  }

  fn update(&self, collection: Collection, record: Value) -> Result<bool> {
    let Some(key) = record_key(collection, &record)? else {
      return Ok(false);
    };
    let record_key = storage_key(&key);
    let data = serde_json::to_vec(&record)?;

    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    let changed = tx.execute(
      "UPDATE records SET data = ?, stored_at = datetime('now')
       WHERE collection = ? AND record_key = ?",
      params![data, collection.name(), record_key],
    )?;
    if changed == 0 {
      return Ok(false);
    }
    write_index(&tx, collection, &record_key, &record)?;

    tx.commit()?;
    Ok(true)
  }

  fn delete(&self, collection: Collection, key: &Key) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    let record_key = storage_key(key);

    tx.execute(
      "DELETE FROM records WHERE collection = ? AND record_key = ?",
      params![collection.name(), record_key],
    )?;
    tx.execute(
      "DELETE FROM record_index WHERE collection = ? AND record_key = ?",
      params![collection.name(), record_key],
    )?;

    tx.commit()?;
    Ok(())
  }

  fn clear(&self, collection: Collection) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    tx.execute(
      "DELETE FROM records WHERE collection = ?",
      params![collection.name()],
    )?;
    tx.execute(
      "DELETE FROM record_index WHERE collection = ?",
      params![collection.name()],
    )?;

    tx.commit()?;
    Ok(())
  }

  fn count(&self, collection: Collection) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM records WHERE collection = ?",
      params![collection.name()],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }

  fn acquire_lease(
    &self,
    collection: Collection,
    key: &Key,
    holder: &str,
    ttl: Duration,
  ) -> Result<bool> {
    let conn = self.lock()?;
    let now = Utc::now().timestamp_millis();
    let expires_at = now.saturating_add(ttl.as_millis().try_into().unwrap_or(i64::MAX));

    // The upsert only overwrites a lease that has already run out.
    let taken = conn.execute(
      "INSERT INTO leases (collection, record_key, holder, expires_at) VALUES (?1, ?2, ?3, ?4)
       ON CONFLICT (collection, record_key)
       DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
       WHERE leases.expires_at <= ?5",
      params![collection.name(), storage_key(key), holder, expires_at, now],
    )?;
    Ok(taken > 0)
  }

  fn release_lease(&self, collection: Collection, key: &Key, holder: &str) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(
      "DELETE FROM leases WHERE collection = ? AND record_key = ? AND holder = ?",
      params![collection.name(), storage_key(key), holder],
    )?;
    Ok(())
  }

  fn backend(&self) -> &'static str {
    "sqlite"
  }
}

/// Stored form of a key. The type tag keeps `Id(5)` and `Name("5")` apart.
fn storage_key(key: &Key) -> String {
  match key {
    Key::Id(id) => format!("i:{}", id),
    Key::Name(name) => format!("s:{}", name),
  }
}

fn write_index(
  conn: &Connection,
  collection: Collection,
  record_key: &str,
  record: &Value,
) -> Result<()> {
  conn.execute(
    "DELETE FROM record_index WHERE collection = ? AND record_key = ?",
    params![collection.name(), record_key],
  )?;
  for (index, value) in index_entries(collection, record) {
    conn.execute(
      "INSERT INTO record_index (collection, index_name, record_key, value) VALUES (?, ?, ?, ?)",
      params![collection.name(), index, record_key, value],
    )?;
  }
  Ok(())
}

/// Version 1 stored keys untagged. Re-derive each key from its record and
/// rebuild the index under the tagged form.
fn retag_keys(conn: &Connection) -> Result<()> {
  let rows: Vec<(i64, String, Vec<u8>)> = {
    let mut stmt = conn.prepare("SELECT seq, collection, data FROM records")?;
    let rows = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
      .collect::<rusqlite::Result<_>>()?;
    rows
  };

  conn.execute("DELETE FROM record_index", [])?;
  for (seq, name, data) in rows {
    let parsed = Collection::from_name(&name).and_then(|collection| {
      let record = serde_json::from_slice::<Value>(&data).ok()?;
      let key = record_key(collection, &record).ok()??;
      Some((collection, key, record))
    });
    let Some((collection, key, record)) = parsed else {
      warn!(seq, collection = %name, "dropping unreadable record during migration");
      conn.execute("DELETE FROM records WHERE seq = ?", params![seq])?;
      continue;
    };

    let tagged = storage_key(&key);
    conn.execute(
      "UPDATE records SET record_key = ? WHERE seq = ?",
      params![tagged, seq],
    )?;
    write_index(conn, collection, &tagged, &record)?;
  }
  Ok(())
}

fn decode(collection: Collection, bytes: &[u8]) -> Result<Value> {
  serde_json::from_slice(bytes).map_err(|e| Error::MalformedRecord {
    collection,
    reason: e.to_string(),
  })
}
