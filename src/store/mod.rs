//! Durable local store for offline data.
//!
//! Records are JSON objects grouped into named collections. Every collection
//! has a key path (the field holding the primary key), optionally assigns
//! auto-increment ids, and maintains non-unique secondary indexes over
//! top-level fields. Two backends share these semantics:
//! - `SqliteStore`, persisted under the user's data directory
//! - `MemoryStore`, used for the session when SQLite cannot be opened

mod memory;
pub mod records;
mod sqlite;

use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

pub use memory::MemoryStore;
pub use records::{
  ConversationRecord, LessonRecord, ProgressRecord, ProgressUpdate, Record, SyncQueueItem,
};
pub use sqlite::SqliteStore;

/// Named collection inside the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
  Lessons,
  Conversations,
  Progress,
  SyncQueue,
}

impl Collection {
  pub const ALL: [Collection; 4] = [
    Collection::Lessons,
    Collection::Conversations,
    Collection::Progress,
    Collection::SyncQueue,
  ];

  pub fn name(self) -> &'static str {
    match self {
      Collection::Lessons => "lessons",
      Collection::Conversations => "conversations",
      Collection::Progress => "progress",
      Collection::SyncQueue => "syncQueue",
    }
  }

  /// Field of the record that holds its primary key.
  pub fn key_path(self) -> &'static str {
    match self {
      Collection::Progress => "userId",
      _ => "id",
    }
  }

  pub fn auto_increment(self) -> bool {
    matches!(self, Collection::Conversations | Collection::SyncQueue)
  }

  /// Secondary indexes; each index is named after the field it covers.
  pub fn indexes(self) -> &'static [&'static str] {
    match self {
      Collection::Lessons => &["topic", "level"],
      Collection::Conversations => &["timestamp"],
      Collection::Progress => &[],
      Collection::SyncQueue => &["type"],
    }
  }

  pub fn from_name(name: &str) -> Option<Collection> {
    Collection::ALL.into_iter().find(|c| c.name() == name)
  }

  fn has_index(self, name: &str) -> bool {
    self.indexes().contains(&name)
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Primary key of a stored record. `Id(5)` and `Name("5")` are distinct keys
/// in every backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
  Id(i64),
  Name(String),
}

impl Key {
  fn from_value(value: &Value) -> Option<Key> {
    match value {
      Value::Number(n) => n.as_i64().map(Key::Id),
      Value::String(s) => Some(Key::Name(s.clone())),
      _ => None,
    }
  }

  fn to_value(&self) -> Value {
    match self {
      Key::Id(id) => Value::from(*id),
      Key::Name(name) => Value::from(name.as_str()),
    }
  }

  pub fn as_id(&self) -> Option<i64> {
    match self {
      Key::Id(id) => Some(*id),
      Key::Name(_) => None,
    }
  }
}

impl fmt::Display for Key {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Key::Id(id) => write!(f, "{}", id),
      Key::Name(name) => f.write_str(name),
    }
  }
}

impl From<i64> for Key {
  fn from(id: i64) -> Self {
    Key::Id(id)
  }
}

impl From<&str> for Key {
  fn from(name: &str) -> Self {
    Key::Name(name.to_string())
  }
}

impl From<String> for Key {
  fn from(name: String) -> Self {
    Key::Name(name)
  }
}

/// Parameters of a `get_all` call.
///
/// Without an index, records come back in insertion order. With an index,
/// records are ordered by the indexed value and records lacking the field
/// are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
  pub index: Option<String>,
  pub value: Option<String>,
  pub limit: Option<usize>,
  pub reverse: bool,
}

impl Scan {
  pub fn all() -> Self {
    Self::default()
  }

  pub fn index(name: &str) -> Self {
    Self {
      index: Some(name.to_string()),
      ..Self::default()
    }
  }

  /// Only records whose indexed value equals `value`.
  pub fn eq(mut self, value: impl Into<String>) -> Self {
    self.value = Some(value.into());
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn reverse(mut self) -> Self {
    self.reverse = true;
    self
  }
}

/// Key/value and indexed record store with named collections.
///
/// Each operation is atomic on its own; callers must not assume that two
/// calls run as one transaction.
pub trait LocalStore: Send + Sync {
  /// Insert or replace a record, returning its key. Auto-increment
  /// collections assign the next id when the key field is absent.
  fn put(&self, collection: Collection, record: Value) -> Result<Key>;

  fn get(&self, collection: Collection, key: &Key) -> Result<Option<Value>>;

  fn get_all(&self, collection: Collection, scan: &Scan) -> Result<Vec<Value>>;

  /// Replace a record only if its key is still present. Returns `false`
  /// (and writes nothing) when another writer removed it in the meantime.
  fn update(&self, collection: Collection, record: Value) -> Result<bool>;

  /// Remove a record. Deleting a missing key is not an error.
  fn delete(&self, collection: Collection, key: &Key) -> Result<()>;

  fn clear(&self, collection: Collection) -> Result<()>;

  fn count(&self, collection: Collection) -> Result<usize>;

  /// Take an exclusive hold on one record for `holder`, valid for `ttl`.
  /// Returns `false` while another holder's lease is still live. Leases are
  /// visible to every handle on the same store, including other processes
  /// sharing the SQLite file.
  fn acquire_lease(
    &self,
    collection: Collection,
    key: &Key,
    holder: &str,
    ttl: Duration,
  ) -> Result<bool>;

  /// Give up a lease. Releasing a lease held by someone else does nothing.
  fn release_lease(&self, collection: Collection, key: &Key, holder: &str) -> Result<()>;

  /// Short backend name for logs and status output.
  fn backend(&self) -> &'static str;
}

/// Open the SQLite store, falling back to memory for this session if the
/// host refuses it.
pub fn open_store(path: Option<&Path>) -> Arc<dyn LocalStore> {
  let opened = match path {
    Some(p) => SqliteStore::open_at(p),
    None => SqliteStore::open(),
  };

  match opened {
    Ok(store) => Arc::new(store),
    Err(e) => {
      warn!(error = %e, "local storage unavailable, keeping data in memory for this session");
      Arc::new(MemoryStore::new())
    }
  }
}

/// Extract the key of a record, or `None` when the collection will assign one.
fn record_key(collection: Collection, record: &Value) -> Result<Option<Key>> {
  let object = record.as_object().ok_or_else(|| Error::MalformedRecord {
    collection,
    reason: "record is not a JSON object".to_string(),
  })?;

  match object.get(collection.key_path()).and_then(Key::from_value) {
    Some(key) => Ok(Some(key)),
    None if collection.auto_increment() => Ok(None),
    None => Err(Error::MissingKey {
      collection,
      key_path: collection.key_path(),
    }),
  }
}

/// Write an assigned key back into the record at the key path.
fn assign_key(collection: Collection, record: &mut Value, key: &Key) {
  if let Some(object) = record.as_object_mut() {
    object.insert(collection.key_path().to_string(), key.to_value());
  }
}

/// Index entries for a record; fields that are absent or null are not indexed.
fn index_entries(collection: Collection, record: &Value) -> Vec<(&'static str, String)> {
  collection
    .indexes()
    .iter()
    .filter_map(|&name| {
      let value = match record.get(name)? {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
      };
      Some((name, value))
    })
    .collect()
}

fn check_index(collection: Collection, scan: &Scan) -> Result<()> {
  match &scan.index {
    Some(index) if !collection.has_index(index) => Err(Error::UnknownIndex {
      collection,
      index: index.clone(),
    }),
    _ => Ok(()),
  }
}
