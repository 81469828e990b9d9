//! In-memory local store, used when the durable store cannot be opened.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{assign_key, check_index, index_entries, record_key, Collection, Key, LocalStore, Scan};
use crate::error::{Error, Result};

#[derive(Default)]
struct Table {
  /// Records in insertion order; replacing a record keeps its slot.
  rows: Vec<(Key, Value)>,
  next_id: i64,
}

/// (holder, expiry) per leased record
type Leases = HashMap<(Collection, Key), (String, Instant)>;

/// Session-only store with the same semantics as `SqliteStore`.
pub struct MemoryStore {
  tables: Mutex<HashMap<Collection, Table>>,
  leases: Mutex<Leases>,
}

impl MemoryStore {
  pub fn new() -> Self {
    let tables = Collection::ALL
      .into_iter()
      .map(|c| (c, Table { rows: Vec::new(), next_id: 1 }))
      .collect();
    Self {
      tables: Mutex::new(tables),
      leases: Mutex::new(HashMap::new()),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, HashMap<Collection, Table>>> {
    self
      .tables
      .lock()
      .map_err(|e| Error::Poisoned(e.to_string()))
  }

  fn lock_leases(&self) -> Result<MutexGuard<'_, Leases>> {
    self
      .leases
      .lock()
      .map_err(|e| Error::Poisoned(e.to_string()))
  }
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

impl LocalStore for MemoryStore {
  fn put(&self, collection: Collection, mut record: Value) -> Result<Key> {
    let existing = record_key(collection, &record)?;
    let mut tables = self.lock()?;
    let table = tables.entry(collection).or_default();

    let key = match existing {
      Some(key) => {
        if let (true, Some(id)) = (collection.auto_increment(), key.as_id()) {
          table.next_id = table.next_id.max(id + 1);
        }
        key
      }
      None => {
        let key = Key::Id(table.next_id.max(1));
        table.next_id = key.as_id().unwrap_or(0) + 1;
        assign_key(collection, &mut record, &key);
        key
      }
    };

    match table.rows.iter_mut().find(|(k, _)| *k == key) {
      Some(slot) => slot.1 = record,
      None => table.rows.push((key.clone(), record)),
    }
    Ok(key)
  }

  fn get(&self, collection: Collection, key: &Key) -> Result<Option<Value>> {
    let tables = self.lock()?;
    Ok(
      tables
        .get(&collection)
        .and_then(|t| t.rows.iter().find(|(k, _)| k == key))
        .map(|(_, v)| v.clone()),
    )
  }

  fn get_all(&self, collection: Collection, scan: &Scan) -> Result<Vec<Value>> {
    check_index(collection, scan)?;
    let tables = self.lock()?;
    let Some(table) = tables.get(&collection) else {
      return Ok(Vec::new());
    };

    let mut records: Vec<Value> = match &scan.index {
      None => table.rows.iter().map(|(_, v)| v.clone()).collect(),
      Some(index) => {
        // (indexed value, insertion position, record)
        let mut hits: Vec<(String, usize, &Value)> = table
          .rows
          .iter()
          .enumerate()
          .filter_map(|(pos, (_, record))| {
            let (_, value) = index_entries(collection, record)
              .into_iter()
              .find(|(name, _)| *name == index.as_str())?;
            match &scan.value {
              Some(wanted) if *wanted != value => None,
              _ => Some((value, pos, record)),
            }
          })
          .collect();
        hits.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        hits.into_iter().map(|(_, _, v)| v.clone()).collect()
      }
    };

    if scan.reverse {
      records.reverse();
    }
    if let Some(limit) = scan.limit {
      records.truncate(limit);
    }
    Ok(records)
  }

  fn update(&self, collection: Collection, record: Value) -> Result<bool> {
    let Some(key) = record_key(collection, &record)? else {
      return Ok(false);
    };
    let mut tables = self.lock()?;
    let slot = tables
      .get_mut(&collection)
      .and_then(|t| t.rows.iter_mut().find(|(k, _)| *k == key));
    match slot {
      Some(slot) => {
        slot.1 = record;
        Ok(true)
      }
      None => Ok(false),
    }
  }

  fn delete(&self, collection: Collection, key: &Key) -> Result<()> {
    let mut tables = self.lock()?;
    if let Some(table) = tables.get_mut(&collection) {
      table.rows.retain(|(k, _)| k != key);
    }
    Ok(())
  }

  fn clear(&self, collection: Collection) -> Result<()> {
    let mut tables = self.lock()?;
    if let Some(table) = tables.get_mut(&collection) {
      table.rows.clear();
    }
    Ok(())
  }

  fn count(&self, collection: Collection) -> Result<usize> {
    let tables = self.lock()?;
    Ok(tables.get(&collection).map(|t| t.rows.len()).unwrap_or(0))
  }

  fn acquire_lease(
    &self,
    collection: Collection,
    key: &Key,
    holder: &str,
    ttl: Duration,
  ) -> Result<bool> {
    let mut leases = self.lock_leases()?;
    let now = Instant::now();
    let entry = (collection, key.clone());
    if let Some((_, expires_at)) = leases.get(&entry) {
      if *expires_at > now {
        return Ok(false);
      }
    }
    leases.insert(entry, (holder.to_string(), now + ttl));
    Ok(true)
  }

  fn release_lease(&self, collection: Collection, key: &Key, holder: &str) -> Result<()> {
    let mut leases = self.lock_leases()?;
    let entry = (collection, key.clone());
    if leases.get(&entry).is_some_and(|(owner, _)| owner == holder) {
      leases.remove(&entry);
    }
    Ok(())
  }

  fn backend(&self) -> &'static str {
    "memory"
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_index_scan_filters_by_value() {
    let store = MemoryStore::new();
    store
      .put(Collection::Lessons, json!({"id": "a", "topic": "addition", "level": "beginner"}))
      .unwrap();
    store
      .put(Collection::Lessons, json!({"id": "b", "topic": "division", "level": "beginner"}))
      .unwrap();
    store
      .put(Collection::Lessons, json!({"id": "c", "topic": "addition", "level": "advanced"}))
      .unwrap();

    let addition = store
      .get_all(Collection::Lessons, &Scan::index("topic").eq("addition"))
      .unwrap();
    let ids: Vec<_> = addition.iter().map(|l| l["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["a", "c"]);
  }

  #[test]
  fn test_explicit_id_advances_generator() {
    let store = MemoryStore::new();
    store
      .put(Collection::Conversations, json!({"id": 10, "timestamp": "t"}))
      .unwrap();
    let key = store
      .put(Collection::Conversations, json!({"timestamp": "u"}))
      .unwrap();
    assert_eq!(key, Key::Id(11));
  }

  #[test]
  fn test_replace_keeps_position() {
    let store = MemoryStore::new();
    let first = store.put(Collection::SyncQueue, json!({"type": "a"})).unwrap();
    store.put(Collection::SyncQueue, json!({"type": "b"})).unwrap();
    store
      .put(Collection::SyncQueue, json!({"id": first.as_id(), "type": "a2"}))
      .unwrap();

    let all = store.get_all(Collection::SyncQueue, &Scan::all()).unwrap();
    assert_eq!(all[0]["type"], "a2");
    assert_eq!(all[1]["type"], "b");
  }

  #[test]
  fn test_update_skips_missing_record() {
    let store = MemoryStore::new();
    let key = store.put(Collection::SyncQueue, json!({"type": "a"})).unwrap();
    assert!(store
      .update(Collection::SyncQueue, json!({"id": key.as_id(), "type": "b"}))
      .unwrap());

    store.clear(Collection::SyncQueue).unwrap();
    assert!(!store
      .update(Collection::SyncQueue, json!({"id": key.as_id(), "type": "c"}))
      .unwrap());
    assert_eq!(store.count(Collection::SyncQueue).unwrap(), 0);
  }

  #[test]
  fn test_lease_excludes_other_holders() {
    let store = MemoryStore::new();
    let key = Key::Id(3);
    let ttl = Duration::from_secs(60);

    assert!(store.acquire_lease(Collection::SyncQueue, &key, "a", ttl).unwrap());
    assert!(!store.acquire_lease(Collection::SyncQueue, &key, "b", ttl).unwrap());
    store.release_lease(Collection::SyncQueue, &key, "b").unwrap();
    assert!(!store.acquire_lease(Collection::SyncQueue, &key, "b", ttl).unwrap());

    store.release_lease(Collection::SyncQueue, &key, "a").unwrap();
    assert!(store.acquire_lease(Collection::SyncQueue, &key, "b", ttl).unwrap());
    assert!(store
      .acquire_lease(Collection::SyncQueue, &Key::Id(4), "a", Duration::ZERO)
      .unwrap());
    assert!(store
      .acquire_lease(Collection::SyncQueue, &Key::Id(4), "b", ttl)
      .unwrap());
  }

  #[test]
  fn test_numeric_and_text_keys_are_distinct() {
    let store = MemoryStore::new();
    store.put(Collection::Lessons, json!({"id": 5, "topic": "numeric"})).unwrap();
    store.put(Collection::Lessons, json!({"id": "5", "topic": "text"})).unwrap();
    assert_eq!(store.count(Collection::Lessons).unwrap(), 2);
    let text = store.get(Collection::Lessons, &"5".into()).unwrap().unwrap();
    assert_eq!(text["topic"], "text");
  }

  #[test]
  fn test_limit_zero_is_empty() {
    let store = MemoryStore::new();
    store.put(Collection::SyncQueue, json!({"type": "a"})).unwrap();
    let none = store.get_all(Collection::SyncQueue, &Scan::all().limit(0)).unwrap();
    assert!(none.is_empty());
  }
}
