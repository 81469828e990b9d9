//! Response cache used by the fetch gateway.
//!
//! This is separate from the local record store: entries are whole HTTP
//! responses, grouped into named (versioned) caches and keyed by request
//! identity.

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::net::{Method, Request, Response};

/// Cache key derived from request method and URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  hash: String,
  description: String,
}

impl CacheKey {
  pub fn new(method: &Method, url: &str) -> Self {
    let description = format!("{} {}", method, url);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Self { hash, description }
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(&request.method, request.url.as_str())
  }

  pub fn hash(&self) -> &str {
    &self.hash
  }

  /// Human-readable `METHOD url` form.
  pub fn description(&self) -> &str {
    &self.description
  }
}

/// Storage for cached responses.
pub trait ResponseCache: Send + Sync {
  fn get(&self, cache_name: &str, key: &CacheKey) -> Result<Option<Response>>;

  /// Store a response, replacing any previous entry for the key.
  fn put(&self, cache_name: &str, key: &CacheKey, response: &Response) -> Result<()>;

  /// Names of all caches that hold at least one entry.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Drop a whole cache, returning the number of removed entries.
  fn delete_cache(&self, cache_name: &str) -> Result<usize>;
}

/// Open the SQLite response cache, or fall back to memory for this session.
pub fn open_response_cache(path: Option<&Path>) -> Arc<dyn ResponseCache> {
  let opened = match path {
    Some(p) => SqliteResponseCache::open_at(p),
    None => SqliteResponseCache::default_path().and_then(|p| SqliteResponseCache::open_at(&p)),
  };

  match opened {
    Ok(cache) => Arc::new(cache),
    Err(e) => {
      warn!(error = %e, "response cache unavailable, caching in memory for this session");
      Arc::new(MemoryResponseCache::new())
    }
  }
}

/// Schema for the response cache.
const RESPONSE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    cache_name TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    request TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, cache_key)
);
"#;

/// SQLite-based response cache.
pub struct SqliteResponseCache {
  conn: Mutex<Connection>,
}

impl SqliteResponseCache {
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::StorageUnavailable(format!("Failed to create cache directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::StorageUnavailable(format!(
        "Failed to open response cache at {}: {}",
        path.display(),
        e
      ))
    })?;
    conn
      .execute_batch(RESPONSE_SCHEMA)
      .map_err(|e| Error::StorageUnavailable(format!("Failed to run cache migrations: {}", e)))?;

    info!(path = %path.display(), "response cache opened");
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::StorageUnavailable("Could not determine data directory".into()))?;

    Ok(data_dir.join("shiksha").join("responses.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Poisoned(e.to_string()))
  }
}

impl ResponseCache for SqliteResponseCache {
  fn get(&self, cache_name: &str, key: &CacheKey) -> Result<Option<Response>> {
    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM response_cache
         WHERE cache_name = ? AND cache_key = ?",
        params![cache_name, key.hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()?;

    match row {
      Some((status, headers, body)) => Ok(Some(Response {
        status,
        headers: serde_json::from_str(&headers)?,
        body,
      })),
      None => Ok(None),
    }
  }

  fn put(&self, cache_name: &str, key: &CacheKey, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    let headers = serde_json::to_string(&response.headers)?;

    conn.execute(
      "INSERT OR REPLACE INTO response_cache
         (cache_name, cache_key, request, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        cache_name,
        key.hash(),
        key.description(),
        response.status,
        headers,
        response.body
      ],
    )?;

    Ok(())
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT DISTINCT cache_name FROM response_cache ORDER BY cache_name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
  }

  fn delete_cache(&self, cache_name: &str) -> Result<usize> {
    let conn = self.lock()?;
    let removed = conn.execute(
      "DELETE FROM response_cache WHERE cache_name = ?",
      params![cache_name],
    )?;
    Ok(removed)
  }
}

/// In-memory response cache.
#[derive(Default)]
pub struct MemoryResponseCache {
  caches: Mutex<HashMap<String, HashMap<String, Response>>>,
}

impl MemoryResponseCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, HashMap<String, Response>>>> {
    self
      .caches
      .lock()
      .map_err(|e| Error::Poisoned(e.to_string()))
  }
}

impl ResponseCache for MemoryResponseCache {
  fn get(&self, cache_name: &str, key: &CacheKey) -> Result<Option<Response>> {
    let caches = self.lock()?;
    Ok(
      caches
        .get(cache_name)
        .and_then(|entries| entries.get(key.hash()))
        .cloned(),
    )
  }

  fn put(&self, cache_name: &str, key: &CacheKey, response: &Response) -> Result<()> {
    let mut caches = self.lock()?;
    caches
      .entry(cache_name.to_string())
      .or_default()
      .insert(key.hash().to_string(), response.clone());
    Ok(())
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let caches = self.lock()?;
    let mut names: Vec<String> = caches
      .iter()
      .filter(|(_, entries)| !entries.is_empty())
      .map(|(name, _)| name.clone())
      .collect();
    names.sort();
    Ok(names)
  }

  fn delete_cache(&self, cache_name: &str) -> Result<usize> {
    let mut caches = self.lock()?;
    Ok(caches.remove(cache_name).map(|e| e.len()).unwrap_or(0))
  }
}
