//! Error taxonomy for the offline core.
//!
//! Most variants are soft failures: callers degrade (memory-only storage,
//! cached responses, neutral defaults) instead of bubbling them up to the user.
//! Only `MalformedRecord` and the internal variants are meant to propagate.

use thiserror::Error;

use crate::store::Collection;

#[derive(Error, Debug)]
pub enum Error {
  /// The durable store could not be opened. Callers fall back to memory-only.
  #[error("Local storage unavailable: {0}")]
  StorageUnavailable(String),

  /// Transient connectivity failure (connect error, non-2xx replay, timeout).
  #[error("Network unreachable: {0}")]
  NetworkUnreachable(String),

  /// A queued mutation was dropped after exhausting its attempts.
  #[error("Sync item {id} dropped after {attempts} attempts")]
  SyncExhausted { id: i64, attempts: u32 },

  /// Content, entity or sentiment service failed.
  #[error("Upstream service error: {0}")]
  UpstreamService(String),

  /// A stored record could not be decoded.
  #[error("Malformed record in {collection}: {reason}")]
  MalformedRecord {
    collection: Collection,
    reason: String,
  },

  #[error("Unknown index '{index}' on {collection}")]
  UnknownIndex {
    collection: Collection,
    index: String,
  },

  /// Record has no value at the key path and the collection does not auto-increment.
  #[error("Record for {collection} is missing key field '{key_path}'")]
  MissingKey {
    collection: Collection,
    key_path: &'static str,
  },

  #[error("Request timed out after {0:?}")]
  Timeout(std::time::Duration),

  #[error("Database error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("Serialization error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("Lock poisoned: {0}")]
  Poisoned(String),
}

impl Error {
  /// Whether this failure is a connectivity problem that should drive
  /// cache fallback or queueing rather than a hard error.
  pub fn is_transient(&self) -> bool {
    matches!(self, Error::NetworkUnreachable(_) | Error::Timeout(_))
  }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
