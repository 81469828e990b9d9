//! Sync queue processor.
//!
//! Mutations that could not reach the backend are kept in the `syncQueue`
//! collection and replayed here once connectivity returns. Each item is
//! handled on its own: success deletes it, failure bumps its retry count and
//! either re-queues it or, once the attempt budget is spent, drops it.
//!
//! Overlapping `process_queue` runs are allowed, from one processor or from
//! several sharing a store. Each run leases an item in the store before
//! replaying it and re-reads it under the lease, so an item is never replayed
//! by two runs at once and never after it was deleted.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::net::{api_url, Method, Request, Transport};
use crate::store::{Collection, Key, LocalStore, Record, Scan, SyncQueueItem};

/// Attempts per queued item before it is dropped.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Upper bound for a single replay request.
pub const DEFAULT_REPLAY_TIMEOUT: Duration = Duration::from_secs(15);

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
  pub max_attempts: u32,
  pub replay_timeout: Duration,
}

impl Default for SyncPolicy {
  fn default() -> Self {
    Self {
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      replay_timeout: DEFAULT_REPLAY_TIMEOUT,
    }
  }
}

/// Outcome of one `process_queue` run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
  pub synced: usize,
  /// Failed this time, kept for another attempt.
  pub retried: usize,
  /// Failed for the last time and removed from the queue.
  pub dropped: Vec<SyncQueueItem>,
  /// Leased or already removed by a concurrent run.
  pub skipped: usize,
  /// Queue records that could not be decoded; they are left in place.
  pub malformed: usize,
}

impl SyncReport {
  pub fn attempted(&self) -> usize {
    self.synced + self.retried + self.dropped.len()
  }
}

impl fmt::Display for SyncReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} synced, {} retrying, {} dropped, {} skipped",
      self.synced,
      self.retried,
      self.dropped.len(),
      self.skipped
    )?;
    if self.malformed > 0 {
      write!(f, ", {} malformed", self.malformed)?;
    }
    Ok(())
  }
}

/// Add a mutation to the sync queue with a zero retry count.
pub fn enqueue(store: &dyn LocalStore, item: SyncQueueItem) -> Result<i64> {
  let key = store.put(Collection::SyncQueue, item.to_value()?)?;
  let id = key.as_id().ok_or_else(|| Error::MalformedRecord {
    collection: Collection::SyncQueue,
    reason: format!("expected numeric key, got '{}'", key),
  })?;
  debug!(id, resource = %item.resource_type, method = %item.method, "queued for sync");
  Ok(id)
}

/// Replays queued mutations against the backend.
pub struct SyncProcessor<T: Transport> {
  store: Arc<dyn LocalStore>,
  transport: T,
  base_url: Url,
  api_prefix: String,
  policy: SyncPolicy,
}

impl<T: Transport> SyncProcessor<T> {
  pub fn new(store: Arc<dyn LocalStore>, transport: T, base_url: Url) -> Self {
    Self {
      store,
      transport,
      base_url,
      api_prefix: "/api/".to_string(),
      policy: SyncPolicy::default(),
    }
  }

  pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn with_api_prefix(mut self, prefix: &str) -> Self {
    self.api_prefix = prefix.to_string();
    self
  }

  pub fn policy(&self) -> SyncPolicy {
    self.policy
  }

  /// Replay every queued item once.
  ///
  /// Only a store failure aborts the run; individual replay failures are
  /// recorded in the report.
  pub async fn process_queue(&self) -> Result<SyncReport> {
    let records = self.store.get_all(Collection::SyncQueue, &Scan::all())?;
    let mut report = SyncReport::default();
    let holder = run_holder();
    // A lease outlives the replay it guards.
    let ttl = self.policy.replay_timeout.saturating_mul(2);
    info!(pending = records.len(), run = %holder, "processing sync queue");

    for record in records {
      let key = match SyncQueueItem::from_value(record).map(|item| item.key()) {
        Ok(Some(key)) => key,
        Ok(None) | Err(_) => {
          error!("skipping undecodable sync queue record");
          report.malformed += 1;
          continue;
        }
      };

      let Some(_lease) = Lease::acquire(self.store.as_ref(), key.clone(), &holder, ttl)? else {
        debug!(%key, "sync item leased by another run");
        report.skipped += 1;
        continue;
      };

      // Another run may have finished this item since the queue was read.
      let item = match self.store.get(Collection::SyncQueue, &key)? {
        Some(value) => match SyncQueueItem::from_value(value) {
          Ok(item) => item,
          Err(e) => {
            error!(%key, error = %e, "sync queue record is malformed");
            report.malformed += 1;
            continue;
          }
        },
        None => {
          report.skipped += 1;
          continue;
        }
      };

      match self.replay(&item).await {
        Ok(()) => {
          self.store.delete(Collection::SyncQueue, &key)?;
          info!(%key, resource = %item.resource_type, "synced item");
          report.synced += 1;
        }
        Err(e) => self.record_failure(item, e, &mut report)?,
      }
    }

    info!(%report, "sync queue processed");
    Ok(report)
  }

  fn record_failure(
    &self,
    mut item: SyncQueueItem,
    cause: Error,
    report: &mut SyncReport,
  ) -> Result<()> {
    let (Some(id), Some(key)) = (item.id, item.key()) else {
      return Ok(());
    };
    item.retry_count += 1;

    if item.retry_count < self.policy.max_attempts {
      // The queue may have been cleared while the replay was in flight.
      if !self.store.update(Collection::SyncQueue, item.to_value()?)? {
        debug!(id, "sync item removed during replay, not re-queued");
        report.skipped += 1;
        return Ok(());
      }
      warn!(id, attempt = item.retry_count, error = %cause, "failed to sync item, will retry");
      report.retried += 1;
    } else {
      self.store.delete(Collection::SyncQueue, &key)?;
      let exhausted = Error::SyncExhausted {
        id,
        attempts: item.retry_count,
      };
      warn!(
        id,
        resource = %item.resource_type,
        last_error = %cause,
        "{}", exhausted
      );
      report.dropped.push(item);
    }

    Ok(())
  }

  async fn replay(&self, item: &SyncQueueItem) -> Result<()> {
    let method = Method::from_bytes(item.method.to_uppercase().as_bytes())
      .map_err(|_| Error::UpstreamService(format!("Invalid HTTP method '{}'", item.method)))?;
    let url = api_url(&self.base_url, &self.api_prefix, &item.resource_type)?;
    let request = Request::json(method, url, &item.data)?;

    let response = tokio::time::timeout(self.policy.replay_timeout, self.transport.send(request))
      .await
      .map_err(|_| Error::Timeout(self.policy.replay_timeout))??;

    if !response.is_success() {
      return Err(Error::UpstreamService(format!(
        "HTTP error! status: {}",
        response.status
      )));
    }
    Ok(())
  }
}

/// Lease holder name for one run, unique across processes sharing a store.
fn run_holder() -> String {
  format!(
    "{}-{}",
    std::process::id(),
    RUN_SEQ.fetch_add(1, Ordering::Relaxed)
  )
}

/// Exclusive hold on one queue item for the duration of a replay.
/// Only built after the store granted the lease; dropping it releases it.
struct Lease<'a> {
  store: &'a dyn LocalStore,
  key: Key,
  holder: &'a str,
}

impl<'a> Lease<'a> {
  fn acquire(
    store: &'a dyn LocalStore,
    key: Key,
    holder: &'a str,
    ttl: Duration,
  ) -> Result<Option<Self>> {
    if !store.acquire_lease(Collection::SyncQueue, &key, holder, ttl)? {
      return Ok(None);
    }
    Ok(Some(Self { store, key, holder }))
  }
}

impl Drop for Lease<'_> {
  fn drop(&mut self) {
    if let Err(e) = self
      .store
      .release_lease(Collection::SyncQueue, &self.key, self.holder)
    {
      warn!(key = %self.key, error = %e, "failed to release sync lease");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::mock::MockTransport;
  use crate::net::Response;
  use crate::store::{MemoryStore, SqliteStore};
  use serde_json::json;
  use std::sync::atomic::AtomicUsize;

  fn base() -> Url {
    Url::parse("http://localhost:5000").unwrap()
  }

  fn processor(
    store: Arc<dyn LocalStore>,
    transport: Arc<MockTransport>,
  ) -> SyncProcessor<Arc<MockTransport>> {
    SyncProcessor::new(store, transport, base())
  }

  fn queue_item(store: &dyn LocalStore, resource: &str) -> i64 {
    enqueue(
      store,
      SyncQueueItem::new(resource, "POST", json!({"completed": true})),
    )
    .unwrap()
  }

  #[tokio::test]
  async fn test_enqueue_starts_at_zero_retries() {
    let store = MemoryStore::new();
    for n in 0..4 {
      queue_item(&store, &format!("user/progress/u{}", n));
    }

    let items = store.get_all(Collection::SyncQueue, &Scan::all()).unwrap();
    assert_eq!(items.len(), 4);
    for value in items {
      assert_eq!(SyncQueueItem::from_value(value).unwrap().retry_count, 0);
    }
  }

  #[tokio::test]
  async fn test_success_on_third_attempt_stops_retrying() {
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    queue_item(store.as_ref(), "user/progress/u1");

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let transport = Arc::new(MockTransport::new(move |_| {
      if counter.fetch_add(1, Ordering::SeqCst) < 2 {
        Err(Error::NetworkUnreachable("down".into()))
      } else {
        Ok(Response::new(200))
      }
    }));
    let processor = processor(store.clone(), transport.clone());

    let first = processor.process_queue().await.unwrap();
    assert_eq!(first.retried, 1);
    let second = processor.process_queue().await.unwrap();
    assert_eq!(second.retried, 1);
    let third = processor.process_queue().await.unwrap();
    assert_eq!(third.synced, 1);

    let fourth = processor.process_queue().await.unwrap();
    assert_eq!(fourth.attempted(), 0);
    assert_eq!(transport.call_count(), 3);
    assert_eq!(store.count(Collection::SyncQueue).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_item_dropped_after_three_failures() {
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    let id = queue_item(store.as_ref(), "user/progress/u1");
    let transport = Arc::new(MockTransport::new(|_| Ok(Response::new(500))));
    let processor = processor(store.clone(), transport.clone());

    processor.process_queue().await.unwrap();
    processor.process_queue().await.unwrap();
    let item = store.get(Collection::SyncQueue, &id.into()).unwrap().unwrap();
    assert_eq!(item["retryCount"], 2);

    let third = processor.process_queue().await.unwrap();
    assert_eq!(third.dropped.len(), 1);
    assert_eq!(third.dropped[0].retry_count, 3);
    assert!(store.get(Collection::SyncQueue, &id.into()).unwrap().is_none());

    processor.process_queue().await.unwrap();
    assert_eq!(transport.call_count(), 3);
  }

  #[tokio::test]
  async fn test_one_failure_does_not_block_others() {
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    queue_item(store.as_ref(), "user/progress/bad");
    queue_item(store.as_ref(), "user/progress/good");
    let transport = Arc::new(MockTransport::new(|request| {
      if request.url.path().ends_with("/bad") {
        Err(Error::NetworkUnreachable("down".into()))
      } else {
        Ok(Response::new(200))
      }
    }));

    let report = processor(store.clone(), transport).process_queue().await.unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.retried, 1);
    assert_eq!(store.count(Collection::SyncQueue).unwrap(), 1);
  }

  #[tokio::test]
  async fn test_replay_uses_recorded_method_and_payload() {
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    enqueue(
      store.as_ref(),
      SyncQueueItem::new("user/settings/u1", "PUT", json!({"voiceEnabled": false})),
    )
    .unwrap();
    let transport = Arc::new(MockTransport::new(|_| Ok(Response::new(200))));

    processor(store, transport.clone()).process_queue().await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls[0].method, Method::PUT);
    assert_eq!(calls[0].url.as_str(), "http://localhost:5000/api/user/settings/u1");
    let body: serde_json::Value = serde_json::from_slice(calls[0].body.as_ref().unwrap()).unwrap();
    assert_eq!(body, json!({"voiceEnabled": false}));
  }

  #[tokio::test]
  async fn test_timeout_counts_as_failure() {
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    let id = queue_item(store.as_ref(), "user/progress/u1");
    let transport =
      Arc::new(MockTransport::new(|_| Ok(Response::new(200))).with_delay(Duration::from_millis(200)));
    let processor = processor(store.clone(), transport).with_policy(SyncPolicy {
      max_attempts: 3,
      replay_timeout: Duration::from_millis(20),
    });

    let report = processor.process_queue().await.unwrap();
    assert_eq!(report.retried, 1);
    let item = store.get(Collection::SyncQueue, &id.into()).unwrap().unwrap();
    assert_eq!(item["retryCount"], 1);
  }

  #[tokio::test]
  async fn test_overlapping_runs_replay_each_item_once() {
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    for n in 0..5 {
      queue_item(store.as_ref(), &format!("user/progress/u{}", n));
    }
    let transport =
      Arc::new(MockTransport::new(|_| Ok(Response::new(200))).with_delay(Duration::from_millis(10)));
    let processor = processor(store.clone(), transport.clone());

    let (a, b) = tokio::join!(processor.process_queue(), processor.process_queue());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.synced + b.synced, 5);
    assert_eq!(transport.call_count(), 5);
    assert!(transport.calls_by_path().values().all(|&n| n == 1));
    assert_eq!(store.count(Collection::SyncQueue).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_malformed_record_is_left_in_place() {
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    store
      .put(Collection::SyncQueue, json!({"type": "user/progress/u1"}))
      .unwrap();
    queue_item(store.as_ref(), "user/progress/u2");
    let transport = Arc::new(MockTransport::new(|_| Ok(Response::new(200))));

    let report = processor(store.clone(), transport).process_queue().await.unwrap();
    assert_eq!(report.malformed, 1);
    assert_eq!(report.synced, 1);
    assert_eq!(store.count(Collection::SyncQueue).unwrap(), 1);
  }

  #[test]
  fn test_lease_taken_twice_is_refused() {
    let store = MemoryStore::new();
    let ttl = Duration::from_secs(60);

    let first = Lease::acquire(&store, Key::Id(1), "run-a", ttl).unwrap();
    assert!(first.is_some());
    // Neither the same run nor another one can take it again while held.
    assert!(Lease::acquire(&store, Key::Id(1), "run-a", ttl).unwrap().is_none());
    assert!(Lease::acquire(&store, Key::Id(1), "run-b", ttl).unwrap().is_none());
    assert!(Lease::acquire(&store, Key::Id(2), "run-b", ttl).unwrap().is_some());

    drop(first);
    assert!(Lease::acquire(&store, Key::Id(1), "run-b", ttl).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_cleared_during_failed_replay_is_not_requeued() {
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    queue_item(store.as_ref(), "user/progress/u1");
    let shared = store.clone();
    let transport = Arc::new(MockTransport::new(move |_| {
      shared.clear(Collection::SyncQueue).unwrap();
      Err(Error::NetworkUnreachable("down".into()))
    }));

    let report = processor(store.clone(), transport).process_queue().await.unwrap();
    assert_eq!(report.retried, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(store.count(Collection::SyncQueue).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_processors_sharing_a_store_replay_each_item_once() {
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    for n in 0..5 {
      queue_item(store.as_ref(), &format!("user/progress/u{}", n));
    }
    let transport =
      Arc::new(MockTransport::new(|_| Ok(Response::new(200))).with_delay(Duration::from_millis(10)));
    let first = processor(store.clone(), transport.clone());
    let second = processor(store.clone(), transport.clone());

    let (a, b) = tokio::join!(first.process_queue(), second.process_queue());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.synced + b.synced, 5);
    assert_eq!(transport.call_count(), 5);
    assert!(transport.calls_by_path().values().all(|&n| n == 1));
    assert_eq!(store.count(Collection::SyncQueue).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_processes_sharing_a_sqlite_file_replay_each_item_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");
    let first_store: Arc<dyn LocalStore> = Arc::new(SqliteStore::open_at(&path).unwrap());
    let second_store: Arc<dyn LocalStore> = Arc::new(SqliteStore::open_at(&path).unwrap());
    for n in 0..5 {
      queue_item(first_store.as_ref(), &format!("user/progress/u{}", n));
    }
    let transport =
      Arc::new(MockTransport::new(|_| Ok(Response::new(200))).with_delay(Duration::from_millis(10)));
    let first = processor(first_store.clone(), transport.clone());
    let second = processor(second_store, transport.clone());

    let (a, b) = tokio::join!(first.process_queue(), second.process_queue());
    assert_eq!(a.unwrap().synced + b.unwrap().synced, 5);
    assert_eq!(transport.call_count(), 5);
    assert_eq!(first_store.count(Collection::SyncQueue).unwrap(), 0);
  }
}
