//! Typed access to the offline collections.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::store::{
  Collection, ConversationRecord, Key, LessonRecord, LocalStore, ProgressRecord, ProgressUpdate,
  Record, Scan, SyncQueueItem,
};
use crate::sync;

/// Record counts per collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
  pub backend: &'static str,
  pub lessons: usize,
  pub conversations: usize,
  pub progress: usize,
  pub sync_queue: usize,
}

impl fmt::Display for StorageStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "storage:       {}", self.backend)?;
    writeln!(f, "lessons:       {}", self.lessons)?;
    writeln!(f, "conversations: {}", self.conversations)?;
    writeln!(f, "progress:      {}", self.progress)?;
    write!(f, "sync queue:    {}", self.sync_queue)
  }
}

/// Lessons, conversations, progress and the sync queue over one store.
#[derive(Clone)]
pub struct OfflineService {
  store: Arc<dyn LocalStore>,
}

impl OfflineService {
  pub fn new(store: Arc<dyn LocalStore>) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &Arc<dyn LocalStore> {
    &self.store
  }

  // Lessons

  pub fn store_lesson(&self, lesson: &LessonRecord) -> Result<()> {
    self.store.put(Collection::Lessons, lesson.to_value()?)?;
    debug!(id = %lesson.id, "lesson stored offline");
    Ok(())
  }

  pub fn get_lesson(&self, id: &str) -> Result<Option<LessonRecord>> {
    self
      .store
      .get(Collection::Lessons, &Key::from(id))?
      .map(LessonRecord::from_value)
      .transpose()
  }

  pub fn lessons(&self) -> Result<Vec<LessonRecord>> {
    decode_all(self.store.get_all(Collection::Lessons, &Scan::all())?)
  }

  pub fn lessons_by_topic(&self, topic: &str) -> Result<Vec<LessonRecord>> {
    decode_all(
      self
        .store
        .get_all(Collection::Lessons, &Scan::index("topic").eq(topic))?,
    )
  }

  /// Most recently stored lesson on `topic`, any level.
  pub fn latest_lesson(&self, topic: &str) -> Result<Option<LessonRecord>> {
    Ok(
      self
        .lessons_by_topic(topic)?
        .into_iter()
        .max_by_key(|lesson| lesson.stored_at),
    )
  }

  // Conversations

  /// Append a conversation and return its assigned id.
  pub fn store_conversation(&self, conversation: &ConversationRecord) -> Result<i64> {
    let key = self
      .store
      .put(Collection::Conversations, conversation.to_value()?)?;
    Ok(key.as_id().unwrap_or_default())
  }

  /// Newest first. `None` returns every conversation.
  pub fn conversations(&self, limit: Option<usize>) -> Result<Vec<ConversationRecord>> {
    let mut scan = Scan::index("timestamp").reverse();
    if let Some(limit) = limit {
      scan = scan.limit(limit);
    }
    decode_all(self.store.get_all(Collection::Conversations, &scan)?)
  }

  // Progress

  pub fn store_progress(&self, progress: &ProgressRecord) -> Result<()> {
    self.store.put(Collection::Progress, progress.to_value()?)?;
    Ok(())
  }

  /// Fold an update into the user's record, creating it on first write.
  pub fn merge_progress(&self, user_id: &str, update: &ProgressUpdate) -> Result<ProgressRecord> {
    let mut progress = self
      .get_progress(user_id)?
      .unwrap_or_else(|| ProgressRecord::new(user_id));
    progress.apply(update);
    self.store_progress(&progress)?;
    Ok(progress)
  }

  pub fn get_progress(&self, user_id: &str) -> Result<Option<ProgressRecord>> {
    self
      .store
      .get(Collection::Progress, &Key::from(user_id))?
      .map(ProgressRecord::from_value)
      .transpose()
  }

  // Sync queue

  pub fn enqueue(&self, item: SyncQueueItem) -> Result<i64> {
    sync::enqueue(self.store.as_ref(), item)
  }

  pub fn pending_sync(&self) -> Result<Vec<SyncQueueItem>> {
    decode_all(self.store.get_all(Collection::SyncQueue, &Scan::all())?)
  }

  pub fn sync_queue_len(&self) -> Result<usize> {
    self.store.count(Collection::SyncQueue)
  }

  // Maintenance

  pub fn is_available(&self, collection: Collection, key: &Key) -> Result<bool> {
    Ok(self.store.get(collection, key)?.is_some())
  }

  pub fn storage_stats(&self) -> Result<StorageStats> {
    Ok(StorageStats {
      backend: self.store.backend(),
      lessons: self.store.count(Collection::Lessons)?,
      conversations: self.store.count(Collection::Conversations)?,
      progress: self.store.count(Collection::Progress)?,
      sync_queue: self.store.count(Collection::SyncQueue)?,
    })
  }

  pub fn clear_all(&self) -> Result<()> {
    for collection in Collection::ALL {
      self.store.clear(collection)?;
    }
    info!("offline data cleared");
    Ok(())
  }
}

fn decode_all<R: Record>(values: Vec<serde_json::Value>) -> Result<Vec<R>> {
  values.into_iter().map(R::from_value).collect()
}
