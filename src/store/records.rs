//! Typed records kept in the local store.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::{Collection, Key};
use crate::error::{Error, Result};
use crate::services::LessonContent;

/// A record type that lives in exactly one collection.
pub trait Record: Serialize + DeserializeOwned {
  const COLLECTION: Collection;

  fn to_value(&self) -> Result<Value> {
    Ok(serde_json::to_value(self)?)
  }

  fn from_value(value: Value) -> Result<Self> {
    serde_json::from_value(value).map_err(|e| Error::MalformedRecord {
      collection: Self::COLLECTION,
      reason: e.to_string(),
    })
  }
}

/// Current time at the precision records are stored with, so a record
/// compares equal to itself after a trip through the store.
fn now() -> DateTime<Utc> {
  Utc::now().trunc_subsecs(3)
}

/// Timestamps are stored as fixed-width RFC 3339 strings (millisecond
/// precision) so that index order matches chronological order.
mod timestamp {
  use chrono::{DateTime, SecondsFormat, Utc};
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    DateTime::parse_from_rfc3339(&raw)
      .map(|ts| ts.with_timezone(&Utc))
      .map_err(serde::de::Error::custom)
  }
}

/// A lesson fetched or generated while online, kept for offline use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonRecord {
  pub id: String,
  pub topic: String,
  pub level: String,
  pub content: LessonContent,
  #[serde(with = "timestamp")]
  pub stored_at: DateTime<Utc>,
  pub offline: bool,
}

impl LessonRecord {
  /// Lessons are keyed by topic and level, so re-fetching the same lesson
  /// replaces the stored copy.
  pub fn new(topic: &str, level: &str, content: LessonContent) -> Self {
    Self {
      id: format!("{}:{}", topic, level),
      topic: topic.to_string(),
      level: level.to_string(),
      content,
      stored_at: now(),
      offline: true,
    }
  }
}

impl Record for LessonRecord {
  const COLLECTION: Collection = Collection::Lessons;
}

/// One tutor exchange. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<i64>,
  pub transcription: String,
  pub response: String,
  #[serde(with = "timestamp")]
  pub timestamp: DateTime<Utc>,
  pub offline: bool,
}

impl ConversationRecord {
  pub fn new(transcription: impl Into<String>, response: impl Into<String>, offline: bool) -> Self {
    Self {
      id: None,
      transcription: transcription.into(),
      response: response.into(),
      timestamp: now(),
      offline,
    }
  }
}

impl Record for ConversationRecord {
  const COLLECTION: Collection = Collection::Conversations;
}

/// Per-user learning progress; one record per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
  pub user_id: String,
  #[serde(default)]
  pub completed_lessons: u32,
  /// Minutes spent across all lessons.
  #[serde(default)]
  pub total_time_spent: u64,
  #[serde(default)]
  pub current_streak: u32,
  #[serde(default)]
  pub achievements: Vec<String>,
  #[serde(with = "timestamp")]
  pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
  pub fn new(user_id: &str) -> Self {
    Self {
      user_id: user_id.to_string(),
      completed_lessons: 0,
      total_time_spent: 0,
      current_streak: 0,
      achievements: Vec::new(),
      updated_at: now(),
    }
  }

  /// Fold a progress update into this record, the way the backend does.
  pub fn apply(&mut self, update: &ProgressUpdate) {
    if update.completed {
      self.completed_lessons += 1;
    }
    if let Some(minutes) = update.time_spent {
      self.total_time_spent += minutes;
    }
    self.achievements.extend(update.achievements.iter().cloned());
    self.updated_at = now();
  }
}

impl Record for ProgressRecord {
  const COLLECTION: Collection = Collection::Progress;
}

/// Body of `POST /api/user/progress/{userId}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lesson_id: Option<String>,
  #[serde(default)]
  pub completed: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub time_spent: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub score: Option<f64>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub achievements: Vec<String>,
}

/// A mutation waiting to be replayed against the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<i64>,
  /// Resource path below the API prefix, e.g. `user/progress/42`.
  #[serde(rename = "type")]
  pub resource_type: String,
  pub method: String,
  pub data: Value,
  #[serde(with = "timestamp")]
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub retry_count: u32,
}

impl SyncQueueItem {
  pub fn new(resource_type: impl Into<String>, method: impl Into<String>, data: Value) -> Self {
    Self {
      id: None,
      resource_type: resource_type.into(),
      method: method.into(),
      data,
      created_at: now(),
      retry_count: 0,
    }
  }

  pub fn key(&self) -> Option<Key> {
    self.id.map(Key::Id)
  }
}

impl Record for SyncQueueItem {
  const COLLECTION: Collection = Collection::SyncQueue;
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_sync_item_wire_names() {
    let item = SyncQueueItem::new("user/progress/u1", "POST", json!({"completed": true}));
    let value = item.to_value().unwrap();

    assert_eq!(value["type"], "user/progress/u1");
    assert_eq!(value["retryCount"], 0);
    assert!(value.get("id").is_none());
    // Fixed-width millisecond timestamps.
    assert_eq!(value["createdAt"].as_str().unwrap().len(), 24);
  }

  #[test]
  fn test_progress_apply() {
    let mut progress = ProgressRecord::new("u1");
    progress.apply(&ProgressUpdate {
      completed: true,
      time_spent: Some(15),
      achievements: vec!["first-lesson".into()],
      ..Default::default()
    });
    progress.apply(&ProgressUpdate {
      time_spent: Some(5),
      ..Default::default()
    });

    assert_eq!(progress.completed_lessons, 1);
    assert_eq!(progress.total_time_spent, 20);
    assert_eq!(progress.achievements, vec!["first-lesson".to_string()]);
  }

  #[test]
  fn test_timestamps_survive_storage() {
    let mut progress = ProgressRecord::new("u1");
    progress.apply(&ProgressUpdate {
      completed: true,
      ..Default::default()
    });
    let stored = ProgressRecord::from_value(progress.to_value().unwrap()).unwrap();
    assert_eq!(stored, progress);

    let item = SyncQueueItem::new("user/progress/u1", "POST", json!({}));
    let stored = SyncQueueItem::from_value(item.to_value().unwrap()).unwrap();
    assert_eq!(stored.created_at, item.created_at);
  }

  #[test]
  fn test_malformed_record_is_reported() {
    let err = ProgressRecord::from_value(json!({"userId": 7})).unwrap_err();
    assert!(matches!(
      err,
      Error::MalformedRecord {
        collection: Collection::Progress,
        ..
      }
    ));
  }
}
