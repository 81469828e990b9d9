//! Learner-facing actions.
//!
//! Reads prefer the network and fall back to what is stored locally. Writes
//! land locally first, then go to the backend; when the backend cannot be
//! reached the write is queued once for the sync processor.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Result;
use crate::net::{api_url, Method, Request, Transport};
use crate::offline::OfflineService;
use crate::reachability::Reachability;
use crate::services::{
  ContentService, DictionaryAnalyzer, Entities, Intent, Language, LanguageService, LessonContent,
  LessonRequest, Sentiment,
};
use crate::store::{ConversationRecord, LessonRecord, ProgressRecord, ProgressUpdate, SyncQueueItem};
use crate::sync::DEFAULT_REPLAY_TIMEOUT;

const DEFAULT_QUERY_LEVEL: &str = "beginner";

/// A lesson and whether it came from the content service just now.
#[derive(Debug, Clone)]
pub struct FetchedLesson {
  pub lesson: LessonRecord,
  pub fresh: bool,
}

/// What happened to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
  Sent,
  /// Stored in the sync queue under this id.
  Queued(i64),
}

#[derive(Debug, Clone)]
pub struct Answer {
  pub conversation_id: i64,
  pub response: String,
  pub entities: Entities,
  pub sentiment: Sentiment,
  pub intent: Intent,
  pub content: Option<LessonContent>,
  pub offline: bool,
}

pub struct Tutor<T: Transport> {
  offline: OfflineService,
  content: Arc<dyn ContentService>,
  language: Arc<dyn LanguageService>,
  reachability: Reachability,
  transport: T,
  base_url: Url,
  api_prefix: String,
  timeout: Duration,
}

impl<T: Transport> Tutor<T> {
  pub fn new(
    offline: OfflineService,
    content: Arc<dyn ContentService>,
    language: Arc<dyn LanguageService>,
    reachability: Reachability,
    transport: T,
    base_url: Url,
  ) -> Self {
    Self {
      offline,
      content,
      language,
      reachability,
      transport,
      base_url,
      api_prefix: "/api/".to_string(),
      timeout: DEFAULT_REPLAY_TIMEOUT,
    }
  }

  pub fn with_api_prefix(mut self, prefix: &str) -> Self {
    self.api_prefix = prefix.to_string();
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Generate a lesson, keeping a copy for offline use. Without connectivity
  /// (or when generation fails) the newest stored lesson on the topic is
  /// returned instead.
  pub async fn lesson(&self, topic: &str, level: &str) -> Result<Option<FetchedLesson>> {
    if self.reachability.is_online() {
      match self
        .content
        .generate_content(&LessonRequest::new(topic, level))
        .await
      {
        Ok(content) => {
          let lesson = LessonRecord::new(topic, level, content);
          if let Err(e) = self.offline.store_lesson(&lesson) {
            warn!(error = %e, id = %lesson.id, "could not keep lesson for offline use");
          }
          return Ok(Some(FetchedLesson { lesson, fresh: true }));
        }
        Err(e) => warn!(error = %e, topic, "lesson generation failed, using stored lessons"),
      }
    }

    let stored = self.offline.latest_lesson(topic)?;
    if stored.is_none() {
      info!(topic, "no lesson available offline");
    }
    Ok(stored.map(|lesson| FetchedLesson {
      lesson,
      fresh: false,
    }))
  }

  /// Answer a free-text question. Analysis failures fall back to neutral
  /// defaults; the exchange is always recorded.
  pub async fn ask(&self, text: &str, language: Language) -> Result<Answer> {
    let entities = self
      .language
      .recognize_entities(text, language)
      .unwrap_or_else(|e| {
        warn!(error = %e, "entity recognition failed");
        Entities::default()
      });
    let sentiment = self
      .language
      .analyze_sentiment(text, language)
      .unwrap_or_else(|e| {
        warn!(error = %e, "sentiment analysis failed");
        Sentiment::default()
      });
    let intent = DictionaryAnalyzer::determine_intent(&entities);

    let content = if self.reachability.is_online() {
      let request = LessonRequest {
        language,
        student_profile: json!({ "sentiment": sentiment, "intent": intent }),
        ..LessonRequest::new(text, DEFAULT_QUERY_LEVEL)
      };
      match self.content.generate_content(&request).await {
        Ok(content) => Some(content),
        Err(e) => {
          warn!(error = %e, "content generation failed");
          None
        }
      }
    } else {
      None
    };

    let offline = content.is_none();
    let response = match &content {
      Some(c) if !c.explanation.is_empty() => c.explanation.clone(),
      Some(c) => c.title.clone(),
      None => offline_reply(language).to_string(),
    };

    let conversation_id = self
      .offline
      .store_conversation(&ConversationRecord::new(text, response.clone(), offline))?;
    debug!(conversation_id, offline, ?intent, "question answered");

    Ok(Answer {
      conversation_id,
      response,
      entities,
      sentiment,
      intent,
      content,
      offline,
    })
  }

  /// Record progress locally and send it to the backend, queueing the update
  /// when that is not possible.
  pub async fn record_progress(
    &self,
    user_id: &str,
    update: &ProgressUpdate,
  ) -> Result<(ProgressRecord, Delivery)> {
    let progress = self.offline.merge_progress(user_id, update)?;
    let delivery = self
      .write_through(
        Method::POST,
        &format!("user/progress/{}", user_id),
        serde_json::to_value(update)?,
      )
      .await?;
    Ok((progress, delivery))
  }

  pub async fn update_settings(&self, user_id: &str, settings: Value) -> Result<Delivery> {
    self
      .write_through(Method::PUT, &format!("user/settings/{}", user_id), settings)
      .await
  }

  /// Most recent conversations, newest first.
  pub async fn history(&self, limit: usize) -> Result<Vec<ConversationRecord>> {
    self.offline.conversations(Some(limit))
  }

  async fn write_through(&self, method: Method, resource: &str, data: Value) -> Result<Delivery> {
    if self.reachability.is_online() {
      let url = api_url(&self.base_url, &self.api_prefix, resource)?;
      let request = Request::json(method.clone(), url, &data)?;

      match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
        Ok(Ok(response)) if response.is_success() => {
          debug!(resource, "write delivered");
          return Ok(Delivery::Sent);
        }
        Ok(Ok(response)) => warn!(resource, status = response.status, "write rejected, queueing"),
        Ok(Err(e)) if e.is_transient() => warn!(resource, error = %e, "backend unreachable, queueing"),
        Ok(Err(e)) => return Err(e),
        Err(_) => warn!(resource, timeout = ?self.timeout, "write timed out, queueing"),
      }
    }

    let id = self
      .offline
      .enqueue(SyncQueueItem::new(resource, method.as_str(), data))?;
    Ok(Delivery::Queued(id))
  }
}

fn offline_reply(language: Language) -> &'static str {
  match language {
    Language::Punjabi => "ਤੁਸੀਂ ਔਫਲਾਈਨ ਹੋ। ਤੁਹਾਡਾ ਸਵਾਲ ਸੁਰੱਖਿਅਤ ਕਰ ਲਿਆ ਗਿਆ ਹੈ।",
    Language::English => "You are offline. Your question has been saved.",
  }
}
