//! External collaborators consumed by the offline core: lesson content
//! generation and text analysis (entities and sentiment).
//!
//! Both sit behind traits so a real backend can replace the defaults
//! without touching callers.

mod content;
mod language;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Result;

pub use content::RemoteContentService;
pub use language::DictionaryAnalyzer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
  #[default]
  Punjabi,
  English,
}

impl fmt::Display for Language {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Language::Punjabi => f.write_str("punjabi"),
      Language::English => f.write_str("english"),
    }
  }
}

impl FromStr for Language {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "punjabi" | "pa" => Ok(Language::Punjabi),
      "english" | "en" => Ok(Language::English),
      other => Err(format!("unsupported language '{}'", other)),
    }
  }
}

// ============================================================================
// Lesson content
// ============================================================================

/// Parameters for generating a lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonRequest {
  pub topic: String,
  pub level: String,
  pub language: Language,
  #[serde(default)]
  pub student_profile: serde_json::Value,
}

impl LessonRequest {
  pub fn new(topic: &str, level: &str) -> Self {
    Self {
      topic: topic.to_string(),
      level: level.to_string(),
      language: Language::default(),
      student_profile: serde_json::Value::Object(Default::default()),
    }
  }
}

/// Structured lesson as produced by the content service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonContent {
  pub title: String,
  #[serde(default)]
  pub explanation: String,
  #[serde(default)]
  pub examples: Vec<Example>,
  #[serde(default)]
  pub exercises: Vec<Exercise>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub audio_response: Option<AudioResponse>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub visual_aids: Option<VisualAids>,
  #[serde(default)]
  pub difficulty: String,
  /// Minutes.
  #[serde(default)]
  pub estimated_time: u32,
  #[serde(default)]
  pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
  pub problem: String,
  pub solution: String,
  #[serde(default)]
  pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
  pub problem: String,
  pub options: Vec<String>,
  /// Index into `options`.
  pub correct: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioResponse {
  pub text: String,
  /// Seconds.
  pub duration: u32,
  pub language: Language,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualAids {
  #[serde(default)]
  pub images: Vec<String>,
  #[serde(default)]
  pub diagrams: Vec<String>,
  #[serde(default)]
  pub animations: Vec<String>,
}

/// Generates lesson content. May be slow or unavailable; callers treat any
/// error as "no content available".
pub trait ContentService: Send + Sync {
  fn generate_content<'a>(&'a self, request: &'a LessonRequest) -> BoxFuture<'a, Result<LessonContent>>;
}

// ============================================================================
// Text analysis
// ============================================================================

/// A dictionary term found in the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermMatch {
  pub punjabi: String,
  pub english: String,
  pub confidence: f32,
  /// Character offset of the first occurrence.
  pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberMatch {
  pub punjabi: String,
  pub value: u32,
  pub confidence: f32,
  pub position: usize,
}

/// Arithmetic expression found in the text, e.g. `2 + 3`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptMatch {
  #[serde(rename = "type")]
  pub kind: String,
  pub matches: Vec<String>,
  pub confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
  pub subjects: Vec<TermMatch>,
  pub operations: Vec<TermMatch>,
  pub numbers: Vec<NumberMatch>,
  pub questions: Vec<TermMatch>,
  pub learning_terms: Vec<TermMatch>,
  pub concepts: Vec<ConceptMatch>,
}

impl Entities {
  pub fn is_empty(&self) -> bool {
    self.subjects.is_empty()
      && self.operations.is_empty()
      && self.numbers.is_empty()
      && self.questions.is_empty()
      && self.learning_terms.is_empty()
      && self.concepts.is_empty()
  }
}

/// Emotion label for neutral text.
pub const NEUTRAL_EMOTION: &str = "ਸਾਧਾਰਣ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
  pub score: i32,
  pub comparative: f64,
  pub emotion: String,
  pub confidence: f64,
}

impl Default for Sentiment {
  fn default() -> Self {
    Self {
      score: 0,
      comparative: 0.0,
      emotion: NEUTRAL_EMOTION.to_string(),
      confidence: 0.5,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
  #[default]
  General,
  Question,
  LearningRequest,
  PracticeRequest,
  ExplanationRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
  #[serde(rename = "type")]
  pub kind: IntentKind,
  pub confidence: f32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub question_type: Option<String>,
}

impl Default for Intent {
  fn default() -> Self {
    Self {
      kind: IntentKind::General,
      confidence: 0.5,
      question_type: None,
    }
  }
}

/// Entity recognition and sentiment analysis.
pub trait LanguageService: Send + Sync {
  fn recognize_entities(&self, text: &str, language: Language) -> Result<Entities>;

  fn analyze_sentiment(&self, text: &str, language: Language) -> Result<Sentiment>;
}
