//! Dictionary-based text analysis for Punjabi educational queries.
//!
//! This is pattern matching over fixed vocabularies, not a language model.

use regex::Regex;

use super::{
  ConceptMatch, Entities, Intent, IntentKind, Language, LanguageService, NumberMatch, Sentiment,
  TermMatch, NEUTRAL_EMOTION,
};
use crate::error::Result;

const TERM_CONFIDENCE: f32 = 0.9;
const CONCEPT_CONFIDENCE: f32 = 0.8;

const SUBJECTS: &[(&str, &str)] = &[
  ("ਗਣਿਤ", "mathematics"),
  ("ਵਿਗਿਆਨ", "science"),
  ("ਭੂਗੋਲ", "geography"),
  ("ਇਤਿਹਾਸ", "history"),
  ("ਪੰਜਾਬੀ", "punjabi"),
  ("ਅੰਗਰੇਜ਼ੀ", "english"),
  ("ਹਿੰਦੀ", "hindi"),
  ("ਸਾਹਿਤ", "literature"),
  ("ਕਲਾ", "art"),
  ("ਸੰਗੀਤ", "music"),
];

const OPERATIONS: &[(&str, &str)] = &[
  ("ਜੋੜ", "addition"),
  ("ਘਟਾਓ", "subtraction"),
  ("ਗੁਣਾ", "multiplication"),
  ("ਭਾਗ", "division"),
  ("ਵਰਗ", "square"),
  ("ਜੜ", "root"),
];

const NUMBERS: &[(&str, u32)] = &[
  ("ਇੱਕ", 1),
  ("ਦੋ", 2),
  ("ਤਿੰਨ", 3),
  ("ਚਾਰ", 4),
  ("ਪੰਜ", 5),
  ("ਛੇ", 6),
  ("ਸੱਤ", 7),
  ("ਅੱਠ", 8),
  ("ਨੌਂ", 9),
  ("ਦਸ", 10),
];

const QUESTIONS: &[(&str, &str)] = &[
  ("ਕੀ", "what"),
  ("ਕਿਵੇਂ", "how"),
  ("ਕਦੋਂ", "when"),
  ("ਕਿੱਥੇ", "where"),
  ("ਕਿਉਂ", "why"),
  ("ਕੌਣ", "who"),
];

const LEARNING: &[(&str, &str)] = &[
  ("ਸਿੱਖਣਾ", "learn"),
  ("ਸਮਝਣਾ", "understand"),
  ("ਅਭਿਆਸ", "practice"),
  ("ਪ੍ਰਸ਼ਨ", "question"),
  ("ਜਵਾਬ", "answer"),
  ("ਉਦਾਹਰਣ", "example"),
  ("ਸਮੱਸਿਆ", "problem"),
  ("ਹੱਲ", "solution"),
];

/// Word valences for the sentiment score (English and Punjabi).
const LEXICON: &[(&str, i32)] = &[
  ("good", 3),
  ("great", 3),
  ("love", 3),
  ("happy", 3),
  ("like", 2),
  ("thanks", 2),
  ("easy", 1),
  ("bad", -3),
  ("hate", -3),
  ("sad", -2),
  ("confused", -2),
  ("wrong", -2),
  ("boring", -2),
  ("hard", -1),
  ("difficult", -1),
  ("ਵਧੀਆ", 3),
  ("ਖੁਸ਼", 3),
  ("ਚੰਗਾ", 2),
  ("ਧੰਨਵਾਦ", 2),
  ("ਆਸਾਨ", 1),
  ("ਉਦਾਸ", -2),
  ("ਗਲਤ", -2),
  ("ਮੁਸ਼ਕਲ", -2),
  ("ਔਖਾ", -2),
];

const POSITIVE_EMOTION: &str = "ਖੁਸ਼";
const NEGATIVE_EMOTION: &str = "ਉਦਾਸ";

/// Pure dictionary matcher implementing `LanguageService`.
pub struct DictionaryAnalyzer {
  concepts: Vec<(&'static str, Regex)>,
}

impl DictionaryAnalyzer {
  pub fn new() -> Self {
    let patterns = [
      ("addition", r"\d+\s*\+\s*\d+"),
      ("subtraction", r"\d+\s*-\s*\d+"),
      ("multiplication", r"\d+\s*\*\s*\d+"),
      ("division", r"\d+\s*/\s*\d+"),
    ];

    let concepts = patterns
      .into_iter()
      .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (kind, re)))
      .collect();

    Self { concepts }
  }

  /// Classify what the learner is asking for, based on recognized entities.
  /// Later rules take precedence, so an explicit learning term beats a
  /// question word.
  pub fn determine_intent(entities: &Entities) -> Intent {
    let mut intent = Intent::default();

    if let Some(question) = entities.questions.first() {
      intent = Intent {
        kind: IntentKind::Question,
        confidence: 0.8,
        question_type: Some(question.english.clone()),
      };
    }

    let has_term = |word: &str| entities.learning_terms.iter().any(|t| t.punjabi == word);
    if has_term("ਸਿੱਖਣਾ") {
      intent.kind = IntentKind::LearningRequest;
      intent.confidence = 0.9;
    }
    if has_term("ਅਭਿਆਸ") {
      intent.kind = IntentKind::PracticeRequest;
      intent.confidence = 0.8;
    }
    if has_term("ਸਮਝਣਾ") {
      intent.kind = IntentKind::ExplanationRequest;
      intent.confidence = 0.8;
    }

    intent
  }
}

impl Default for DictionaryAnalyzer {
  fn default() -> Self {
    Self::new()
  }
}

impl LanguageService for DictionaryAnalyzer {
  fn recognize_entities(&self, text: &str, _language: Language) -> Result<Entities> {
    let numbers = NUMBERS
      .iter()
      .filter_map(|&(punjabi, value)| {
        char_position(text, punjabi).map(|position| NumberMatch {
          punjabi: punjabi.to_string(),
          value,
          confidence: TERM_CONFIDENCE,
          position,
        })
      })
      .collect();

    let concepts = self
      .concepts
      .iter()
      .filter_map(|(kind, re)| {
        let matches: Vec<String> = re.find_iter(text).map(|m| m.as_str().to_string()).collect();
        (!matches.is_empty()).then(|| ConceptMatch {
          kind: kind.to_string(),
          matches,
          confidence: CONCEPT_CONFIDENCE,
        })
      })
      .collect();

    Ok(Entities {
      subjects: match_terms(text, SUBJECTS),
      operations: match_terms(text, OPERATIONS),
      numbers,
      questions: match_terms(text, QUESTIONS),
      learning_terms: match_terms(text, LEARNING),
      concepts,
    })
  }

  fn analyze_sentiment(&self, text: &str, _language: Language) -> Result<Sentiment> {
    let tokens: Vec<String> = text
      .split_whitespace()
      .map(|t| {
        t.trim_matches(|c: char| c.is_ascii_punctuation() || c == '।')
          .to_lowercase()
      })
      .filter(|t| !t.is_empty())
      .collect();

    if tokens.is_empty() {
      return Ok(Sentiment {
        confidence: 0.0,
        ..Sentiment::default()
      });
    }

    let score: i32 = tokens
      .iter()
      .filter_map(|t| LEXICON.iter().find(|(word, _)| *word == t.as_str()).map(|(_, v)| *v))
      .sum();
    let comparative = score as f64 / tokens.len() as f64;

    let emotion = match score {
      s if s > 0 => POSITIVE_EMOTION,
      s if s < 0 => NEGATIVE_EMOTION,
      _ => NEUTRAL_EMOTION,
    };

    Ok(Sentiment {
      score,
      comparative,
      emotion: emotion.to_string(),
      confidence: comparative.abs(),
    })
  }
}

fn match_terms(text: &str, vocabulary: &[(&str, &str)]) -> Vec<TermMatch> {
  vocabulary
    .iter()
    .filter_map(|&(punjabi, english)| {
      char_position(text, punjabi).map(|position| TermMatch {
        punjabi: punjabi.to_string(),
        english: english.to_string(),
        confidence: TERM_CONFIDENCE,
        position,
      })
    })
    .collect()
}

/// Character offset of the first occurrence of `needle`.
fn char_position(text: &str, needle: &str) -> Option<usize> {
  text.find(needle).map(|byte| text[..byte].chars().count())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_recognizes_subject_operation_and_numbers() {
    let analyzer = DictionaryAnalyzer::new();
    let entities = analyzer
      .recognize_entities("ਗਣਿਤ ਵਿੱਚ ਦੋ ਅਤੇ ਤਿੰਨ ਦਾ ਜੋੜ", Language::Punjabi)
      .unwrap();

    assert_eq!(entities.subjects[0].english, "mathematics");
    assert_eq!(entities.subjects[0].position, 0);
    assert_eq!(entities.operations[0].english, "addition");
    let values: Vec<u32> = entities.numbers.iter().map(|n| n.value).collect();
    assert_eq!(values, vec![2, 3]);
  }

  #[test]
  fn test_concept_patterns() {
    let analyzer = DictionaryAnalyzer::new();
    let entities = analyzer
      .recognize_entities("what is 2 + 3 and 10/5", Language::English)
      .unwrap();

    let kinds: Vec<&str> = entities.concepts.iter().map(|c| c.kind.as_str()).collect();
    assert_eq!(kinds, vec!["addition", "division"]);
    assert_eq!(entities.concepts[0].matches, vec!["2 + 3".to_string()]);
  }

  #[test]
  fn test_plain_text_has_no_entities() {
    let analyzer = DictionaryAnalyzer::new();
    let entities = analyzer.recognize_entities("hello there", Language::English).unwrap();
    assert!(entities.is_empty());
  }

  #[test]
  fn test_sentiment_labels() {
    let analyzer = DictionaryAnalyzer::new();

    let happy = analyzer.analyze_sentiment("this lesson is great!", Language::English).unwrap();
    assert_eq!(happy.score, 3);
    assert_eq!(happy.emotion, "ਖੁਸ਼");
    assert!((happy.comparative - 0.75).abs() < 1e-9);

    let sad = analyzer.analyze_sentiment("ਇਹ ਬਹੁਤ ਔਖਾ ਹੈ।", Language::Punjabi).unwrap();
    assert!(sad.score < 0);
    assert_eq!(sad.emotion, "ਉਦਾਸ");

    let neutral = analyzer.analyze_sentiment("", Language::Punjabi).unwrap();
    assert_eq!(neutral.emotion, NEUTRAL_EMOTION);
  }

  #[test]
  fn test_intent_precedence() {
    let analyzer = DictionaryAnalyzer::new();

    let question = analyzer.recognize_entities("ਜੋੜ ਕਿਵੇਂ ਕਰਦੇ ਹਨ", Language::Punjabi).unwrap();
    let intent = DictionaryAnalyzer::determine_intent(&question);
    assert_eq!(intent.kind, IntentKind::Question);
    assert_eq!(intent.question_type.as_deref(), Some("how"));

    let practice = analyzer
      .recognize_entities("ਮੈਂ ਜੋੜ ਦਾ ਅਭਿਆਸ ਕਰਨਾ ਚਾਹੁੰਦਾ ਹਾਂ", Language::Punjabi)
      .unwrap();
    assert_eq!(
      DictionaryAnalyzer::determine_intent(&practice).kind,
      IntentKind::PracticeRequest
    );

    assert_eq!(
      DictionaryAnalyzer::determine_intent(&Entities::default()).kind,
      IntentKind::General
    );
  }
}
