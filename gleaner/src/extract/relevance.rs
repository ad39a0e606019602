//! Keyword relevance scoring.
//!
//! This module provides:
//! - [`Vocabulary`]: a case-insensitive keyword list
//! - [`RelevanceScorer`]: dual-vocabulary scoring of extracted text
//! - [`RelevanceScore`]: the per-document outcome

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const TOPIC_TERMS: &[&str] = &[
    "scholarship",
    "grant",
    "funding",
    "fellowship",
    "bursary",
    "financial aid",
    "tuition",
    "stipend",
    "award",
    "prize",
    "fully funded",
    "full funding",
    "free tuition",
    "no cost",
    "application deadline",
    "apply now",
    "eligibility",
    "international students",
    "tunisia",
    "north africa",
];

const FIELD_TERMS: &[&str] = &[
    "computer science",
    "artificial intelligence",
    "machine learning",
    "web development",
    "software engineering",
    "information technology",
    "cybersecurity",
    "data science",
    "programming",
    "coding",
];

fn default_topic_threshold() -> f64 {
    0.1
}

fn default_field_threshold() -> f64 {
    0.05
}

/// A list of lowercase keywords matched by substring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vocabulary {
    terms: Vec<String>,
}

impl Vocabulary {
    /// Creates a vocabulary, lowercasing and dropping blank terms.
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { terms }
    }

    /// Funding and eligibility keywords.
    #[must_use]
    pub fn topic_default() -> Self {
        Self::new(TOPIC_TERMS)
    }

    /// Computing-discipline keywords.
    #[must_use]
    pub fn field_default() -> Self {
        Self::new(FIELD_TERMS)
    }

    /// The terms.
    #[must_use]
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Number of terms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether there are no terms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Counts the distinct terms present in already-lowercased text.
    #[must_use]
    pub fn count_matches(&self, lowercase_text: &str) -> usize {
        self.terms.iter().filter(|t| lowercase_text.contains(t.as_str())).count()
    }

    /// Share of terms present, capped at 1.0; 0.0 when empty.
    #[must_use]
    pub fn coverage(&self, matches: usize) -> f64 {
        if self.terms.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = matches as f64 / self.terms.len() as f64;
        ratio.min(1.0)
    }
}

/// Scores a document must exceed to count as relevant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelevanceThresholds {
    /// Minimum topic score, exclusive.
    #[serde(default = "default_topic_threshold")]
    pub topic: f64,
    /// Minimum field score, exclusive.
    #[serde(default = "default_field_threshold")]
    pub field: f64,
}

impl Default for RelevanceThresholds {
    fn default() -> Self {
        Self {
            topic: default_topic_threshold(),
            field: default_field_threshold(),
        }
    }
}

/// Outcome of scoring one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelevanceScore {
    /// Topic terms found.
    pub topic_matches: usize,
    /// Field terms found.
    pub field_matches: usize,
    /// Topic coverage in `[0, 1]`.
    pub topic_score: f64,
    /// Field coverage in `[0, 1]`.
    pub field_score: f64,
    /// Mean of the two scores.
    pub combined: f64,
    /// Both scores exceed their thresholds.
    pub likely_relevant: bool,
}

impl RelevanceScore {
    /// Converts to dictionary.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut dict = HashMap::new();
        dict.insert("topic_matches".to_string(), serde_json::json!(self.topic_matches));
        dict.insert("field_matches".to_string(), serde_json::json!(self.field_matches));
        dict.insert("topic_score".to_string(), serde_json::json!(self.topic_score));
        dict.insert("field_score".to_string(), serde_json::json!(self.field_score));
        dict.insert("combined".to_string(), serde_json::json!(self.combined));
        dict.insert("likely_relevant".to_string(), serde_json::json!(self.likely_relevant));
        dict
    }
}

/// Scores text against a topic and a field vocabulary.
///
/// The default scorer uses the built-in funding and computing vocabularies.
#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceScorer {
    topic: Vocabulary,
    field: Vocabulary,
    thresholds: RelevanceThresholds,
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::new(
            Vocabulary::topic_default(),
            Vocabulary::field_default(),
            RelevanceThresholds::default(),
        )
    }
}

impl RelevanceScorer {
    /// Creates a scorer.
    #[must_use]
    pub fn new(topic: Vocabulary, field: Vocabulary, thresholds: RelevanceThresholds) -> Self {
        Self {
            topic,
            field,
            thresholds,
        }
    }

    /// Returns the topic vocabulary.
    #[must_use]
    pub fn topic(&self) -> &Vocabulary {
        &self.topic
    }

    /// Returns the field vocabulary.
    #[must_use]
    pub fn field(&self) -> &Vocabulary {
        &self.field
    }

    /// Returns the thresholds.
    #[must_use]
    pub fn thresholds(&self) -> RelevanceThresholds {
        self.thresholds
    }

    /// Scores `text`. Matching is case-insensitive.
    #[must_use]
    pub fn score(&self, text: &str) -> RelevanceScore {
        let lowered = text.to_lowercase();
        let topic_matches = self.topic.count_matches(&lowered);
        let field_matches = self.field.count_matches(&lowered);
        let topic_score = self.topic.coverage(topic_matches);
        let field_score = self.field.coverage(field_matches);

        RelevanceScore {
            topic_matches,
            field_matches,
            topic_score,
            field_score,
            combined: (topic_score + field_score) / 2.0,
            likely_relevant: topic_score > self.thresholds.topic && field_score > self.thresholds.field,
        }
    }
}
