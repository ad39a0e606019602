//! Content extraction and relevance scoring.
//!
//! This module provides:
//! - [`Extractor`]: HTML to title, main text and links
//! - [`ExtractionConfig`]: selectors for removed and main-content elements
//! - [`RelevanceScorer`]: dual-vocabulary keyword scoring

mod config;
mod extractor;
mod models;
mod relevance;

pub use config::ExtractionConfig;
pub use extractor::Extractor;
pub use models::{ExtractedLink, ExtractionResult};
pub use relevance::{RelevanceScore, RelevanceScorer, RelevanceThresholds, Vocabulary};
