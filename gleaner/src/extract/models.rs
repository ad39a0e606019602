//! Extraction output types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An outbound link found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedLink {
    /// Absolute URL.
    pub url: String,
    /// Anchor text, whitespace-normalized.
    pub text: String,
    /// Whether the link leaves the host of the page.
    pub external: bool,
}

impl ExtractedLink {
    /// Converts to dictionary.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut dict = HashMap::new();
        dict.insert("url".to_string(), serde_json::json!(self.url));
        dict.insert("text".to_string(), serde_json::json!(self.text));
        dict.insert("external".to_string(), serde_json::json!(self.external));
        dict
    }
}

/// Normalized content of one HTML document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Document title, empty when none was found.
    pub title: String,
    /// Main content text with whitespace collapsed.
    pub text: String,
    /// Outbound links in document order.
    pub links: Vec<ExtractedLink>,
    /// Number of whitespace-separated words in `text`.
    pub word_count: usize,
    /// Number of links.
    pub link_count: usize,
}

impl ExtractionResult {
    /// Links pointing to other hosts.
    pub fn external_links(&self) -> impl Iterator<Item = &ExtractedLink> {
        self.links.iter().filter(|l| l.external)
    }

    /// Links staying on the page's host.
    pub fn internal_links(&self) -> impl Iterator<Item = &ExtractedLink> {
        self.links.iter().filter(|l| !l.external)
    }

    /// Converts to dictionary.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut dict = HashMap::new();
        dict.insert("title".to_string(), serde_json::json!(self.title));
        dict.insert("text".to_string(), serde_json::json!(self.text));
        dict.insert(
            "links".to_string(),
            serde_json::json!(self.links.iter().map(ExtractedLink::to_dict).collect::<Vec<_>>()),
        );
        dict.insert("word_count".to_string(), serde_json::json!(self.word_count));
        dict.insert("link_count".to_string(), serde_json::json!(self.link_count));
        dict
    }
}
