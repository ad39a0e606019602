//! Extraction configuration.

use serde::{Deserialize, Serialize};

/// Which parts of a document are dropped and where the main content lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// CSS selectors for elements removed before extracting text and links.
    #[serde(default = "default_remove_selectors")]
    pub remove_selectors: Vec<String>,
    /// CSS selectors tried in order to find the main content.
    #[serde(default = "default_content_selectors")]
    pub content_selectors: Vec<String>,
}

fn default_remove_selectors() -> Vec<String> {
    ["script", "style", "noscript", "nav", "footer", "header"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_content_selectors() -> Vec<String> {
    [".content", "#content", "main", "article"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            remove_selectors: default_remove_selectors(),
            content_selectors: default_content_selectors(),
        }
    }
}

impl ExtractionConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a selector to remove.
    #[must_use]
    pub fn with_remove_selector(mut self, selector: impl Into<String>) -> Self {
        self.remove_selectors.push(selector.into());
        self
    }

    /// Adds a main content selector, tried after the existing ones.
    #[must_use]
    pub fn with_content_selector(mut self, selector: impl Into<String>) -> Self {
        self.content_selectors.push(selector.into());
        self
    }

    /// Replaces the main content selectors.
    #[must_use]
    pub fn with_content_selectors<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.content_selectors = selectors.into_iter().map(Into::into).collect();
        self
    }
}
