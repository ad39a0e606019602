//! HTML to text and links.

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use url::Url;

use super::{ExtractedLink, ExtractionConfig, ExtractionResult};
use crate::errors::ConfigError;

/// Hrefs that never lead to another document.
static NON_NAVIGABLE_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)\s*(?:javascript|mailto|tel|data):").expect("static pattern is valid")
});

/// Turns raw HTML into normalized text, a title and outbound links.
///
/// Elements matching the remove selectors are dropped, along with their
/// subtrees, before text and links are read. Extraction never fails: a
/// document with nothing usable yields empty fields.
#[derive(Debug, Clone)]
pub struct Extractor {
    remove: Vec<Selector>,
    content: Vec<Selector>,
    title: Selector,
    heading: Selector,
    body: Selector,
    anchor: Selector,
}

fn parse_selector(field: &str, css: &str) -> Result<Selector, ConfigError> {
    Selector::parse(css).map_err(|e| ConfigError::new(field, format!("invalid selector '{css}': {e}")))
}

impl Extractor {
    /// Creates an extractor, compiling the configured selectors.
    pub fn new(config: &ExtractionConfig) -> Result<Self, ConfigError> {
        let remove = config
            .remove_selectors
            .iter()
            .map(|css| parse_selector("remove_selectors", css))
            .collect::<Result<_, _>>()?;
        let content = config
            .content_selectors
            .iter()
            .map(|css| parse_selector("content_selectors", css))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            remove,
            content,
            title: parse_selector("title", "title")?,
            heading: parse_selector("heading", "h1")?,
            body: parse_selector("body", "body")?,
            anchor: parse_selector("anchor", "a[href]")?,
        })
    }

    /// Extracts title, main text and links from `html`.
    ///
    /// Relative links are resolved against `base_url`; when it does not
    /// parse, only absolute links are kept and all are treated as external.
    #[must_use]
    pub fn extract(&self, html: &str, base_url: &str) -> ExtractionResult {
        let document = Html::parse_document(html);
        let base = Url::parse(base_url).ok();

        let title = self.title(&document);
        let text = self.main_text(&document);
        let links = self.links(&document, base.as_ref());

        ExtractionResult {
            title,
            word_count: text.split_whitespace().count(),
            link_count: links.len(),
            text,
            links,
        }
    }

    fn title(&self, document: &Html) -> String {
        let from_title = document
            .select(&self.title)
            .next()
            .map(|el| normalize(el.text()))
            .filter(|t| !t.is_empty());

        from_title
            .or_else(|| {
                document
                    .select(&self.heading)
                    .filter(|el| !self.is_inside_removed(*el))
                    .map(|el| self.visible_text(el))
                    .find(|t| !t.is_empty())
            })
            .unwrap_or_default()
    }

    fn main_text(&self, document: &Html) -> String {
        let content = self.content.iter().find_map(|selector| {
            document
                .select(selector)
                .find(|el| !self.is_inside_removed(*el))
        });

        if let Some(element) = content {
            let text = self.visible_text(element);
            if !text.is_empty() {
                return text;
            }
        }

        match document.select(&self.body).next() {
            Some(body) => self.visible_text(body),
            None => self.visible_text(document.root_element()),
        }
    }

    fn links(&self, document: &Html, base: Option<&Url>) -> Vec<ExtractedLink> {
        let base_host = base.and_then(Url::host_str).map(str::to_ascii_lowercase);

        document
            .select(&self.anchor)
            .filter(|el| !self.is_inside_removed(*el))
            .filter_map(|el| {
                let href = el.value().attr("href")?.trim();
                if href.is_empty() || href.starts_with('#') || NON_NAVIGABLE_HREF.is_match(href) {
                    return None;
                }

                let text = self.visible_text(el);
                if text.is_empty() {
                    return None;
                }

                let url = match base {
                    Some(base) => base.join(href).ok()?,
                    None => Url::parse(href).ok()?,
                };
                let host = url.host_str().map(str::to_ascii_lowercase);
                let external = base_host.is_none() || host != base_host;

                Some(ExtractedLink {
                    url: url.into(),
                    text,
                    external,
                })
            })
            .collect()
    }

    fn is_removed(&self, element: ElementRef<'_>) -> bool {
        self.remove.iter().any(|selector| selector.matches(&element))
    }

    fn is_inside_removed(&self, element: ElementRef<'_>) -> bool {
        self.is_removed(element)
            || element
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|ancestor| self.is_removed(ancestor))
    }

    /// Text under `root`, skipping removed subtrees, whitespace-collapsed.
    fn visible_text(&self, root: ElementRef<'_>) -> String {
        let mut parts: Vec<&str> = Vec::new();
        let mut stack: Vec<_> = root.children().collect();
        stack.reverse();

        while let Some(node) = stack.pop() {
            match node.value() {
                Node::Text(text) => parts.push(text),
                Node::Element(_) => {
                    if ElementRef::wrap(node).is_some_and(|el| self.is_removed(el)) {
                        continue;
                    }
                    let start = stack.len();
                    stack.extend(node.children());
                    stack[start..].reverse();
                }
                _ => {}
            }
        }

        normalize(parts)
    }
}

impl Default for Extractor {
    fn default() -> Self {
        // The default selectors are static and known to parse.
        Self::new(&ExtractionConfig::default()).expect("default selectors are valid")
    }
}

/// Joins text fragments, collapsing all whitespace runs to one space.
fn normalize<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for word in parts.into_iter().flat_map(str::split_whitespace) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}
