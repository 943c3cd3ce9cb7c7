//! Numbered citation index shared between a search result and extraction.
//!
//! The search content is annotated with a trailing block:
//!
//! ```text
//! Citations:
//! [1]: http://a.example
//! [2]: http://b.example
//! ```
//!
//! so the extractor can copy `source_url` values verbatim. Models sometimes
//! answer with the marker (`"[2]"`) instead of the URL; [`CitationIndex::normalize`]
//! resolves those before the output is decoded.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Matches a bare citation marker: `[3]`, `3`, `[ 3 ]`.
static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[?\s*(\d+)\s*\]?\s*$").expect("valid regex"));

/// Ordered citation URLs from one search result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CitationIndex {
    urls: Vec<String>,
}

impl CitationIndex {
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls }
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// The trailing block appended to search content.
    pub fn render(&self) -> String {
        let mut block = String::from("\n\nCitations:\n");
        for (i, url) in self.urls.iter().enumerate() {
            block.push_str(&format!("[{}]: {url}\n", i + 1));
        }
        block
    }

    /// Content with the citation block appended.
    pub fn annotate(&self, content: &str) -> String {
        format!("{content}{}", self.render())
    }

    /// URL for a 1-based citation number.
    pub fn url(&self, number: usize) -> Option<&str> {
        number
            .checked_sub(1)
            .and_then(|i| self.urls.get(i))
            .map(String::as_str)
    }

    /// Whether `url` is one of the provided citations.
    pub fn contains(&self, url: &str) -> bool {
        self.urls.iter().any(|u| u == url)
    }

    /// Resolve a `source_url` value: markers become their URL, anything
    /// else is returned unchanged.
    pub fn resolve<'a>(&'a self, source: &'a str) -> &'a str {
        MARKER_RE
            .captures(source)
            .and_then(|caps| caps[1].parse::<usize>().ok())
            .and_then(|n| self.url(n))
            .unwrap_or(source)
    }

    /// Rewrite every `source_url` in an extracted document. Returns the
    /// number of values that were resolved from a marker.
    pub fn normalize(&self, value: &mut Value) -> usize {
        match value {
            Value::Object(map) => {
                let mut resolved = 0;
                for (key, child) in map.iter_mut() {
                    if key == "source_url" {
                        if let Value::String(source) = child {
                            resolved += self.normalize_source(source);
                        }
                    } else {
                        resolved += self.normalize(child);
                    }
                }
                resolved
            }
            Value::Array(items) => items.iter_mut().map(|v| self.normalize(v)).sum(),
            _ => 0,
        }
    }

    fn normalize_source(&self, source: &mut String) -> usize {
        let resolved = self.resolve(source);
        if resolved != source.as_str() {
            *source = resolved.to_string();
            return 1;
        }
        if !self.contains(source) {
            debug!(source_url = %source, "source_url not in citation list");
        }
        0
    }
}
